//! ROUTINE! - calling C functions as interpreter functions
//!
//! A routine is a FUNCTION! whose dispatcher marshals the fulfilled frame
//! into a C argument store and makes the foreign call through libffi. The
//! routine info (ABI, symbol pointer, schemas, cached call interface)
//! hangs off the body holder as a cleaned HANDLE!, with the interface
//! descriptor precomputed for fixed-arity routines and rebuilt per call
//! for variadics.

use super::types::{FfiType, arg_to_ffi, ffi_to_value};
use crate::context::ParamClass;
use crate::error::{ErrorId, Raised, fail};
use crate::frame::Frame;
use crate::func::{ParamSpec, func_body_holder, make_function_base};
use crate::interp::rt;
use libffi::low;
use reval_core::cell::{Cell, Kind};
use reval_core::series::{Series, append_cell};
use reval_core::symbol::spelling_bytes;

/// A prepared call interface: the cif plus the argument type array it
/// points into, kept boxed so the addresses stay put.
pub struct CifBundle {
    cif: Box<low::ffi_cif>,
    _arg_types: Box<[*mut low::ffi_type]>,
}

impl CifBundle {
    pub fn new(
        abi: low::ffi_abi,
        fixed: &[FfiType],
        extra: &[FfiType],
        ret: FfiType,
    ) -> Result<CifBundle, Raised> {
        let mut arg_types: Box<[*mut low::ffi_type]> = fixed
            .iter()
            .chain(extra.iter())
            .map(|t| t.libffi_type())
            .collect();
        let mut cif: Box<low::ffi_cif> = Box::new(unsafe { core::mem::zeroed() });

        let status = if extra.is_empty() {
            unsafe {
                low::prep_cif(
                    &mut *cif,
                    abi,
                    arg_types.len(),
                    ret.libffi_type(),
                    arg_types.as_mut_ptr(),
                )
            }
        } else {
            unsafe {
                low::prep_cif_var(
                    &mut *cif,
                    abi,
                    fixed.len(),
                    arg_types.len(),
                    ret.libffi_type(),
                    arg_types.as_mut_ptr(),
                )
            }
        };
        if status.is_err() {
            return fail(ErrorId::InvalidArg, &["unsupported routine interface"]);
        }
        Ok(CifBundle {
            cif,
            _arg_types: arg_types,
        })
    }

    #[inline]
    pub fn raw(&mut self) -> *mut low::ffi_cif {
        &mut *self.cif
    }
}

/// Everything the dispatcher needs about one routine or callback.
pub struct RoutineInfo {
    pub abi: low::ffi_abi,
    /// Forward routines: the resolved C function. Null for callbacks.
    pub cfunc: *mut core::ffi::c_void,
    /// The LIBRARY! this symbol came from (closedness checked per call).
    pub library: Option<Cell>,
    pub arg_schemas: Vec<(String, FfiType)>,
    pub ret_schema: FfiType,
    pub variadic: bool,
    /// Cached interface for fixed-arity routines.
    pub cif: Option<CifBundle>,
    /// Reverse side: the closure handed to C (see `callback.rs`).
    pub callback: Option<super::callback::ClosureHandle>,
    /// The paramlist this info belongs to (callbacks reach their wrapped
    /// function through it).
    pub owner: *mut Series,
}

/// Recover the routine info from a routine FUNCTION!'s paramlist.
pub fn routine_info(paramlist: *mut Series) -> *mut RoutineInfo {
    let holder = func_body_holder(paramlist);
    let handle = unsafe { &*(*holder).array_at(0) };
    debug_assert!(handle.is_kind(Kind::Handle));
    handle.handle_pointer() as *mut RoutineInfo
}

/// The HANDLE! cleaner that retires the info when the collector frees the
/// body holder.
fn routine_info_cleaner(cell: &mut Cell) {
    let ptr = cell.handle_pointer() as *mut RoutineInfo;
    if !ptr.is_null() {
        drop(unsafe { Box::from_raw(ptr) });
        cell.payload[0] = 0;
    }
}

/// Wrap a RoutineInfo into a FUNCTION! with `dispatcher`, one parameter
/// per argument schema. Callbacks append the wrapped function cell to the
/// body holder so the collector keeps it alive.
pub fn make_routine_function(
    info: Box<RoutineInfo>,
    dispatcher: crate::func::Dispatcher,
    callback_fn: Option<&Cell>,
) -> *mut Series {
    let specs: Vec<ParamSpec> = info
        .arg_schemas
        .iter()
        .map(|(name, _)| ParamSpec {
            // Parameter names live as long as the routine; the paramlist
            // interns them immediately.
            name: Box::leak(name.clone().into_boxed_str()),
            class: ParamClass::Normal,
            types: crate::context::TS_ANY,
        })
        .collect();

    let paramlist = make_function_base(&specs, dispatcher);
    let holder = func_body_holder(paramlist);
    unsafe {
        let body = (*holder).array_at(0);
        (*body).init_handle(Box::into_raw(info) as *mut core::ffi::c_void, 0);
        (*body).extra = routine_info_cleaner as usize as u64;
    }
    if let Some(fn_cell) = callback_fn {
        append_cell(holder, fn_cell);
    }
    paramlist
}

// =============================================================================
// ABI selection
// =============================================================================

/// Map an ABI word to the platform's libffi ABI. Selections that do not
/// exist on this platform are reported at routine construction time.
pub fn abi_from_name(name: &[u8]) -> Result<low::ffi_abi, Raised> {
    match name {
        b"default" => return Ok(low::ffi_abi_FFI_DEFAULT_ABI),
        #[cfg(all(unix, target_arch = "x86_64"))]
        b"unix64" => return Ok(libffi::raw::ffi_abi_FFI_UNIX64),
        #[cfg(all(windows, target_arch = "x86_64"))]
        b"win64" => return Ok(libffi::raw::ffi_abi_FFI_WIN64),
        #[cfg(target_arch = "x86")]
        b"sysv" => return Ok(libffi::raw::ffi_abi_FFI_SYSV),
        #[cfg(all(windows, target_arch = "x86"))]
        b"stdcall" => return Ok(libffi::raw::ffi_abi_FFI_STDCALL),
        #[cfg(all(windows, target_arch = "x86"))]
        b"thiscall" => return Ok(libffi::raw::ffi_abi_FFI_THISCALL),
        #[cfg(all(windows, target_arch = "x86"))]
        b"fastcall" => return Ok(libffi::raw::ffi_abi_FFI_FASTCALL),
        #[cfg(all(windows, target_arch = "x86"))]
        b"ms-cdecl" => return Ok(libffi::raw::ffi_abi_FFI_MS_CDECL),
        #[cfg(target_arch = "arm")]
        b"vfp" => return Ok(libffi::raw::ffi_abi_FFI_VFP),
        _ => {}
    }
    let text = String::from_utf8_lossy(name).into_owned();
    fail(ErrorId::InvalidArg, &[&format!("ABI not supported here: {text}")])
}

// =============================================================================
// Spec compilation
// =============================================================================

pub struct Interface {
    pub args: Vec<(String, FfiType)>,
    pub ret: FfiType,
    pub variadic: bool,
}

fn schema_from_block(cell: &Cell) -> Result<FfiType, Raised> {
    if !cell.is_kind(Kind::Block) {
        return fail(ErrorId::BadMake, &["routine!", "schema must be a block"]);
    }
    let array = cell.series();
    let first = unsafe { &*(*array).array_at(cell.index()) };
    if !first.is_kind(Kind::Word) {
        // BLOCK! schemas describe struct layouts; the core carries only
        // primitive classes.
        return fail(ErrorId::BadMake, &["routine!", "struct schemas not supported"]);
    }
    let name = spelling_bytes(reval_core::symbol::canon_of(first.word_spelling()));
    match FfiType::from_name(name) {
        Some(t) => Ok(t),
        None => {
            let text = String::from_utf8_lossy(name).into_owned();
            fail(ErrorId::BadMake, &["routine!", &format!("unknown type {text}")])
        }
    }
}

/// Compile `[arg1 [int32] arg2 [pointer] ... return: [float]]`.
pub fn compile_interface(spec: &Cell) -> Result<Interface, Raised> {
    debug_assert!(spec.is_kind(Kind::Block));
    let array = spec.series();
    let len = unsafe { (*array).len() };
    let mut args = Vec::new();
    let mut ret = FfiType::Void;
    let mut variadic = false;

    let mut i = spec.index();
    while i < len {
        let item = unsafe { &*(*array).array_at(i) };
        match item.kind_checked() {
            Kind::Word => {
                let spelled = spelling_bytes(item.word_spelling());
                if spelled == b"..." {
                    variadic = true;
                    i += 1;
                    continue;
                }
                let name = String::from_utf8_lossy(spelled).into_owned();
                i += 1;
                if i >= len {
                    return fail(ErrorId::BadMake, &["routine!", "missing arg schema"]);
                }
                let schema = schema_from_block(unsafe { &*(*array).array_at(i) })?;
                args.push((name, schema));
                i += 1;
            }
            Kind::SetWord => {
                let spelled =
                    spelling_bytes(reval_core::symbol::canon_of(item.word_spelling()));
                if spelled != b"return" {
                    return fail(ErrorId::BadMake, &["routine!", "unknown spec set-word"]);
                }
                i += 1;
                if i >= len {
                    return fail(ErrorId::BadMake, &["routine!", "missing return schema"]);
                }
                ret = schema_from_block(unsafe { &*(*array).array_at(i) })?;
                i += 1;
            }
            Kind::String => i += 1, // doc string
            k => {
                return fail(ErrorId::BadMake, &["routine!", k.name()]);
            }
        }
    }
    Ok(Interface {
        args,
        ret,
        variadic,
    })
}

// =============================================================================
// Forward dispatch
// =============================================================================

/// The routine dispatcher: marshal the frame, make the foreign call,
/// convert the result back.
pub fn dispatch_routine(f: &mut Frame) -> Result<(), Raised> {
    let info_ptr = routine_info(f.func);
    let info = unsafe { &mut *info_ptr };

    if info.cfunc.is_null() {
        // A callback value invoked from this side simply applies the
        // wrapped function.
        let holder = func_body_holder(f.func);
        let fn_cell = unsafe { *(*holder).array_at(1) };
        let args: Vec<Cell> = (1..=f.num_args).map(|n| unsafe { *f.arg_at(n) }).collect();
        let arg_refs: Vec<&Cell> = args.iter().collect();
        return crate::eval::apply_function(&fn_cell, &arg_refs, f.out);
    }

    if let Some(library) = &info.library {
        if super::library::library_closed(library) {
            return fail(ErrorId::BadLibrary, &[]);
        }
    }

    // Assemble the argument store; every push is a (schema, offset) pair,
    // rebased to pointers only after the store stops reallocating.
    let mut store: Vec<u8> = Vec::with_capacity(info.arg_schemas.len() * 8);
    let mut pushed: Vec<(usize, FfiType)> = Vec::new();
    let mut extra_schemas: Vec<FfiType> = Vec::new();

    let fixed_count = info.arg_schemas.len() - if info.variadic { 1 } else { 0 };
    let arg_cells: Vec<Cell> = (1..=f.num_args).map(|n| unsafe { *f.arg_at(n) }).collect();

    for (n, (_, schema)) in info.arg_schemas.iter().enumerate().take(fixed_count) {
        let offset = arg_to_ffi(&mut store, *schema, &arg_cells[n])?;
        pushed.push((offset, *schema));
    }

    if info.variadic {
        // The trailing parameter is a block of [value type-word ...] pairs
        // making up the variadic tail; its interface is per-call.
        let tail = &arg_cells[fixed_count];
        if !tail.is_kind(Kind::Block) {
            return fail(ErrorId::ArgType, &["routine", tail.kind_checked().name(), "varargs"]);
        }
        let array = tail.series();
        let len = unsafe { (*array).len() };
        let mut i = tail.index();
        while i < len {
            let value = unsafe { &*(*array).array_at(i) };
            i += 1;
            if i >= len {
                return fail(ErrorId::BadMake, &["routine!", "odd varargs pairing"]);
            }
            let type_word = unsafe { &*(*array).array_at(i) };
            i += 1;
            if !type_word.is_kind(Kind::Word) {
                return fail(ErrorId::BadMake, &["routine!", "varargs type must be a word"]);
            }
            let schema = FfiType::from_name(spelling_bytes(reval_core::symbol::canon_of(
                type_word.word_spelling(),
            )))
            .ok_or_else(|| {
                crate::error::make_error(ErrorId::BadMake, &["routine!", "unknown varargs type"])
            })
            .map_err(Raised)?;
            let offset = arg_to_ffi(&mut store, schema, value)?;
            pushed.push((offset, schema));
            extra_schemas.push(schema);
        }
    }

    // Rebase offsets into pointers now that the store is final.
    let mut arg_ptrs: Vec<*mut core::ffi::c_void> = pushed
        .iter()
        .map(|(offset, _)| unsafe { store.as_mut_ptr().add(*offset) as *mut core::ffi::c_void })
        .collect();

    let fixed_types: Vec<FfiType> = info
        .arg_schemas
        .iter()
        .take(fixed_count)
        .map(|(_, t)| *t)
        .collect();

    // Fixed routines reuse the interface prepared at construction; a
    // variadic call builds one for its exact signature.
    let mut fresh;
    let cif = if info.variadic {
        fresh = CifBundle::new(info.abi, &fixed_types, &extra_schemas, info.ret_schema)?;
        fresh.raw()
    } else {
        info.cif
            .as_mut()
            .expect("fixed routine without prepared interface")
            .raw()
    };

    // Errors raised inside callbacks during this call surface here, not
    // by unwinding through the foreign frames.
    rt().callback_error = core::ptr::null_mut();

    let mut ret_buffer = [0u64; 2];
    unsafe {
        libffi::raw::ffi_call(
            cif,
            Some(core::mem::transmute::<*mut core::ffi::c_void, unsafe extern "C" fn()>(
                info.cfunc,
            )),
            ret_buffer.as_mut_ptr() as *mut core::ffi::c_void,
            arg_ptrs.as_mut_ptr(),
        );
    }

    let parked = rt().callback_error;
    if !parked.is_null() {
        rt().callback_error = core::ptr::null_mut();
        return Err(Raised(parked));
    }

    let out = unsafe { &mut *f.out };
    ffi_to_value(out, info.ret_schema, ret_buffer.as_ptr() as *const u8)?;
    Ok(())
}
