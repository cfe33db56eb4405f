//! Callbacks - interpreter functions with a C face
//!
//! A callback wraps a FUNCTION! in a libffi closure so foreign code can
//! call it through a plain C function pointer. The closure's dispatcher
//! converts the raw argument bytes to cells, applies the function, and
//! marshals the result into the return pointer.
//!
//! A raise inside the interpreted code must NOT unwind through the
//! foreign frames between the closure and the routine call that
//! triggered it: the error is parked in the interpreter's callback-error
//! slot, the callback returns zeroes, and the routine dispatcher raises
//! once `ffi_call` has come back across the boundary.

use super::routine::RoutineInfo;
use super::types::{FfiType, arg_to_ffi, ffi_to_value};
use crate::error::with_trap_all;
use crate::func::func_body_holder;
use crate::interp::rt;
use libffi::low;
use reval_core::cell::{Cell, Kind};

/// An allocated libffi closure plus the interface it was prepared with.
pub struct ClosureHandle {
    closure: *mut low::ffi_closure,
    pub code: *mut core::ffi::c_void,
    /// Kept alive for the closure's cif.
    _cif: super::routine::CifBundle,
}

impl Drop for ClosureHandle {
    fn drop(&mut self) {
        if !self.closure.is_null() {
            unsafe { low::closure_free(self.closure) };
        }
    }
}

/// The C-ABI code pointer of a callback FUNCTION!, if it is one.
pub fn callback_thunk(fn_cell: &Cell) -> Option<*mut core::ffi::c_void> {
    debug_assert!(fn_cell.is_kind(Kind::Function));
    let paramlist = fn_cell.func_paramlist();
    if crate::func::func_dispatcher(paramlist) as usize
        != super::routine::dispatch_routine as usize
    {
        return None;
    }
    let info = super::routine::routine_info(paramlist);
    unsafe { (*info).callback.as_ref().map(|c| c.code) }
}

/// The libffi closure entry: `{cif, return-ptr, args-ptr-array, userdata}`
/// with userdata pointing at the RoutineInfo.
unsafe extern "C" fn callback_dispatcher(
    _cif: *mut low::ffi_cif,
    result: *mut core::ffi::c_void,
    args: *mut *mut core::ffi::c_void,
    userdata: *mut core::ffi::c_void,
) {
    let info = unsafe { &*(userdata as *const RoutineInfo) };

    // Zero the return up front so an erroring callback hands back a
    // defined value.
    unsafe {
        core::ptr::write_bytes(result as *mut u8, 0, info.ret_schema.size().max(8));
    }

    let outcome = with_trap_all(|| {
        let mut cells: Vec<Cell> = Vec::with_capacity(info.arg_schemas.len());
        for (n, (_, schema)) in info.arg_schemas.iter().enumerate() {
            let raw = unsafe { *args.add(n) } as *const u8;
            let mut cell = Cell::zeroed();
            ffi_to_value(&mut cell, *schema, raw)?;
            cells.push(cell);
        }

        // The wrapped function rides in the body holder alongside the
        // info handle (slot one), which also keeps it collector-visible.
        let fn_cell = {
            let paramlist = callback_paramlist(info);
            let holder = func_body_holder(paramlist);
            unsafe { *(*holder).array_at(1) }
        };

        let refs: Vec<&Cell> = cells.iter().collect();
        let mut out = Cell::end();
        crate::eval::apply_function(&fn_cell, &refs, &mut out)?;

        if info.ret_schema != FfiType::Void {
            let mut store: Vec<u8> = Vec::with_capacity(16);
            let offset = arg_to_ffi(&mut store, info.ret_schema, &out)?;
            unsafe {
                core::ptr::copy_nonoverlapping(
                    store.as_ptr().add(offset),
                    result as *mut u8,
                    info.ret_schema.size(),
                );
            }
        }
        Ok(())
    });

    if let Err(ctx) = outcome {
        // Parked for the routine caller on the other side of the foreign
        // frames; never longjmp/unwind from here.
        rt().callback_error = ctx;
    }
}

/// Back-pointer from info to the paramlist that owns it. Stored at
/// closure construction (the info outlives the closure).
fn callback_paramlist(info: &RoutineInfo) -> *mut reval_core::series::Series {
    info.owner
}

/// Allocate and prepare the closure for a callback's interface.
pub fn make_closure(
    abi: low::ffi_abi,
    arg_schemas: &[(String, FfiType)],
    ret: FfiType,
    info: *mut RoutineInfo,
) -> Result<ClosureHandle, crate::error::Raised> {
    let types: Vec<FfiType> = arg_schemas.iter().map(|(_, t)| *t).collect();
    let mut cif = super::routine::CifBundle::new(abi, &types, &[], ret)?;

    let (closure, code) = low::closure_alloc();
    if closure.is_null() {
        return crate::error::fail(crate::error::ErrorId::NoMemory, &["closure"]);
    }

    let status = unsafe {
        libffi::raw::ffi_prep_closure_loc(
            closure,
            cif.raw(),
            Some(callback_dispatcher),
            info as *mut core::ffi::c_void,
            code.0,
        )
    };
    if status != libffi::raw::ffi_status_FFI_OK {
        unsafe { low::closure_free(closure) };
        return crate::error::fail(
            crate::error::ErrorId::InvalidArg,
            &["unsupported callback interface"],
        );
    }

    Ok(ClosureHandle {
        closure,
        code: code.0,
        _cif: cif,
    })
}
