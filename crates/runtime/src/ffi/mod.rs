//! FFI - foreign routines and callbacks
//!
//! The trampoline has two directions. **Forward**: a ROUTINE! compiled
//! from a spec block calls a C symbol, marshalling the fulfilled frame
//! into a C argument store (`routine.rs`). **Reverse**: a callback wraps
//! an interpreter function in a libffi closure so C code can invoke it
//! through an ordinary function pointer (`callback.rs`). LIBRARY! values
//! (`library.rs`) carry the dlopen handles routines resolve against.
//!
//! The whole module rides behind the `ffi` cargo feature; builds without
//! it report `not-ffi-build` at construction time.

pub mod callback;
pub mod library;
pub mod routine;
pub mod types;

use crate::bind::Specifier;
use crate::context::ParamClass;
use crate::error::{ErrorId, Raised, fail};
use crate::eval::eval_next;
use crate::frame::Frame;
use crate::func::{ParamSpec, ts};
use libffi::low;
use reval_core::cell::{Cell, Kind};
use reval_core::series::Series;
use reval_core::symbol::{canon_of, spelling_bytes};
use routine::{CifBundle, RoutineInfo, dispatch_routine, make_routine_function};
use types::FfiType;

fn arg(f: &Frame, n: usize) -> Cell {
    unsafe { *f.arg_at(n) }
}

fn abi_of(f: &Frame, refine_index: usize) -> Result<low::ffi_abi, Raised> {
    let refine = arg(f, refine_index);
    if refine.is_kind(Kind::Blank) {
        return Ok(low::ffi_abi_FFI_DEFAULT_ABI);
    }
    let word = arg(f, refine_index + 1);
    routine::abi_from_name(spelling_bytes(canon_of(word.word_spelling())))
}

/// MAKE-LIBRARY path - open a shared library (blank path opens the
/// running process image).
fn native_make_library(f: &mut Frame) -> Result<(), Raised> {
    let path = arg(f, 1);
    let bytes: Vec<u8> = match path.kind_checked() {
        Kind::File | Kind::String => unsafe { (*path.series()).data_slice().to_vec() },
        Kind::Blank => Vec::new(),
        k => return fail(ErrorId::ArgType, &["make-library", k.name(), "path"]),
    };
    let cell = library::open_library(&bytes)?;
    unsafe { *f.out = cell };
    Ok(())
}

/// CLOSE-LIBRARY library - release the handle; routines using it start
/// reporting bad-library.
fn native_close_library(f: &mut Frame) -> Result<(), Raised> {
    let mut library = arg(f, 1);
    if !library.is_kind(Kind::Library) {
        return fail(ErrorId::ArgType, &["close-library", library.kind_checked().name(), "library"]);
    }
    library::close_library(&mut library)?;
    unsafe { *f.out = library };
    Ok(())
}

/// MAKE-ROUTINE spec /abi abi - compile `[library "symbol" [interface]]`
/// into a callable ROUTINE!.
fn native_make_routine(f: &mut Frame) -> Result<(), Raised> {
    let spec = arg(f, 1);
    if !spec.is_kind(Kind::Block) {
        return fail(ErrorId::BadMake, &["routine!", spec.kind_checked().name()]);
    }
    let abi = abi_of(f, 2)?;

    // The spec block evaluates its library position (usually a word), then
    // takes the symbol string and interface block literally.
    let array = spec.series();
    let mut index = spec.index();
    let mut library = Cell::end();
    eval_next(&mut library, array, &mut index, Specifier::Specified, 0)?;
    if !library.is_kind(Kind::Library) {
        return fail(ErrorId::BadMake, &["routine!", "first item must be a library"]);
    }

    let len = unsafe { (*array).len() };
    if index + 2 > len {
        return fail(ErrorId::BadMake, &["routine!", "missing symbol or interface"]);
    }
    let symbol = unsafe { *(*array).array_at(index) };
    let interface_block = unsafe { *(*array).array_at(index + 1) };
    if !symbol.is_kind(Kind::String) || !interface_block.is_kind(Kind::Block) {
        return fail(ErrorId::BadMake, &["routine!", "expected \"symbol\" [interface]"]);
    }

    let name = String::from_utf8_lossy(unsafe { (*symbol.series()).data_slice() }).into_owned();
    let cfunc = library::find_symbol(&library, &name)?;

    let interface = routine::compile_interface(&interface_block)?;
    let fixed: Vec<FfiType> = interface.args.iter().map(|(_, t)| *t).collect();

    let mut info = Box::new(RoutineInfo {
        abi,
        cfunc,
        library: Some(library),
        arg_schemas: interface.args,
        ret_schema: interface.ret,
        variadic: interface.variadic,
        cif: None,
        callback: None,
        owner: core::ptr::null_mut(),
    });
    if !info.variadic {
        info.cif = Some(CifBundle::new(abi, &fixed, &[], info.ret_schema)?);
    } else {
        // Variadic routines take a trailing block of [value type ...]
        // pairs; the interface is rebuilt per call.
        info.arg_schemas.push(("varargs".into(), FfiType::Void));
    }

    let paramlist = make_routine_function(info, dispatch_routine, None);
    unsafe {
        (*routine::routine_info(paramlist)).owner = paramlist;
        (*f.out).init_function(paramlist, crate::func::func_body_holder(paramlist));
    }
    Ok(())
}

/// MAKE-CALLBACK function [interface] /abi abi - wrap an interpreter
/// function as a C function pointer.
fn native_make_callback(f: &mut Frame) -> Result<(), Raised> {
    let target = arg(f, 1);
    let interface_block = arg(f, 2);
    if !target.is_kind(Kind::Function) {
        return fail(ErrorId::ArgType, &["make-callback", target.kind_checked().name(), "function"]);
    }
    if !interface_block.is_kind(Kind::Block) {
        return fail(ErrorId::BadMake, &["callback!", interface_block.kind_checked().name()]);
    }
    let abi = abi_of(f, 3)?;

    let interface = routine::compile_interface(&interface_block)?;
    if interface.variadic {
        return fail(ErrorId::BadMake, &["callback!", "variadic callbacks not supported"]);
    }

    let info = Box::new(RoutineInfo {
        abi,
        cfunc: core::ptr::null_mut(),
        library: None,
        arg_schemas: interface.args,
        ret_schema: interface.ret,
        variadic: false,
        cif: None,
        callback: None,
        owner: core::ptr::null_mut(),
    });

    let paramlist = make_routine_function(info, dispatch_routine, Some(&target));
    let info_ptr = routine::routine_info(paramlist);
    unsafe {
        (*info_ptr).owner = paramlist;
        let closure = callback::make_closure(
            abi,
            &(*info_ptr).arg_schemas,
            (*info_ptr).ret_schema,
            info_ptr,
        )?;
        (*info_ptr).callback = Some(closure);
        (*f.out).init_function(paramlist, crate::func::func_body_holder(paramlist));
    }
    Ok(())
}

/// ROUTINE-POINTER callback - the raw code pointer, for handing to C
/// registration APIs by value.
fn native_routine_pointer(f: &mut Frame) -> Result<(), Raised> {
    let target = arg(f, 1);
    if !target.is_kind(Kind::Function) {
        return fail(ErrorId::ArgType, &["routine-pointer", target.kind_checked().name(), "callback"]);
    }
    match callback::callback_thunk(&target) {
        Some(code) => unsafe {
            (*f.out).init_integer(code as usize as i64);
            Ok(())
        },
        None => fail(ErrorId::OnlyCallbackPtr, &[]),
    }
}

/// Register the FFI constructors in the library context.
pub fn init_ffi_natives(lib: *mut Series) {
    let normal = ParamSpec::normal;
    let refine = ParamSpec::refinement;
    let abi_word = ParamSpec {
        name: "abi",
        class: ParamClass::Normal,
        types: ts(Kind::Word),
    };

    crate::natives::add_native(lib, "make-library", &[normal("path")], native_make_library);
    crate::natives::add_native(lib, "close-library", &[normal("library")], native_close_library);
    crate::natives::add_native(
        lib,
        "make-routine",
        &[normal("spec"), refine("abi"), abi_word],
        native_make_routine,
    );
    let abi_word2 = ParamSpec {
        name: "abi",
        class: ParamClass::Normal,
        types: ts(Kind::Word),
    };
    crate::natives::add_native(
        lib,
        "make-callback",
        &[normal("function"), normal("interface"), refine("abi"), abi_word2],
        native_make_callback,
    );
    crate::natives::add_native(
        lib,
        "routine-pointer",
        &[normal("callback")],
        native_routine_pointer,
    );
}
