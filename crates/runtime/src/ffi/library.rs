//! LIBRARY! values - dlopen handles
//!
//! A LIBRARY! wraps a `dlopen` handle plus the path it was opened from.
//! Closing nulls the handle in place, so every cell aliasing the library
//! sees it closed; routine dispatch checks before each call.

use crate::error::{ErrorId, Raised, fail};
use reval_core::cell::{Cell, Kind};
use reval_core::series::{MKS_NONE, Series, make_binary_from, manage_series};
use std::ffi::CString;

/// Open a shared library. An empty path opens the running process image
/// (its exported symbols include the C runtime).
pub fn open_library(path: &[u8]) -> Result<Cell, Raised> {
    let handle = if path.is_empty() {
        unsafe { libc::dlopen(core::ptr::null(), libc::RTLD_LAZY) }
    } else {
        let Ok(cpath) = CString::new(path.to_vec()) else {
            return fail(ErrorId::BadLibrary, &[]);
        };
        unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_LAZY) }
    };
    if handle.is_null() {
        return fail(ErrorId::BadLibrary, &[]);
    }

    let path_series = make_binary_from(path, MKS_NONE);
    manage_series(path_series);
    let mut cell = Cell::zeroed();
    cell.init_library(handle, path_series);
    Ok(cell)
}

pub fn close_library(cell: &mut Cell) -> Result<(), Raised> {
    debug_assert!(cell.is_kind(Kind::Library));
    let handle = cell.library_handle();
    if handle.is_null() {
        return fail(ErrorId::BadLibrary, &[]);
    }
    unsafe {
        libc::dlclose(handle);
    }
    cell.payload[0] = 0;
    Ok(())
}

#[inline]
pub fn library_closed(cell: &Cell) -> bool {
    cell.library_handle().is_null()
}

/// Resolve a symbol in an open library.
pub fn find_symbol(library: &Cell, name: &str) -> Result<*mut core::ffi::c_void, Raised> {
    if library_closed(library) {
        return fail(ErrorId::BadLibrary, &[]);
    }
    let Ok(cname) = CString::new(name) else {
        return fail(ErrorId::BadLibrary, &[]);
    };
    let sym = unsafe { libc::dlsym(library.library_handle(), cname.as_ptr()) };
    if sym.is_null() {
        return fail(ErrorId::BadLibrary, &[]);
    }
    Ok(sym)
}

/// Path series accessor used by molding and diagnostics.
pub fn library_path_bytes(cell: &Cell) -> &[u8] {
    let series: *mut Series = cell.library_path();
    unsafe { (*series).data_slice() }
}
