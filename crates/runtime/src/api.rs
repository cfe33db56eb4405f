//! Embedding API - the C-callable surface
//!
//! A thin `extern "C"` face over the interpreter for host programs:
//! lifecycle, do-string with typed result codes, raw cell accessors and
//! writers, series makers, frame introspection, the word map, and the
//! device-integration event queue. Pointer-taking functions trust the
//! caller the way a C API does; everything here assumes `reval_init` ran
//! on the calling thread.

use crate::frame::Frame;
use crate::interp::{Event, rt};
use crate::{DoResult, InitOptions, do_string, init_core, shutdown_core};
use core::ffi::{c_char, c_int, c_void};
use reval_core::cell::{Cell, Kind};
use reval_core::series::{
    MKS_NONE, Series, expand_series, make_array, make_series, manage_series,
};
use reval_core::symbol::{canon_of, spelling_bytes};

/// Version code reported by `reval_init`.
pub const REVAL_VERSION: c_int = 0x0003_0000;

// =============================================================================
// Lifecycle
// =============================================================================

/// Initialize the interpreter on the calling thread. Returns the version
/// code (negative would mean refusal; this build always accepts).
#[unsafe(no_mangle)]
pub extern "C" fn reval_init() -> c_int {
    init_core(InitOptions {
        sigint_halt: true,
        trace: false,
    });
    REVAL_VERSION
}

/// Shut the interpreter down. `clean` runs a final collection so handle
/// cleaners fire before teardown.
#[unsafe(no_mangle)]
pub extern "C" fn reval_shutdown(clean: bool) {
    shutdown_core(clean);
}

/// Request a HALT; the evaluator unwinds at its next step. Callable from
/// any thread (this is the SIGINT-equivalent for embedders).
#[unsafe(no_mangle)]
pub extern "C" fn reval_escape() {
    crate::signal::request_halt();
}

/// Scan and evaluate a NUL-terminated UTF-8 string. The result value (if
/// any) is copied to `out`. Returns the positive kind number, 0 for
/// void, -1 for halt, -2 for quit, -3 for error (the error context is
/// copied to `out` as an ERROR! value).
///
/// # Safety
/// `text` must be a valid NUL-terminated string; `out`, when non-null,
/// must point at a writable cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_do_string(text: *const c_char, _flags: u32, out: *mut Cell) -> i32 {
    let bytes = unsafe { core::ffi::CStr::from_ptr(text) }.to_bytes();
    let result = do_string(bytes);
    if !out.is_null() {
        unsafe {
            match result {
                DoResult::Value(cell) => *out = cell,
                DoResult::Error(ctx) => {
                    (*out).init_context(Kind::Error, ctx);
                }
                _ => (*out).set_end(),
            }
        }
    }
    result.code()
}

// =============================================================================
// Cell accessors
// =============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_type(cell: *const Cell) -> c_int {
    unsafe { (*cell).kind_byte() as c_int }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_int64(cell: *const Cell) -> i64 {
    unsafe { (*cell).int64() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_int32(cell: *const Cell) -> i32 {
    unsafe { (*cell).int64() as i32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_decimal(cell: *const Cell) -> f64 {
    unsafe { (*cell).decimal() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_logic(cell: *const Cell) -> bool {
    unsafe { (*cell).logic() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_char(cell: *const Cell) -> u32 {
    unsafe { (*cell).character() as u32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_pair_x(cell: *const Cell) -> f32 {
    unsafe { (*cell).pair_x() as f32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_pair_y(cell: *const Cell) -> f32 {
    unsafe { (*cell).pair_y() as f32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_time(cell: *const Cell) -> i64 {
    unsafe { (*cell).time_nanos() }
}

/// Copies up to `max` tuple bytes to `out`, returning the tuple length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_tuple_data(cell: *const Cell, out: *mut u8, max: usize) -> usize {
    unsafe {
        let bytes = (*cell).tuple_bytes();
        let len = (*cell).tuple_len();
        let n = len.min(max);
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), out, n);
        len
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_series(cell: *const Cell) -> *mut Series {
    unsafe { (*cell).series() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_index(cell: *const Cell) -> usize {
    unsafe { (*cell).index() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_handle_pointer(cell: *const Cell) -> *mut c_void {
    unsafe { (*cell).handle_pointer() }
}

// =============================================================================
// Cell writers
// =============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_reset(cell: *mut Cell) {
    unsafe { (*cell).set_end() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_init_val_series(cell: *mut Cell, kind: u8, series: *mut Series) {
    let kind = Kind::from_u8(kind).unwrap_or(Kind::Block);
    unsafe {
        (*cell).init_series(kind, series, 0);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_init_val_index(cell: *mut Cell, index: usize) {
    unsafe { (*cell).set_index(index) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_set_handle_pointer(cell: *mut Cell, pointer: *mut c_void) {
    unsafe {
        (*cell).init_handle(pointer, 0);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_init_date(
    cell: *mut Cell,
    year: u16,
    month: u8,
    day: u8,
    seconds: i64,
    nano: i64,
    zone: i8,
) {
    let nanos = if seconds < 0 {
        reval_core::cell::NO_DATE_TIME
    } else {
        seconds * 1_000_000_000 + nano
    };
    unsafe {
        (*cell).init_date(year, month, day, zone, nanos);
    }
}

// =============================================================================
// Series makers and mutators
// =============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn reval_make_block(capacity: usize) -> *mut Series {
    let arr = make_array(capacity.max(1), MKS_NONE);
    manage_series(arr);
    arr
}

#[unsafe(no_mangle)]
pub extern "C" fn reval_make_string(capacity: usize, _unicode: bool) -> *mut Series {
    // All strings are UTF-8 byte series in this interpreter.
    let s = make_series(capacity.max(1), 1, MKS_NONE);
    manage_series(s);
    s
}

/// An image is a 4-byte-per-pixel series with its dimensions packed in
/// the node's misc word.
#[unsafe(no_mangle)]
pub extern "C" fn reval_make_image(width: u32, height: u32) -> *mut Series {
    let s = make_series(((width * height) as usize).max(1), 4, MKS_NONE);
    unsafe {
        (*s).misc = ((height as u64) << 32) | width as u64;
        (*s).set_len((width * height) as usize);
    }
    manage_series(s);
    s
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_image_wide(cell: *const Cell) -> u32 {
    unsafe { ((*(*cell).series()).misc & 0xFFFF_FFFF) as u32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_val_image_high(cell: *const Cell) -> u32 {
    unsafe { ((*(*cell).series()).misc >> 32) as u32 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_series_len(series: *mut Series) -> usize {
    unsafe { (*series).len() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_set_series_len(series: *mut Series, len: usize) {
    unsafe {
        let current = (*series).len();
        if len > current {
            if expand_series(series, current, len - current).is_err() {
                return;
            }
        } else {
            (*series).set_len(len);
            if (*series).is_array() {
                (*series).term_array();
            }
        }
    }
}

/// Code point at a string index, or -1 past the end.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_get_char(series: *mut Series, index: usize) -> c_int {
    unsafe {
        if index >= (*series).len() {
            return -1;
        }
        *(*series).at_raw(index) as c_int
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_set_char(series: *mut Series, index: usize, byte: u8) {
    unsafe {
        let len = (*series).len();
        if index >= len && expand_series(series, len, index - len + 1).is_err() {
            return;
        }
        *(*series).at_raw(index) = byte;
    }
}

/// UTF-8 length of a string series (always its byte length here).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_length_as_utf8(series: *mut Series) -> usize {
    unsafe { (*series).len() }
}

/// Copy a string series into a caller buffer, NUL-terminated, returning
/// the bytes written (not counting the NUL).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_encode_utf8(
    series: *mut Series,
    buffer: *mut u8,
    max: usize,
) -> usize {
    unsafe {
        let data = (*series).data_slice();
        let n = data.len().min(max.saturating_sub(1));
        core::ptr::copy_nonoverlapping(data.as_ptr(), buffer, n);
        *buffer.add(n) = 0;
        n
    }
}

// =============================================================================
// Frame introspection
// =============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_frm_num_args(frame: *mut Frame) -> usize {
    unsafe { (*frame).num_args }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_frm_arg(frame: *mut Frame, n: usize) -> *mut Cell {
    unsafe { (*frame).arg_at(n) }
}

// =============================================================================
// Word map
// =============================================================================

/// Intern a NUL-terminated spelling, returning its canonical symbol (an
/// opaque handle stable for the interpreter's lifetime).
///
/// # Safety
/// `utf8` must be a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_map_word(utf8: *const c_char) -> *mut c_void {
    let bytes = unsafe { core::ffi::CStr::from_ptr(utf8) }.to_bytes();
    match crate::scan::scan_word(bytes) {
        Some(spelling) => canon_of(spelling) as *mut c_void,
        None => core::ptr::null_mut(),
    }
}

/// Allocated UTF-8 copy of a symbol's spelling; the caller owns the
/// buffer and frees it with `free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_word_string(symbol: *mut c_void) -> *mut c_char {
    let spelling = spelling_bytes(symbol as *mut Series);
    unsafe {
        let buffer = libc::malloc(spelling.len() + 1) as *mut u8;
        if buffer.is_null() {
            return core::ptr::null_mut();
        }
        core::ptr::copy_nonoverlapping(spelling.as_ptr(), buffer, spelling.len());
        *buffer.add(spelling.len()) = 0;
        buffer as *mut c_char
    }
}

/// Find a symbol in an array of words, returning its 1-based index or 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_find_word(wordset: *mut Series, symbol: *mut c_void) -> usize {
    let canon = canon_of(symbol as *mut Series);
    unsafe {
        let len = (*wordset).len();
        for i in 0..len {
            let cell = &*(*wordset).array_at(i);
            if cell.kind().is_some_and(|k| k.is_word())
                && canon_of(cell.word_spelling()) == canon
            {
                return i + 1;
            }
        }
    }
    0
}

// =============================================================================
// Event queue
// =============================================================================

/// Append an event to the queue. Returns true if it was queued.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_event(event: *const Event) -> bool {
    let queue = &mut rt().events;
    if queue.len() >= 256 {
        return false;
    }
    queue.push(unsafe { *event });
    true
}

/// Update a queued event matching on type and model, or queue it fresh.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reval_update_event(event: *const Event) -> bool {
    let incoming = unsafe { *event };
    for queued in rt().events.iter_mut() {
        if queued.etype == incoming.etype && queued.model == incoming.model {
            *queued = incoming;
            return true;
        }
    }
    unsafe { reval_event(event) }
}

/// Find a queued event by type (and model unless `model` is negative).
#[unsafe(no_mangle)]
pub extern "C" fn reval_find_event(etype: u8, model: c_int) -> *mut Event {
    for queued in rt().events.iter_mut() {
        if queued.etype == etype && (model < 0 || queued.model == model as u8) {
            return queued as *mut Event;
        }
    }
    core::ptr::null_mut()
}
