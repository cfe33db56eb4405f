//! Interpreter state
//!
//! Everything evaluation-global lives here, one instance per thread, set up
//! by `init_core` and reached through `rt()`. The same single-threaded
//! contract as the core state applies: no locks, sole ownership, short-
//! lived access.

use crate::frame::Frame;
use reval_core::cell::Cell;
use reval_core::series::Series;
use std::cell::Cell as RawCell;

/// HALT signal bit (SIGINT / escape): checked between evaluation steps.
pub const SIG_HALT: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Text,
    Utf16Le,
    Utf16Be,
    Image,
}

pub struct CodecEntry {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub kind: CodecKind,
}

/// Device-integration event, exchanged through the embedding API's queue.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub etype: u8,
    pub flags: u8,
    pub win: u8,
    pub model: u8,
    pub data: i32,
}

pub struct Interp {
    /// Top of the frame chain (most recent call); the collector walks it.
    pub frame_top: *mut Frame,

    /// The library context natives are bound into.
    pub lib: *mut Series,

    /// Pinned root cells (interpreter globals the collector always marks).
    pub root_array: *mut Series,

    /// Process-wide stash for an in-flight throw's payload. The throw's
    /// label travels in the out cell with the THROWN flag; this holds the
    /// value being thrown. Unreadable when no throw is in flight.
    pub thrown_stash: Cell,
    pub thrown_alive: bool,

    /// Shared END sentinel aliased as the zero-arity argument slab.
    pub end_cell: Cell,

    /// Shared empty array used as the feed of frames with no source.
    pub empty_array: *mut Series,

    /// Signal bits delivered asynchronously, tested between steps.
    pub signals: u32,

    /// Errors raised inside an FFI callback are parked here instead of
    /// unwinding through foreign frames; the routine caller checks after
    /// the foreign call returns.
    pub callback_error: *mut Series,

    pub codecs: Vec<CodecEntry>,
    pub events: Vec<Event>,

    /// Nesting depth of `do` for reentrancy diagnostics.
    pub do_depth: usize,

    /// Per-step evaluation trace (the embedder's trace toggle).
    pub trace_on: bool,
}

impl Interp {
    pub(crate) fn new() -> Box<Interp> {
        Box::new(Interp {
            frame_top: core::ptr::null_mut(),
            lib: core::ptr::null_mut(),
            root_array: core::ptr::null_mut(),
            thrown_stash: Cell::end(),
            thrown_alive: false,
            end_cell: Cell::end(),
            empty_array: core::ptr::null_mut(),
            signals: 0,
            callback_error: core::ptr::null_mut(),
            codecs: Vec::new(),
            events: Vec::with_capacity(64),
            do_depth: 0,
            trace_on: false,
        })
    }
}

thread_local! {
    static INTERP: RawCell<*mut Interp> = const { RawCell::new(core::ptr::null_mut()) };
}

pub(crate) fn install_interp() {
    INTERP.with(|s| {
        assert!(s.get().is_null(), "interpreter initialized twice");
        s.set(Box::into_raw(Interp::new()));
    });
}

pub(crate) fn uninstall_interp() {
    let ptr = INTERP.with(|s| s.replace(core::ptr::null_mut()));
    assert!(!ptr.is_null(), "interpreter shutdown without init");
    drop(unsafe { Box::from_raw(ptr) });
}

pub fn interp_initialized() -> bool {
    INTERP.with(|s| !s.get().is_null())
}

/// The interpreter state handle. Same discipline as `reval_core::mem()`.
#[inline]
pub fn rt() -> &'static mut Interp {
    let ptr = INTERP.with(|s| s.get());
    debug_assert!(!ptr.is_null(), "interpreter used before init");
    unsafe { &mut *ptr }
}

/// Set the HALT signal. Must run on the interpreter thread; asynchronous
/// delivery (SIGINT, embedder escape) goes through `signal::request_halt`,
/// which any thread may call.
pub fn set_halt_signal() {
    rt().signals |= SIG_HALT;
}
