//! Per-thread core state
//!
//! The interpreter is single-threaded cooperative: pools, the manuals list,
//! the guard stacks, the interner, and both value stacks are owned by one
//! thread and accessed without locks. Each OS thread that initializes the
//! core gets its own state; a thread hosts at most one interpreter.
//!
//! `mem()` hands out the state handle. It is a raw-pointer deref behind a
//! thread-local; callers must not hold the reference across a call that
//! could re-enter state access (the usual discipline for interpreter
//! globals).

use crate::cell::Cell;
use crate::pool::Pools;
use crate::series::Series;
use crate::stack::{ChunkStack, DataStack};
use crate::symbol::SymbolTable;
use std::cell::Cell as RawCell;

/// Bytes of allocation between forced recycle signals.
pub const BALLAST_DEFAULT: isize = 3_000_000;

/// How many recently-expanded series the doubling heuristic remembers.
const PRIOR_EXPAND_SLOTS: usize = 8;

pub struct CoreState {
    pub pools: Pools,
    pub symbols: SymbolTable,

    /// Series not yet handed to the collector. A trap unwind truncates this
    /// to its recorded length, freeing everything allocated since.
    pub manuals: Vec<*mut Series>,

    /// Explicitly pinned roots: series and cells the collector must treat
    /// as live regardless of reachability.
    pub guarded_series: Vec<*mut Series>,
    pub guarded_cells: Vec<*const Cell>,

    pub data_stack: DataStack,
    pub chunks: ChunkStack,

    /// Shared scratch for scanning and molding, push/pop nested.
    pub mold_buf: Vec<u8>,

    /// Allocation countdown; crossing zero sets `sig_recycle`.
    pub ballast: isize,
    pub ballast_reset: isize,
    pub sig_recycle: bool,

    /// MRU table of series that reallocated recently (doubling heuristic).
    prior_expand: [*mut Series; PRIOR_EXPAND_SLOTS],
    prior_expand_next: usize,
}

impl CoreState {
    fn new() -> Box<CoreState> {
        Box::new(CoreState {
            pools: Pools::new(),
            symbols: SymbolTable::new(),
            manuals: Vec::with_capacity(256),
            guarded_series: Vec::with_capacity(64),
            guarded_cells: Vec::with_capacity(64),
            data_stack: DataStack::unbooted(),
            chunks: ChunkStack::new(),
            mold_buf: Vec::with_capacity(1024),
            ballast: BALLAST_DEFAULT,
            ballast_reset: BALLAST_DEFAULT,
            sig_recycle: false,
            prior_expand: [core::ptr::null_mut(); PRIOR_EXPAND_SLOTS],
            prior_expand_next: 0,
        })
    }

    /// Charge `bytes` against the ballast; crossing zero requests a recycle
    /// at the next safe point.
    #[inline]
    pub fn take_ballast(&mut self, bytes: isize) {
        self.ballast -= bytes;
        if self.ballast < 0 && !self.sig_recycle {
            self.sig_recycle = true;
            tracing::trace!("ballast exhausted, recycle requested");
        }
    }

    /// Record that `series` reallocated; returns true if it was already in
    /// the MRU window (so growth should double).
    pub fn note_expansion(&mut self, series: *mut Series) -> bool {
        if self.prior_expand.contains(&series) {
            return true;
        }
        self.prior_expand[self.prior_expand_next] = series;
        self.prior_expand_next = (self.prior_expand_next + 1) % PRIOR_EXPAND_SLOTS;
        false
    }

    /// Forget a series pointer in collector-adjacent caches. Called when a
    /// node is killed so a recycled node address cannot alias the heuristic.
    pub fn forget_series(&mut self, series: *mut Series) {
        for slot in self.prior_expand.iter_mut() {
            if *slot == series {
                *slot = core::ptr::null_mut();
            }
        }
    }
}

thread_local! {
    static STATE: RawCell<*mut CoreState> = const { RawCell::new(core::ptr::null_mut()) };
}

/// Bring up the core state for this thread. Must precede any series or
/// symbol traffic; the runtime's `init_core` calls it first.
pub fn init_core_state() {
    STATE.with(|s| {
        assert!(s.get().is_null(), "core state initialized twice");
        s.set(Box::into_raw(CoreState::new()));
    });
    // The data stack's backing array needs the state installed first.
    mem().data_stack.bootstrap();
}

pub fn core_state_initialized() -> bool {
    STATE.with(|s| !s.get().is_null())
}

/// Tear down this thread's core state. Returns the number of series still
/// on the manuals list (leaks, unless shutdown was unclean on purpose).
pub fn shutdown_core_state() -> usize {
    let ptr = STATE.with(|s| s.get());
    assert!(!ptr.is_null(), "core state shutdown without init");
    let leaked = unsafe { (*ptr).manuals.len() };

    // Chunkers release first (they are tracked allocations); then the pool
    // segments go wholesale, taking every series node - the data stack's
    // backing array included - with them.
    mem().chunks.shutdown();
    mem().pools.shutdown();

    STATE.with(|s| s.set(core::ptr::null_mut()));
    drop(unsafe { Box::from_raw(ptr) });
    leaked
}

/// The state handle. Single-threaded access contract: do not hold the
/// returned reference across calls that may themselves take the handle.
#[inline]
pub fn mem() -> &'static mut CoreState {
    let ptr = STATE.with(|s| s.get());
    debug_assert!(!ptr.is_null(), "core state used before init");
    unsafe { &mut *ptr }
}

// =============================================================================
// Guards
// =============================================================================

/// Pin a series against collection until the matching drop.
pub fn push_guard_series(s: *mut Series) {
    mem().guarded_series.push(s);
}

pub fn drop_guard_series(s: *mut Series) {
    let guards = &mut mem().guarded_series;
    let top = guards.pop().expect("guard stack underflow");
    debug_assert_eq!(top, s, "guards must drop in LIFO order");
    let _ = top;
}

/// Pin a cell (e.g. an api handle or a stack temporary) as a root.
pub fn push_guard_cell(c: *const Cell) {
    mem().guarded_cells.push(c);
}

pub fn drop_guard_cell(c: *const Cell) {
    let guards = &mut mem().guarded_cells;
    let top = guards.pop().expect("guard stack underflow");
    debug_assert_eq!(top, c, "guards must drop in LIFO order");
    let _ = top;
}

// =============================================================================
// Test support
// =============================================================================

/// RAII bring-up for tests: initializes this thread's core state if it is
/// not already up, and tears it down again only if this guard did the
/// bring-up. Lets tests on the same runner thread nest and sequence freely.
pub struct CoreGuard {
    owner: bool,
}

impl CoreGuard {
    pub fn new() -> CoreGuard {
        if core_state_initialized() {
            CoreGuard { owner: false }
        } else {
            init_core_state();
            CoreGuard { owner: true }
        }
    }
}

impl Default for CoreGuard {
    fn default() -> Self {
        CoreGuard::new()
    }
}

impl Drop for CoreGuard {
    fn drop(&mut self) {
        if self.owner {
            shutdown_core_state();
        }
    }
}
