//! Reval Core: memory machinery for a homoiconic interpreter
//!
//! This crate provides the value-independent substrate the evaluator is
//! built on: the uniform 32-byte cell, pooled allocation of series nodes
//! and their payloads, the case-folding symbol interner, and the two value
//! stacks (data stack and chunk stack).
//!
//! Key design principles:
//! - Cell: a fixed-size tagged union every value fits in
//! - Series: growable sequences referenced through pool-allocated nodes
//! - Pools: size-classed slabs so the interpreter knows what it holds
//! - One thread, one interpreter: all state is thread-local, lock-free
//!
//! # Modules
//!
//! - `cell`: kind tags, header flags, payload accessors
//! - `pool`: size-classed segment/freelist allocators and accounting
//! - `series`: series nodes, expansion with bias, manuals lifecycle
//! - `symbol`: interned spellings with canon/synonym chains
//! - `stack`: data stack and chunk stack
//! - `mold`: the shared UTF-8 scratch buffer
//! - `state`: per-thread state handle, guards, ballast

pub mod cell;
pub mod mold;
pub mod pool;
pub mod series;
pub mod stack;
pub mod state;
pub mod symbol;

// Re-export key types and functions
pub use cell::{Cell, Kind};
pub use pool::{PoolStats, Pools};
pub use series::{
    Series, SeriesError, append_cell, expand_series, free_series, make_array, make_series,
    manage_series, remake_series, shrink_head,
};
pub use state::{
    CoreGuard, CoreState, core_state_initialized, drop_guard_cell, drop_guard_series,
    init_core_state, mem, push_guard_cell, push_guard_series, shutdown_core_state,
};
pub use symbol::{canon_of, case_fold, intern, same_word, spelling_bytes};
