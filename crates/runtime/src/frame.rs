//! Evaluator frames
//!
//! Each call in progress is a `Frame`: a stack-allocated record linked
//! through `prior` into a chain the collector can walk at any safe point.
//! A frame starts as a plain evaluation position (source array + index);
//! when a function is invoked it grows function state: the paramlist being
//! run, cursors for argument fulfillment, and an argument slab whose
//! location depends on the function's arity and durability:
//!
//! - arity 0: a shared END sentinel, the scratch `cell` stays free
//! - arity 1: the frame's own scratch `cell` is the argument
//! - arity n: a chunk of n cells on the chunk stack
//! - durable functions: a heap varlist, so the frame can be captured
//!
//! The `param` cursor doubles as the fulfillment state: while `param` has
//! not reached the paramlist's END, the frame is **fulfilling** (the
//! collector protects only the slots filled so far); past it, the frame is
//! **running** its dispatcher.

use crate::bind::Specifier;
use crate::context::{context_len, mark_context_inaccessible, var_at};
use crate::func::{frame_arity, func_is_durable, func_underlying};
use crate::interp::rt;
use reval_core::cell::{Cell, Kind};
use reval_core::series::{
    MKS_NONE, SERIES_FLAG_RUNNING, SERIES_FLAG_VARLIST, Series, append_cell, make_array,
    manage_series,
};
use reval_core::state::mem;
use reval_core::symbol::spelling_bytes;

// Frame flags
pub const DO_FLAG_TO_END: u32 = 1 << 0;
pub const DO_FLAG_NO_LOOKAHEAD: u32 = 1 << 1;
/// Dispatcher is native code relying on the frame's invariants: a reified
/// varlist must refuse outside mutation while set.
pub const DO_FLAG_NATIVE_HOLD: u32 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalType {
    /// Ordinary left-to-right dispatch.
    Normal,
    /// Enfix: the first argument is the prior expression's result.
    Lookback,
}

pub struct Frame {
    pub prior: *mut Frame,

    /// Caller-owned result cell. Must be valid for the frame's lifetime;
    /// enfix peeks rely on every expression landing here before lookahead.
    pub out: *mut Cell,

    /// Source feed.
    pub source: *mut Series,
    pub index: usize,
    pub value: *const Cell,
    pub specifier: Specifier,
    pub flags: u32,
    pub dsp_orig: usize,
    pub eval_type: EvalType,
    /// Index where the current expression started (error locations).
    pub expr_index: usize,

    // -- function invocation state (meaningful when `func` is non-null) --
    pub label: *mut Series,
    pub func: *mut Series,
    /// Paramlist at invocation (phase changes during adaptation leave this
    /// as the identity the frame was created for).
    pub original: *mut Series,
    pub binding: *mut Series,
    pub param: *mut Cell,
    pub arg: *mut Cell,
    pub special: *mut Cell,
    pub args_head: *mut Cell,
    pub num_args: usize,
    pub varlist: *mut Series,
    pub args_on_chunk: bool,
    /// Current refinement slot during fulfillment (revoked if its args
    /// turn out void).
    pub refine: *mut Cell,

    /// Scratch cell, collector-visible for the frame's whole lifetime.
    pub cell: Cell,
}

impl Frame {
    /// A frame positioned over `source` at `index`, not yet invoking.
    pub fn new_at(
        out: *mut Cell,
        source: *mut Series,
        index: usize,
        specifier: Specifier,
        flags: u32,
    ) -> Frame {
        Frame {
            prior: core::ptr::null_mut(),
            out,
            source,
            index,
            value: core::ptr::null(),
            specifier,
            flags,
            dsp_orig: mem().data_stack.dsp(),
            eval_type: EvalType::Normal,
            expr_index: index,
            label: core::ptr::null_mut(),
            func: core::ptr::null_mut(),
            original: core::ptr::null_mut(),
            binding: core::ptr::null_mut(),
            param: core::ptr::null_mut(),
            arg: core::ptr::null_mut(),
            special: core::ptr::null_mut(),
            args_head: core::ptr::null_mut(),
            num_args: 0,
            varlist: core::ptr::null_mut(),
            args_on_chunk: false,
            refine: core::ptr::null_mut(),
            cell: Cell::end(),
        }
    }

    /// Is this frame invoking a function (vs. plain array evaluation)?
    #[inline]
    pub fn is_function_frame(&self) -> bool {
        !self.func.is_null()
    }

    /// Fulfilling vs. running: the `param` cursor still points at a live
    /// key while arguments are being gathered.
    #[inline]
    pub fn is_fulfilling(&self) -> bool {
        !self.param.is_null() && !unsafe { (*self.param).is_end() }
    }

    #[inline]
    pub fn arg_at(&self, n: usize) -> *mut Cell {
        debug_assert!(n >= 1 && n <= self.num_args);
        unsafe { self.args_head.add(n - 1) }
    }
}

/// Link a frame onto the chain the collector walks.
#[inline]
pub fn push_frame(f: *mut Frame) {
    unsafe {
        (*f).prior = rt().frame_top;
    }
    rt().frame_top = f;
}

#[inline]
pub fn drop_frame(f: *mut Frame) {
    debug_assert_eq!(rt().frame_top, f);
    rt().frame_top = unsafe { (*f).prior };
}

// =============================================================================
// Argument slab allocation
// =============================================================================

/// Begin invoking `paramlist`: compute the underlying arity and allocate
/// the argument slab. Leaves `param`/`arg`/`special` cursors ready for
/// fulfillment.
pub fn begin_function(f: &mut Frame, paramlist: *mut Series, binding: *mut Series) {
    debug_assert!(f.func.is_null(), "frame already invoking");

    let underlying = func_underlying(paramlist);
    let arity = frame_arity(paramlist);

    f.func = paramlist;
    f.original = paramlist;
    f.binding = binding;
    f.num_args = arity;

    if func_is_durable(paramlist) {
        // Heap varlist from the start: the frame may be captured and must
        // be able to outlive the call.
        let varlist = make_array(arity + 1, MKS_NONE);
        unsafe {
            (*varlist).set_flag(SERIES_FLAG_VARLIST);
            (*varlist).link = underlying as u64;
            (*varlist).misc = f as *mut Frame as u64;
        }
        let mut archetype = Cell::zeroed();
        archetype.init_context(Kind::Frame, varlist);
        append_cell(varlist, &archetype);
        let mut blank = Cell::zeroed();
        blank.init_blank();
        for _ in 0..arity {
            append_cell(varlist, &blank);
        }
        manage_series(varlist);
        f.varlist = varlist;
        f.args_head = if arity == 0 {
            end_sentinel()
        } else {
            var_at(varlist, 1)
        };
        f.args_on_chunk = false;
    } else if arity == 0 {
        f.args_head = end_sentinel();
        f.args_on_chunk = false;
    } else if arity == 1 {
        // The scratch cell is spent as the single argument slot.
        f.cell = Cell::end();
        f.args_head = &mut f.cell;
        f.args_on_chunk = false;
    } else {
        f.args_head = mem().chunks.push_chunk(arity);
        f.args_on_chunk = true;
    }

    f.param = unsafe { (*underlying).array_at(1) };
    f.arg = f.args_head;
    f.special = core::ptr::null_mut();
    f.refine = core::ptr::null_mut();
}

/// Invocation is over: release the slab, unhook any reified context.
pub fn end_function(f: &mut Frame) {
    debug_assert!(f.is_function_frame());

    if !f.varlist.is_null() {
        unsafe {
            (*f.varlist).clear_flag(SERIES_FLAG_RUNNING);
        }
        if f.args_on_chunk {
            // The varlist was a late reification over chunk storage; that
            // storage is going away, so the context must refuse reads.
            mark_context_inaccessible(f.varlist);
        } else {
            // Durable: the varlist keeps the values; just unhook the live
            // frame pointer.
            unsafe {
                (*f.varlist).misc = 0;
            }
        }
    }

    if f.args_on_chunk {
        mem().chunks.pop_chunk();
    }

    f.func = core::ptr::null_mut();
    f.original = core::ptr::null_mut();
    f.param = core::ptr::null_mut();
    f.arg = core::ptr::null_mut();
    f.special = core::ptr::null_mut();
    f.args_head = core::ptr::null_mut();
    f.args_on_chunk = false;
    f.num_args = 0;
    f.varlist = core::ptr::null_mut();
    f.label = core::ptr::null_mut();
}

/// The shared END sentinel used as the empty argument slab.
fn end_sentinel() -> *mut Cell {
    &mut rt().end_cell
}

// =============================================================================
// Reification
// =============================================================================

/// Promote a live frame to a FRAME! context. For durable functions the
/// varlist already exists; for chunk-backed frames a full-size varlist is
/// created whose reads and writes are redirected to the live argument slab
/// through the `misc` back-pointer until the call ends.
pub fn reify_frame(f: &mut Frame) -> *mut Series {
    debug_assert!(f.is_function_frame());
    if !f.varlist.is_null() {
        return f.varlist;
    }

    let underlying = func_underlying(f.original);
    let arity = f.num_args;
    let varlist = make_array(arity + 1, MKS_NONE);
    unsafe {
        (*varlist).set_flag(SERIES_FLAG_VARLIST);
        (*varlist).link = underlying as u64;
        (*varlist).misc = f as *mut Frame as u64;
    }
    let mut archetype = Cell::zeroed();
    archetype.init_context(Kind::Frame, varlist);
    append_cell(varlist, &archetype);
    let mut blank = Cell::zeroed();
    blank.init_blank();
    for _ in 0..arity {
        append_cell(varlist, &blank);
    }
    manage_series(varlist);

    if f.flags & DO_FLAG_NATIVE_HOLD != 0 {
        unsafe {
            (*varlist).set_flag(SERIES_FLAG_RUNNING);
        }
    }

    f.varlist = varlist;
    varlist
}

// =============================================================================
// Rendering (error locations, trace)
// =============================================================================

/// A short "near" rendering of where a frame is in its source.
pub fn describe_frame(f: &Frame) -> String {
    let mut text = String::new();
    if !f.label.is_null() {
        text.push_str(&String::from_utf8_lossy(spelling_bytes(f.label)));
        text.push_str(": ");
    }
    if f.source.is_null() {
        text.push_str("(no source)");
        return text;
    }
    let len = unsafe { (*f.source).len() };
    let start = f.expr_index.min(len);
    let stop = (start + 4).min(len);
    let mut first = true;
    for i in start..stop {
        if !first {
            text.push(' ');
        }
        first = false;
        let cell = unsafe { &*(*f.source).array_at(i) };
        text.push_str(&crate::mold::mold_cell_limited(cell, 40));
    }
    if stop < len {
        text.push_str(" ...");
    }
    text
}

/// A managed block of the labels on the frame chain, innermost first.
pub fn frame_label_block() -> Option<*mut Series> {
    let mut f = rt().frame_top;
    if f.is_null() {
        return None;
    }
    let block = make_array(4, MKS_NONE);
    while !f.is_null() {
        unsafe {
            if !(*f).label.is_null() {
                let mut word = Cell::zeroed();
                word.init_word(Kind::Word, (*f).label);
                append_cell(block, &word);
            }
            f = (*f).prior;
        }
    }
    manage_series(block);
    Some(block)
}

/// FRAME! context length sanity shared by tests: a reified frame exposes
/// exactly the underlying arity.
pub fn frame_context_arity(varlist: *mut Series) -> usize {
    context_len(varlist)
}
