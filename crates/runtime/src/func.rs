//! Functions - paramlists, dispatchers, composition
//!
//! A function's identity is its **paramlist**: an array whose first cell is
//! the canonical FUNCTION! value ("archetype") and whose remaining cells
//! are typeset keys describing the parameters. The archetype's payload
//! carries the paramlist itself plus a singular **body holder** array; the
//! body holder's `misc` word is the dispatcher that runs when a frame for
//! the function has been fulfilled, and its one cell is whatever that
//! dispatcher needs:
//!
//! | dispatcher    | body holder cell                  |
//! |---------------|-----------------------------------|
//! | interpreted   | BLOCK! (relatively bound body)    |
//! | native        | BLANK! (the dispatcher is the native) |
//! | specializer   | FRAME! exemplar                   |
//! | adapter       | BLOCK! `[prelude adaptee]`        |
//! | chainer       | BLOCK! of functions, first is called with the args |
//! | hijacker      | FUNCTION! that took over          |
//! | routine/callback | HANDLE! to the routine info    |
//!
//! Composition never changes arity: the paramlist's `link` names the
//! **underlying** function whose parameters any caller must fulfill, so a
//! frame can be allocated without walking the composition chain.

use crate::bind::relativize_deep;
use crate::context::{ParamClass, TS_ANY, init_key, key_class};
use crate::error::{ErrorId, Raised, fail};
use crate::frame::Frame;
use reval_core::cell::{Cell, Kind};
use reval_core::series::{
    MKS_NONE, SERIES_FLAG_PARAMLIST, Series, append_cell, make_array, manage_series,
};
use reval_core::symbol::{intern, spelling_bytes};

/// Paramlist header flag: frames for this function allocate their varlist
/// in the heap so they can outlive the call (captured FRAME!s, closures).
pub const SERIES_FLAG_DURABLE: u64 = 1 << 16;

/// Dispatcher signature. The frame is fully fulfilled; the result goes to
/// `f.out` (with the THROWN flag for throws).
pub type Dispatcher = fn(&mut Frame) -> Result<(), Raised>;

// =============================================================================
// Accessors
// =============================================================================

#[inline]
pub fn func_archetype(paramlist: *mut Series) -> *mut Cell {
    unsafe {
        debug_assert!((*paramlist).get_flag(SERIES_FLAG_PARAMLIST));
        (*paramlist).array_at(0)
    }
}

#[inline]
pub fn func_body_holder(paramlist: *mut Series) -> *mut Series {
    unsafe { (*func_archetype(paramlist)).func_body() }
}

#[inline]
pub fn func_dispatcher(paramlist: *mut Series) -> Dispatcher {
    let holder = func_body_holder(paramlist);
    unsafe { core::mem::transmute::<usize, Dispatcher>((*holder).misc as usize) }
}

#[inline]
pub fn func_body_cell(paramlist: *mut Series) -> *mut Cell {
    unsafe { (*func_body_holder(paramlist)).array_at(0) }
}

/// The terminal function in the composition chain; its paramlist defines
/// the arity callers fulfill.
#[inline]
pub fn func_underlying(paramlist: *mut Series) -> *mut Series {
    unsafe { (*paramlist).link as *mut Series }
}

/// Parameter count (paramlist length without the archetype).
#[inline]
pub fn func_num_params(paramlist: *mut Series) -> usize {
    unsafe { (*paramlist).len() - 1 }
}

#[inline]
pub fn func_param(paramlist: *mut Series, n: usize) -> *mut Cell {
    debug_assert!(n >= 1 && n <= func_num_params(paramlist));
    unsafe { (*paramlist).array_at(n) }
}

#[inline]
pub fn func_is_durable(paramlist: *mut Series) -> bool {
    unsafe { (*paramlist).get_flag(SERIES_FLAG_DURABLE) }
}

// =============================================================================
// Construction
// =============================================================================

/// One parameter in a direct (native) spec.
pub struct ParamSpec {
    pub name: &'static str,
    pub class: ParamClass,
    pub types: u64,
}

impl ParamSpec {
    pub const fn normal(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            class: ParamClass::Normal,
            types: TS_ANY,
        }
    }

    pub const fn tight(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            class: ParamClass::Tight,
            types: TS_ANY,
        }
    }

    pub const fn hard_quote(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            class: ParamClass::HardQuote,
            types: TS_ANY,
        }
    }

    pub const fn refinement(name: &'static str) -> ParamSpec {
        ParamSpec {
            name,
            class: ParamClass::Refinement,
            types: TS_ANY,
        }
    }

    pub const fn typed(name: &'static str, types: u64) -> ParamSpec {
        ParamSpec {
            name,
            class: ParamClass::Normal,
            types,
        }
    }
}

/// Shorthand for a typeset bit.
pub const fn ts(kind: Kind) -> u64 {
    1 << kind as u64
}

/// Build a paramlist + body holder pair around `dispatcher`. The body
/// holder's cell is END until the caller fills it. Both arrays come back
/// managed: functions are values and values are collector-owned.
pub fn make_function_base(params: &[ParamSpec], dispatcher: Dispatcher) -> *mut Series {
    let paramlist = make_array(params.len() + 1, MKS_NONE);
    unsafe {
        (*paramlist).set_flag(SERIES_FLAG_PARAMLIST);
    }

    let holder = make_array(1, MKS_NONE);
    unsafe {
        (*holder).misc = dispatcher as usize as u64;
    }
    let mut body_slot = Cell::zeroed();
    body_slot.init_blank();
    append_cell(holder, &body_slot);

    let mut archetype = Cell::zeroed();
    archetype.init_function(paramlist, holder);
    append_cell(paramlist, &archetype);

    for spec in params {
        let mut key = Cell::zeroed();
        init_key(&mut key, intern(spec.name.as_bytes()), spec.types, spec.class);
        append_cell(paramlist, &key);
    }

    unsafe {
        (*paramlist).link = paramlist as u64; // its own underlying
    }
    manage_series(paramlist);
    manage_series(holder);
    paramlist
}

/// A native: the dispatcher is the native function itself; the body cell
/// stays blank.
pub fn make_native(params: &[ParamSpec], native: Dispatcher) -> *mut Series {
    let paramlist = make_function_base(params, native);
    unsafe {
        (*func_body_cell(paramlist)).init_blank();
    }
    paramlist
}

/// An interpreted function: parameters parsed from a spec block, body
/// copied and relatively bound to the new paramlist. Interpreted functions
/// are durable - their frames live in the heap and may be captured.
pub fn make_interpreted(
    spec: &Cell,
    body: &Cell,
    dispatcher: Dispatcher,
) -> Result<*mut Series, Raised> {
    debug_assert!(spec.is_kind(Kind::Block) && body.is_kind(Kind::Block));

    // First pass over the spec to count and classify parameters.
    struct Gathered {
        spelling: *mut Series,
        class: ParamClass,
    }
    let mut gathered: Vec<Gathered> = Vec::new();

    let spec_arr = spec.series();
    let mut i = spec.index();
    loop {
        let item = unsafe { &*(*spec_arr).array_at(i) };
        if item.is_end() {
            break;
        }
        i += 1;
        match item.kind() {
            Some(Kind::Word) => gathered.push(Gathered {
                spelling: item.word_spelling(),
                class: ParamClass::Normal,
            }),
            Some(Kind::GetWord) => gathered.push(Gathered {
                spelling: item.word_spelling(),
                class: ParamClass::HardQuote,
            }),
            Some(Kind::LitWord) => gathered.push(Gathered {
                spelling: item.word_spelling(),
                class: ParamClass::SoftQuote,
            }),
            Some(Kind::Refinement) => gathered.push(Gathered {
                spelling: item.word_spelling(),
                class: ParamClass::Refinement,
            }),
            Some(Kind::SetWord) => {
                // `return:` marks the definitional return slot; other
                // set-words are rejected.
                if spelling_bytes(reval_core::symbol::canon_of(item.word_spelling())) != b"return"
                {
                    return fail(ErrorId::InvalidArg, &["set-word in function spec"]);
                }
                gathered.push(Gathered {
                    spelling: item.word_spelling(),
                    class: ParamClass::Return,
                });
            }
            Some(Kind::String) => continue, // doc string
            Some(Kind::Block) => continue,  // type block for prior param
            Some(Kind::Tag) => continue,    // spec markers carry no parameter
            _ => return fail(ErrorId::InvalidArg, &["unrecognized function spec item"]),
        }
    }

    let paramlist = make_array(gathered.len() + 1, MKS_NONE);
    unsafe {
        (*paramlist).set_flag(SERIES_FLAG_PARAMLIST);
        (*paramlist).set_flag(SERIES_FLAG_DURABLE);
    }

    let holder = make_array(1, MKS_NONE);
    unsafe {
        (*holder).misc = dispatcher as usize as u64;
    }
    let mut body_slot = Cell::zeroed();
    body_slot.init_blank();
    append_cell(holder, &body_slot);

    let mut archetype = Cell::zeroed();
    archetype.init_function(paramlist, holder);
    append_cell(paramlist, &archetype);

    for g in &gathered {
        let mut key = Cell::zeroed();
        init_key(&mut key, g.spelling, TS_ANY, g.class);
        append_cell(paramlist, &key);
    }
    unsafe {
        (*paramlist).link = paramlist as u64;
    }

    // Deep-copy the body and rebind its words to the paramlist (relative
    // references, resolved per-frame by a specifier at call time).
    let body_copy = crate::bind::copy_array_deep(body.series(), body.index());
    relativize_deep(body_copy, paramlist);
    unsafe {
        let body_cell = func_body_cell(paramlist);
        (*body_cell).init_series(Kind::Block, body_copy, 0);
        (*body_cell).set_binding(paramlist);
        (*body_cell).set_flag(reval_core::cell::CELL_FLAG_RELATIVE);
    }

    manage_series(paramlist);
    manage_series(holder);
    manage_series(body_copy);
    Ok(paramlist)
}

/// Specialize: fix some of `base`'s arguments from `exemplar` (a FRAME!
/// context over the base function). Callers fulfill only what the exemplar
/// leaves void.
pub fn make_specialized(
    base: *mut Series,
    exemplar: *mut Series,
    dispatcher: Dispatcher,
) -> *mut Series {
    let num = func_num_params(base);
    let paramlist = make_array(num + 1, MKS_NONE);
    unsafe {
        (*paramlist).set_flag(SERIES_FLAG_PARAMLIST);
        if (*base).get_flag(SERIES_FLAG_DURABLE) {
            (*paramlist).set_flag(SERIES_FLAG_DURABLE);
        }
    }

    let holder = make_array(1, MKS_NONE);
    unsafe {
        (*holder).misc = dispatcher as usize as u64;
    }
    let mut body_slot = Cell::zeroed();
    body_slot.init_blank();
    append_cell(holder, &body_slot);

    let mut archetype = Cell::zeroed();
    archetype.init_function(paramlist, holder);
    append_cell(paramlist, &archetype);
    for n in 1..=num {
        let key = unsafe { *func_param(base, n) };
        append_cell(paramlist, &key);
    }
    unsafe {
        (*paramlist).link = func_underlying(base) as u64;
        (*func_body_cell(paramlist)).init_context(Kind::Frame, exemplar);
    }
    // Slot one is the specializee the dispatcher delegates to.
    let delegate = unsafe { *func_archetype(base) };
    append_cell(holder, &delegate);
    manage_series(paramlist);
    manage_series(holder);
    paramlist
}

/// Adapt: run a prelude block before delegating to `adaptee` with the same
/// frame.
pub fn make_adapted(
    adaptee: *mut Series,
    prelude: *mut Series,
    dispatcher: Dispatcher,
) -> *mut Series {
    let num = func_num_params(adaptee);
    let paramlist = make_array(num + 1, MKS_NONE);
    unsafe {
        (*paramlist).set_flag(SERIES_FLAG_PARAMLIST);
        if (*adaptee).get_flag(SERIES_FLAG_DURABLE) {
            (*paramlist).set_flag(SERIES_FLAG_DURABLE);
        }
    }
    let holder = make_array(2, MKS_NONE);
    unsafe {
        (*holder).misc = dispatcher as usize as u64;
    }

    let mut archetype = Cell::zeroed();
    archetype.init_function(paramlist, holder);
    append_cell(paramlist, &archetype);
    for n in 1..=num {
        let key = unsafe { *func_param(adaptee, n) };
        append_cell(paramlist, &key);
    }
    unsafe {
        (*paramlist).link = func_underlying(adaptee) as u64;
    }

    // Prelude gets relatively bound so it sees the frame's arguments.
    relativize_deep(prelude, paramlist);
    let mut cell = Cell::zeroed();
    cell.init_series(Kind::Block, prelude, 0);
    cell.set_binding(paramlist);
    cell.set_flag(reval_core::cell::CELL_FLAG_RELATIVE);
    append_cell(holder, &cell);
    let adaptee_cell = unsafe { *func_archetype(adaptee) };
    append_cell(holder, &adaptee_cell);

    manage_series(paramlist);
    manage_series(holder);
    paramlist
}

/// Chain: run `first` with the frame's arguments, then pipe the result
/// through each of the rest (arity-1 calls).
pub fn make_chained(pipeline: *mut Series, dispatcher: Dispatcher) -> *mut Series {
    let first = unsafe { &*(*pipeline).array_at(0) };
    debug_assert!(first.is_kind(Kind::Function));
    let base = first.func_paramlist();

    let num = func_num_params(base);
    let paramlist = make_array(num + 1, MKS_NONE);
    unsafe {
        (*paramlist).set_flag(SERIES_FLAG_PARAMLIST);
        if (*base).get_flag(SERIES_FLAG_DURABLE) {
            (*paramlist).set_flag(SERIES_FLAG_DURABLE);
        }
    }
    let holder = make_array(1, MKS_NONE);
    unsafe {
        (*holder).misc = dispatcher as usize as u64;
    }
    let mut body_slot = Cell::zeroed();
    body_slot.init_blank();
    append_cell(holder, &body_slot);

    let mut archetype = Cell::zeroed();
    archetype.init_function(paramlist, holder);
    append_cell(paramlist, &archetype);
    for n in 1..=num {
        let key = unsafe { *func_param(base, n) };
        append_cell(paramlist, &key);
    }
    unsafe {
        (*paramlist).link = func_underlying(base) as u64;
        (*func_body_cell(paramlist)).init_series(Kind::Block, pipeline, 0);
    }
    manage_series(paramlist);
    manage_series(holder);
    paramlist
}

/// Hijack: `victim` takes on `usurper`'s behavior in place. Every existing
/// reference to the victim now runs the usurper. The facades must agree,
/// or frames built for old references would misfit.
pub fn hijack(victim: *mut Series, usurper: *mut Series) -> Result<(), Raised> {
    if func_num_params(victim) != func_num_params(usurper) {
        return fail(ErrorId::InvalidArg, &["hijack facade mismatch"]);
    }
    let v_holder = func_body_holder(victim);
    let u_holder = func_body_holder(usurper);
    unsafe {
        (*v_holder).misc = (*u_holder).misc;
        let src = (*u_holder).array_at(0);
        *(*v_holder).array_at(0) = *src;
        (*victim).link = (*usurper).link;
    }
    Ok(())
}

/// Count of parameters the underlying function demands; this is the frame
/// arity regardless of composition depth.
#[inline]
pub fn frame_arity(paramlist: *mut Series) -> usize {
    func_num_params(func_underlying(paramlist))
}

/// Walk parameters of the underlying function in fulfillment order.
pub fn for_each_param(paramlist: *mut Series, mut f: impl FnMut(usize, &Cell, ParamClass)) {
    let underlying = func_underlying(paramlist);
    for n in 1..=func_num_params(underlying) {
        let key = unsafe { &*func_param(underlying, n) };
        f(n, key, key_class(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RuntimeGuard;

    fn noop(_f: &mut Frame) -> Result<(), Raised> {
        Ok(())
    }

    #[test]
    fn native_paramlist_shape() {
        let _rt = RuntimeGuard::new();
        let pl = make_native(
            &[ParamSpec::normal("value"), ParamSpec::refinement("only")],
            noop,
        );
        assert_eq!(func_num_params(pl), 2);
        assert_eq!(frame_arity(pl), 2);
        assert_eq!(func_underlying(pl), pl);
        let arch = unsafe { &*func_archetype(pl) };
        assert!(arch.is_kind(Kind::Function));
        assert_eq!(arch.func_paramlist(), pl);
        assert_eq!(key_class(unsafe { &*func_param(pl, 2) }), ParamClass::Refinement);
    }

    #[test]
    fn dispatcher_round_trips_through_misc() {
        let _rt = RuntimeGuard::new();
        let pl = make_native(&[], noop);
        let d = func_dispatcher(pl);
        assert_eq!(d as usize, noop as usize);
    }
}
