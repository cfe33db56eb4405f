//! The evaluator
//!
//! `do_core` drives a frame across its source array one expression at a
//! time. Each expression lands in the frame's `out` cell *before* the
//! lookahead step peeks at what follows - that discipline is what makes
//! enfix possible, since a lookback function's first argument is whatever
//! `out` holds when its word is seen.
//!
//! Function invocation pushes a child frame, allocates the argument slab
//! (see `frame.rs`), fulfills parameters in order - consuming the parent's
//! feed for evaluated classes, taking literals for quoting classes,
//! copying exemplar slots for specializations - typechecks, and hands the
//! frame to the function's dispatcher.
//!
//! Throws travel in-band: the out cell gets the THROWN flag and carries
//! the throw's label, while the payload sits in the interpreter's stash
//! until a CATCH (or the dispatcher that owns the label) takes it.

use crate::bind::{Specifier, derelativize, derive_specifier, get_var, set_var};
use crate::context::{ParamClass, key_class};
use crate::error::{ErrorId, Raised, fail};
use crate::frame::{
    DO_FLAG_NO_LOOKAHEAD, DO_FLAG_TO_END, EvalType, Frame, begin_function, drop_frame,
    end_function, push_frame,
};
use crate::func::{func_body_cell, func_body_holder, func_dispatcher};
use crate::interp::rt;
use reval_core::cell::{
    CELL_FLAG_THROWN, Cell, Kind, WORD_FLAG_ENFIXED,
};
use reval_core::series::{SERIES_FLAG_RUNNING, Series};
use reval_core::state::mem;
use reval_core::symbol::{canon_of, spelling_bytes};

// =============================================================================
// Throw protocol
// =============================================================================

#[inline]
pub fn is_thrown(cell: &Cell) -> bool {
    cell.get_flag(CELL_FLAG_THROWN)
}

/// Arm a throw: `out` carries the label with the THROWN flag, the payload
/// goes to the process-wide stash.
pub fn init_thrown(out: &mut Cell, label: &Cell, payload: &Cell) {
    let interp = rt();
    debug_assert!(!interp.thrown_alive, "throw while a throw is in flight");
    interp.thrown_stash = *payload;
    interp.thrown_alive = true;
    *out = *label;
    out.set_flag(CELL_FLAG_THROWN);
}

/// Catch a throw: clear the flag on `label_out` and move the stashed
/// payload into it. The stash returns to unreadable.
pub fn take_thrown(label_out: &mut Cell) -> Cell {
    let interp = rt();
    debug_assert!(interp.thrown_alive, "no throw in flight");
    label_out.clear_flag(CELL_FLAG_THROWN);
    let payload = interp.thrown_stash;
    interp.thrown_stash = Cell::end();
    interp.thrown_alive = false;
    payload
}

// =============================================================================
// Signals
// =============================================================================

/// Between-step poll: deliver HALT, run a requested recycle.
fn check_signals() -> Result<(), Raised> {
    if crate::signal::take_halt() {
        return fail(ErrorId::Halt, &[]);
    }
    if mem().sig_recycle {
        crate::gc::recycle();
    }
    Ok(())
}

// =============================================================================
// Entry points
// =============================================================================

/// Evaluate `array` from `index` to its end; the final expression's value
/// is left in `out` (END if the array held nothing but barriers).
pub fn do_array_full(
    out: *mut Cell,
    array: *mut Series,
    index: usize,
    specifier: Specifier,
) -> Result<(), Raised> {
    unsafe { (*out).set_end() };
    let mut f = Frame::new_at(out, array, index, specifier, DO_FLAG_TO_END);
    push_frame(&mut f);
    let result = do_core(&mut f);
    drop_frame(&mut f);
    result
}

/// Evaluate a single expression starting at `*index`, advancing it past
/// the consumed input. Errors if the position is already at the end.
pub fn eval_next(
    out: *mut Cell,
    array: *mut Series,
    index: &mut usize,
    specifier: Specifier,
    flags: u32,
) -> Result<(), Raised> {
    unsafe { (*out).set_end() };
    let mut f = Frame::new_at(out, array, *index, specifier, flags);
    push_frame(&mut f);
    let result = do_core(&mut f);
    *index = f.index;
    drop_frame(&mut f);
    result
}

/// Evaluate an ANY-ARRAY! value (block/group) to completion.
pub fn do_any_array(out: *mut Cell, value: &Cell, specifier: Specifier) -> Result<(), Raised> {
    debug_assert!(value.kind().is_some_and(|k| k.is_array()));
    let spec = derive_specifier(value, specifier);
    do_array_full(out, value.series(), value.index(), spec)
}

// =============================================================================
// The core loop
// =============================================================================

pub fn do_core(f: &mut Frame) -> Result<(), Raised> {
    loop {
        check_signals()?;

        let value = unsafe { (*f.source).array_at(f.index) };
        if unsafe { (*value).is_end() } {
            break;
        }

        f.expr_index = f.index;
        if rt().trace_on {
            tracing::trace!(
                index = f.index,
                value = %crate::mold::mold_cell_limited(unsafe { &*value }, 50),
                "eval step"
            );
        }

        eval_step(f)?;

        if is_thrown(unsafe { &*f.out }) {
            break;
        }
        if f.flags & DO_FLAG_TO_END == 0 {
            break;
        }
    }
    Ok(())
}

/// One full expression: primary value plus any enfix continuation.
fn eval_step(f: &mut Frame) -> Result<(), Raised> {
    let value_ptr = unsafe { (*f.source).array_at(f.index) };
    let value = unsafe { *value_ptr };
    f.index += 1;
    f.value = value_ptr;

    match value.kind_checked() {
        // Expression barrier: evaluates to nothing.
        Kind::Bar => {
            unsafe { (*f.out).set_end() };
            return Ok(());
        }
        Kind::LitBar => unsafe {
            (*f.out).init_bar();
        },

        Kind::Word => {
            let slot = get_var(&value, f.specifier)?;
            let gotten = unsafe { *slot };
            if gotten.is_end() {
                return fail(ErrorId::NoValue, &[&word_name(&value)]);
            }
            if gotten.is_kind(Kind::Function) {
                if gotten.get_flag(WORD_FLAG_ENFIXED) {
                    // An enfix function's word evaluated at the start of an
                    // expression has no left operand to consume.
                    return fail(ErrorId::NoValue, &[&word_name(&value)]);
                }
                invoke(f, &gotten, value.word_spelling(), false, &[])?;
            } else {
                unsafe { *f.out = gotten };
            }
        }

        Kind::SetWord => {
            if at_feed_end(f) {
                return fail(ErrorId::NoValue, &[&word_name(&value)]);
            }
            eval_next(f.out, f.source, &mut f.index, f.specifier, 0)?;
            if is_thrown(unsafe { &*f.out }) {
                return Ok(());
            }
            if unsafe { (*f.out).is_end() } {
                return fail(ErrorId::NoValue, &[&word_name(&value)]);
            }
            set_var(&value, f.specifier, unsafe { &*f.out })?;
        }

        Kind::GetWord => {
            let slot = get_var(&value, f.specifier)?;
            unsafe { *f.out = *slot };
        }

        Kind::LitWord => {
            let mut word = derelativize(&value, f.specifier);
            word.header = (word.header & !reval_core::cell::KIND_BYTE_MASK) | Kind::Word as u64;
            unsafe { *f.out = word };
        }

        Kind::Group => {
            let spec = derive_specifier(&value, f.specifier);
            do_array_full(f.out, value.series(), value.index(), spec)?;
        }

        Kind::Path => {
            crate::path::eval_path(f, &value)?;
        }
        Kind::SetPath => {
            crate::path::eval_set_path(f, &value)?;
        }
        Kind::GetPath => {
            crate::path::eval_get_path(f, &value)?;
        }
        Kind::LitPath => {
            let mut path = derelativize(&value, f.specifier);
            path.header = (path.header & !reval_core::cell::KIND_BYTE_MASK) | Kind::Path as u64;
            unsafe { *f.out = path };
        }

        Kind::Function => {
            invoke(f, &value, core::ptr::null_mut(), false, &[])?;
        }

        // Everything else is inert: the value is its own result.
        _ => {
            let specific = derelativize(&value, f.specifier);
            unsafe { *f.out = specific };
        }
    }

    if is_thrown(unsafe { &*f.out }) {
        return Ok(());
    }

    lookahead(f)
}

/// After a primary value, consume any chain of enfix functions whose words
/// follow it; each takes the current `out` as its left argument.
fn lookahead(f: &mut Frame) -> Result<(), Raised> {
    loop {
        if f.flags & DO_FLAG_NO_LOOKAHEAD != 0 {
            return Ok(());
        }
        let next = unsafe { (*f.source).array_at(f.index) };
        let peeked = unsafe { *next };
        if peeked.is_end() || !peeked.is_kind(Kind::Word) {
            return Ok(());
        }
        // A word that doesn't resolve isn't our problem here; it will get
        // its not-bound error when evaluated in its own right.
        let Ok(slot) = get_var(&peeked, f.specifier) else {
            return Ok(());
        };
        let gotten = unsafe { *slot };
        if !gotten.is_kind(Kind::Function) || !gotten.get_flag(WORD_FLAG_ENFIXED) {
            return Ok(());
        }

        f.index += 1;
        invoke(f, &gotten, peeked.word_spelling(), true, &[])?;
        if is_thrown(unsafe { &*f.out }) {
            return Ok(());
        }
    }
}

fn word_name(word: &Cell) -> String {
    String::from_utf8_lossy(spelling_bytes(word.word_spelling())).into_owned()
}

#[inline]
fn at_feed_end(f: &Frame) -> bool {
    unsafe { (*(*f.source).array_at(f.index)).is_end() }
}

// =============================================================================
// Invocation
// =============================================================================

/// Invoke a function value. `lookback` feeds the caller's `out` as the
/// first argument; `refinements` are canon spellings demanded by a path
/// invocation.
pub fn invoke(
    f: &mut Frame,
    fn_cell: &Cell,
    label: *mut Series,
    lookback: bool,
    refinements: &[*mut Series],
) -> Result<(), Raised> {
    debug_assert!(fn_cell.is_kind(Kind::Function));
    let paramlist = fn_cell.func_paramlist();

    let mut child = Frame::new_at(f.out, f.source, f.index, f.specifier, f.flags);
    child.label = label;
    child.eval_type = if lookback {
        EvalType::Lookback
    } else {
        EvalType::Normal
    };
    push_frame(&mut child);
    begin_function(&mut child, paramlist, fn_cell.binding());

    // A throw during fulfillment abandons the call without dispatching.
    let result = fulfill_arguments(&mut child, lookback, refinements).and_then(|complete| {
        if complete {
            dispatch(&mut child)
        } else {
            Ok(())
        }
    });

    end_function(&mut child);
    f.index = child.index;
    drop_frame(&mut child);
    result
}

/// Resolve the specialization exemplar for a (possibly composed) function:
/// the outermost specializer in the phase chain wins. Composition layers
/// all share one underlying, so indexes line up across the walk.
fn find_exemplar(paramlist: *mut Series) -> *mut Series {
    let mut phase = paramlist;
    loop {
        let dispatcher = func_dispatcher(phase);
        if dispatcher as usize == dispatch_specializer as usize {
            let body = unsafe { &*func_body_cell(phase) };
            return body.context_varlist();
        }
        match next_phase(phase) {
            Some(p) => phase = p,
            None => return core::ptr::null_mut(),
        }
    }
}

/// The function a composition layer delegates to, if any.
fn next_phase(paramlist: *mut Series) -> Option<*mut Series> {
    let dispatcher = func_dispatcher(paramlist);
    let holder = func_body_holder(paramlist);
    if dispatcher as usize == dispatch_specializer as usize
        || dispatcher as usize == dispatch_adapter as usize
    {
        let delegate = unsafe { &*(*holder).array_at(1) };
        if delegate.is_kind(Kind::Function) {
            return Some(delegate.func_paramlist());
        }
    }
    None
}

/// Returns false when a throw inside an argument expression abandoned the
/// call (the thrown label is in `f.out`).
fn fulfill_arguments(
    f: &mut Frame,
    lookback: bool,
    refinements: &[*mut Series],
) -> Result<bool, Raised> {
    let exemplar = find_exemplar(f.func);
    if !exemplar.is_null() {
        f.special = crate::context::var_at(exemplar, 1);
    }

    let mut requested: Vec<(*mut Series, bool)> =
        refinements.iter().map(|&c| (c, false)).collect();

    let mut refine_active = true;
    let mut left_consumed = !lookback;

    loop {
        let key = unsafe { &*f.param };
        if key.is_end() {
            break;
        }
        let class = key_class(key);
        let slot = f.arg;

        // Specialization exemplar: concrete slots fill without consuming
        // any input.
        let special_value = if f.special.is_null() {
            None
        } else {
            let sp = unsafe { *f.special };
            if sp.is_end() { None } else { Some(sp) }
        };

        match class {
            ParamClass::Local | ParamClass::Return => unsafe {
                (*slot).init_blank();
            },

            ParamClass::Refinement => {
                if let Some(sp) = special_value {
                    unsafe { *slot = sp };
                    refine_active = unsafe { !(*slot).is_kind(Kind::Blank) };
                } else {
                    let canon = canon_of(key.key_spelling());
                    let mut found = false;
                    for (req, used) in requested.iter_mut() {
                        if *req == canon {
                            *used = true;
                            found = true;
                            break;
                        }
                    }
                    unsafe {
                        if found {
                            (*slot).init_logic(true);
                        } else {
                            (*slot).init_blank();
                        }
                    }
                    refine_active = found;
                }
            }

            ParamClass::Normal
            | ParamClass::Tight
            | ParamClass::HardQuote
            | ParamClass::SoftQuote => {
                if let Some(sp) = special_value {
                    unsafe { *slot = sp };
                } else if !refine_active {
                    // Argument of an unused refinement.
                    unsafe { (*slot).init_blank() };
                } else if !left_consumed {
                    // Lookback: the first ordinary argument is the prior
                    // expression's result, already in out.
                    left_consumed = true;
                    let left = unsafe { *f.out };
                    if left.is_end() {
                        return fail(ErrorId::NoValue, &[&key_name(key)]);
                    }
                    unsafe { *slot = left };
                } else {
                    fulfill_from_feed(f, slot, class, key)?;
                    if is_thrown(unsafe { &*f.out }) {
                        return Ok(false);
                    }
                }

                // Typecheck what landed.
                let got = unsafe { &*slot };
                if got.is_end() {
                    return fail(ErrorId::NoValue, &[&key_name(key)]);
                }
                if refine_active && !key.typeset_check(got.kind_checked()) {
                    return fail(
                        ErrorId::ArgType,
                        &[
                            &label_name(f),
                            got.kind_checked().name(),
                            &key_name(key),
                        ],
                    );
                }
            }
        }

        unsafe {
            f.param = f.param.add(1);
            f.arg = f.arg.add(1);
            if !f.special.is_null() {
                f.special = f.special.add(1);
            }
        }
    }

    for (req, used) in requested {
        if !used {
            let name = String::from_utf8_lossy(spelling_bytes(req)).into_owned();
            return fail(ErrorId::BadRefine, &[&name]);
        }
    }

    // `param` past the end marks the frame as running rather than
    // fulfilling; the collector and FRAME! reflection rely on it.
    debug_assert!(!f.is_fulfilling());
    Ok(true)
}

fn fulfill_from_feed(
    f: &mut Frame,
    slot: *mut Cell,
    class: ParamClass,
    key: &Cell,
) -> Result<(), Raised> {
    let next = unsafe { (*f.source).array_at(f.index) };
    let peeked = unsafe { *next };
    if peeked.is_end() {
        return fail(ErrorId::NoValue, &[&key_name(key)]);
    }
    if peeked.is_kind(Kind::Bar) {
        // Expression barriers refuse to be arguments.
        return fail(ErrorId::NoValue, &[&key_name(key)]);
    }

    match class {
        ParamClass::HardQuote => {
            unsafe { *slot = derelativize(&peeked, f.specifier) };
            f.index += 1;
        }
        ParamClass::SoftQuote => {
            if matches!(
                peeked.kind(),
                Some(Kind::Group | Kind::GetWord | Kind::GetPath)
            ) {
                eval_next(slot, f.source, &mut f.index, f.specifier, 0)?;
            } else {
                unsafe { *slot = derelativize(&peeked, f.specifier) };
                f.index += 1;
            }
        }
        ParamClass::Tight => {
            // Tight arguments do not let enfix complete across them.
            eval_next(
                slot,
                f.source,
                &mut f.index,
                f.specifier,
                DO_FLAG_NO_LOOKAHEAD,
            )?;
        }
        _ => {
            eval_next(slot, f.source, &mut f.index, f.specifier, 0)?;
        }
    }

    // A throw inside an argument expression surfaces through the slot.
    if is_thrown(unsafe { &*slot }) {
        unsafe { *f.out = *slot };
    }
    Ok(())
}

fn key_name(key: &Cell) -> String {
    String::from_utf8_lossy(spelling_bytes(key.key_spelling())).into_owned()
}

fn label_name(f: &Frame) -> String {
    if f.label.is_null() {
        String::from("(anonymous)")
    } else {
        String::from_utf8_lossy(spelling_bytes(f.label)).into_owned()
    }
}

fn dispatch(f: &mut Frame) -> Result<(), Raised> {
    // Native hold: while a dispatcher runs, a reified varlist refuses
    // outside mutation. Interpreted bodies lift it, since user code
    // writing its own locals is the point.
    f.flags |= crate::frame::DO_FLAG_NATIVE_HOLD;
    if !f.varlist.is_null() {
        unsafe { (*f.varlist).set_flag(SERIES_FLAG_RUNNING) };
    }
    let dispatcher = func_dispatcher(f.func);
    dispatcher(f)
}

// =============================================================================
// Dispatchers
// =============================================================================

/// Interpreted function: evaluate the relatively-bound body with this
/// frame's varlist as the specifier.
pub fn dispatch_interpreted(f: &mut Frame) -> Result<(), Raised> {
    debug_assert!(!f.varlist.is_null(), "interpreted functions are durable");
    unsafe { (*f.varlist).clear_flag(SERIES_FLAG_RUNNING) };

    let body = unsafe { &*func_body_cell(f.func) };
    do_array_full(f.out, body.series(), 0, Specifier::Ctx(f.varlist))?;

    // Definitional return surfaces as a throw labeled `return`.
    let out = unsafe { &mut *f.out };
    if is_thrown(out)
        && out.is_kind(Kind::Word)
        && spelling_bytes(canon_of(out.word_spelling())) == b"return"
    {
        let payload = take_thrown(out);
        *out = payload;
    }
    Ok(())
}

/// Specialization: arguments were merged from the exemplar during
/// fulfillment; delegate to the specializee.
pub fn dispatch_specializer(f: &mut Frame) -> Result<(), Raised> {
    let holder = func_body_holder(f.func);
    let delegate = unsafe { *(*holder).array_at(1) };
    debug_assert!(delegate.is_kind(Kind::Function));
    f.func = delegate.func_paramlist();
    dispatch(f)
}

/// Adaptation: run the prelude in the frame, then delegate.
pub fn dispatch_adapter(f: &mut Frame) -> Result<(), Raised> {
    let varlist = crate::frame::reify_frame(f);
    unsafe { (*varlist).clear_flag(SERIES_FLAG_RUNNING) };

    let holder = func_body_holder(f.func);
    let prelude = unsafe { *(*holder).array_at(0) };
    let mut scratch = Cell::end();
    do_array_full(&mut scratch, prelude.series(), 0, Specifier::Ctx(varlist))?;
    if is_thrown(&scratch) {
        unsafe { *f.out = scratch };
        return Ok(());
    }

    let delegate = unsafe { *(*holder).array_at(1) };
    debug_assert!(delegate.is_kind(Kind::Function));
    f.func = delegate.func_paramlist();
    dispatch(f)
}

/// Chain: the first function runs on the frame's arguments; its result
/// pipes through the rest, arity 1 each.
pub fn dispatch_chainer(f: &mut Frame) -> Result<(), Raised> {
    let pipeline_cell = unsafe { *func_body_cell(f.func) };
    let pipeline = pipeline_cell.series();

    let first = unsafe { *(*pipeline).array_at(0) };
    debug_assert!(first.is_kind(Kind::Function));
    f.func = first.func_paramlist();
    dispatch(f)?;
    if is_thrown(unsafe { &*f.out }) {
        return Ok(());
    }

    let len = unsafe { (*pipeline).len() };
    for i in 1..len {
        let link = unsafe { *(*pipeline).array_at(i) };
        let input = unsafe { *f.out };
        apply_function(&link, &[&input], f.out)?;
        if is_thrown(unsafe { &*f.out }) {
            return Ok(());
        }
    }
    Ok(())
}

// =============================================================================
// Direct application
// =============================================================================

/// Call a function with pre-evaluated arguments (no source feed). Used by
/// chained dispatch, FFI callbacks, and the embedding surface.
pub fn apply_function(fn_cell: &Cell, args: &[&Cell], out: *mut Cell) -> Result<(), Raised> {
    debug_assert!(fn_cell.is_kind(Kind::Function));
    let paramlist = fn_cell.func_paramlist();

    unsafe { (*out).set_end() };
    let mut child = Frame::new_at(out, empty_feed(), 0, Specifier::Specified, 0);
    push_frame(&mut child);
    begin_function(&mut child, paramlist, fn_cell.binding());

    let result = fill_direct(&mut child, args).and_then(|()| dispatch(&mut child));

    end_function(&mut child);
    drop_frame(&mut child);
    result
}

fn fill_direct(f: &mut Frame, args: &[&Cell]) -> Result<(), Raised> {
    let mut supplied = args.iter();
    loop {
        let key = unsafe { &*f.param };
        if key.is_end() {
            break;
        }
        let class = key_class(key);
        let slot = f.arg;
        match class {
            ParamClass::Local | ParamClass::Return | ParamClass::Refinement => unsafe {
                (*slot).init_blank();
            },
            _ => {
                let Some(value) = supplied.next() else {
                    return fail(ErrorId::NoValue, &[&key_name(key)]);
                };
                unsafe { *slot = **value };
                if !key.typeset_check(unsafe { (*slot).kind_checked() }) {
                    return fail(
                        ErrorId::ArgType,
                        &[
                            &label_name(f),
                            unsafe { (*slot).kind_checked().name() },
                            &key_name(key),
                        ],
                    );
                }
            }
        }
        unsafe {
            f.param = f.param.add(1);
            f.arg = f.arg.add(1);
        }
    }
    Ok(())
}

/// A shared empty source array for frames with no feed.
fn empty_feed() -> *mut Series {
    rt().empty_array
}
