//! Core-protocol natives and the library context
//!
//! These are the natives the evaluator protocol itself needs: DO, QUOTE,
//! CATCH/THROW, RETURN, FUNC, TRAP, RECYCLE, TRANSCODE, the composition
//! constructors (SPECIALIZE, ADAPT, CHAIN, HIJACK), and the comparison
//! and arithmetic primitives the enfix operators alias. The per-datatype
//! standard library lives outside the core; this is the floor the tests
//! and the embedding surface stand on.

use crate::bind::{Specifier, bind_values_deep, BIND_DEEP, BIND_SET};
use crate::context::{ParamClass, append_context_key, make_context, var_at};
use crate::error::{ErrorId, Raised, fail, with_trap};
use crate::eval::{
    dispatch_adapter, dispatch_chainer, dispatch_interpreted, dispatch_specializer,
    do_any_array, init_thrown, is_thrown, take_thrown,
};
use crate::frame::Frame;
use crate::func::{
    ParamSpec, func_num_params, func_underlying, hijack, make_adapted, make_chained,
    make_interpreted, make_native, make_specialized,
};
use crate::interp::rt;
use reval_core::cell::{Cell, Kind, WORD_FLAG_ENFIXED};
use reval_core::series::{MKS_NONE, Series, append_cell, make_array, manage_series};
use reval_core::symbol::{canon_of, intern};

// =============================================================================
// Argument access helpers
// =============================================================================

#[inline]
fn arg(f: &Frame, n: usize) -> Cell {
    unsafe { *f.arg_at(n) }
}

#[inline]
fn refinement_used(f: &Frame, n: usize) -> bool {
    unsafe { !(*f.arg_at(n)).is_kind(Kind::Blank) }
}

fn truthy(cell: &Cell) -> bool {
    match cell.kind() {
        None => false, // void
        Some(Kind::Blank) => false,
        Some(Kind::Logic) => cell.logic(),
        _ => true,
    }
}

// =============================================================================
// Natives
// =============================================================================

/// DO value - evaluate blocks, groups, and source strings.
fn native_do(f: &mut Frame) -> Result<(), Raised> {
    let value = arg(f, 1);
    match value.kind_checked() {
        Kind::Block | Kind::Group => do_any_array(f.out, &value, Specifier::Specified),
        Kind::String => {
            let text = unsafe { (*value.series()).data_slice().to_vec() };
            let array = crate::scan::scan_source(&text)?;
            bind_values_deep(array, rt().lib, BIND_DEEP | BIND_SET);
            crate::eval::do_array_full(f.out, array, 0, Specifier::Specified)
        }
        _ => {
            unsafe { *f.out = value };
            Ok(())
        }
    }
}

/// QUOTE :value - hand back the argument exactly as written.
fn native_quote(f: &mut Frame) -> Result<(), Raised> {
    unsafe { *f.out = arg(f, 1) };
    Ok(())
}

/// THROW value /name name - unwind to the matching CATCH.
fn native_throw(f: &mut Frame) -> Result<(), Raised> {
    let value = arg(f, 1);
    let mut label = Cell::zeroed();
    if refinement_used(f, 2) {
        label = arg(f, 3);
    } else {
        label.init_blank();
    }
    let mut out = Cell::end();
    init_thrown(&mut out, &label, &value);
    unsafe { *f.out = out };
    Ok(())
}

/// CATCH block /name name - evaluate, catching matching throws.
fn native_catch(f: &mut Frame) -> Result<(), Raised> {
    let block = arg(f, 1);
    if !block.kind().is_some_and(|k| k.is_array()) {
        return fail(ErrorId::ArgType, &["catch", block.kind_checked().name(), "block"]);
    }
    do_any_array(f.out, &block, Specifier::Specified)?;

    let out = unsafe { &mut *f.out };
    if !is_thrown(out) {
        return Ok(());
    }

    let matches = if refinement_used(f, 2) {
        let want = arg(f, 3);
        out.is_kind(Kind::Word)
            && want.is_kind(Kind::Word)
            && canon_of(out.word_spelling()) == canon_of(want.word_spelling())
    } else {
        out.is_kind(Kind::Blank)
    };

    if matches {
        let payload = take_thrown(out);
        *out = payload;
    }
    // Otherwise the thrown flag stays set and keeps unwinding.
    Ok(())
}

/// RETURN value - definitional exit from the enclosing function body.
fn native_return(f: &mut Frame) -> Result<(), Raised> {
    let value = arg(f, 1);
    let mut label = Cell::zeroed();
    label.init_word(Kind::Word, intern(b"return"));
    let mut out = Cell::end();
    init_thrown(&mut out, &label, &value);
    unsafe { *f.out = out };
    Ok(())
}

/// QUIT - unwind everything; the embedding shell maps it to its exit code.
fn native_quit(f: &mut Frame) -> Result<(), Raised> {
    let mut label = Cell::zeroed();
    label.init_word(Kind::Word, intern(b"quit"));
    let mut blank = Cell::zeroed();
    blank.init_blank();
    let mut out = Cell::end();
    init_thrown(&mut out, &label, &blank);
    unsafe { *f.out = out };
    Ok(())
}

/// FUNC spec body - construct an interpreted function.
fn native_func(f: &mut Frame) -> Result<(), Raised> {
    let spec = arg(f, 1);
    let body = arg(f, 2);
    if !spec.is_kind(Kind::Block) || !body.is_kind(Kind::Block) {
        return fail(ErrorId::BadMake, &["function!", "non-block spec or body"]);
    }
    let paramlist = make_interpreted(&spec, &body, dispatch_interpreted)?;
    unsafe {
        (*f.out).init_function(paramlist, crate::func::func_body_holder(paramlist));
    }
    Ok(())
}

/// TRAP block - evaluate; an error becomes the result instead of raising.
fn native_trap(f: &mut Frame) -> Result<(), Raised> {
    let block = arg(f, 1);
    let out = f.out;
    let caught = with_trap(|| do_any_array(out, &block, Specifier::Specified))?;
    match caught {
        Ok(()) => Ok(()),
        Err(ctx) => {
            unsafe { (*out).init_context(Kind::Error, ctx) };
            Ok(())
        }
    }
}

/// RECYCLE - force a collection cycle, returning the count swept.
fn native_recycle(f: &mut Frame) -> Result<(), Raised> {
    let swept = crate::gc::recycle();
    unsafe { (*f.out).init_integer(swept as i64) };
    Ok(())
}

/// TRANSCODE source /next /only /relax - scan without evaluating.
/// Returns [values-block next-position].
fn native_transcode(f: &mut Frame) -> Result<(), Raised> {
    let source = arg(f, 1);
    if !source.kind().is_some_and(|k| matches!(k, Kind::String | Kind::Binary)) {
        return fail(
            ErrorId::ArgType,
            &["transcode", source.kind_checked().name(), "source"],
        );
    }
    let mut opts = 0;
    if refinement_used(f, 2) {
        opts |= crate::scan::SCAN_NEXT;
    }
    if refinement_used(f, 3) {
        opts |= crate::scan::SCAN_ONLY;
    }
    if refinement_used(f, 4) {
        opts |= crate::scan::SCAN_RELAX;
    }

    let bytes = unsafe { (*source.series()).data_slice().to_vec() };
    let (values, position) = crate::scan::scan_source_opts(&bytes, opts)?;

    let result = make_array(2, MKS_NONE);
    let mut cell = Cell::zeroed();
    cell.init_series(Kind::Block, values, 0);
    append_cell(result, &cell);
    cell.init_integer(position as i64);
    append_cell(result, &cell);
    manage_series(result);
    unsafe { (*f.out).init_series(Kind::Block, result, 0) };
    Ok(())
}

// -- arithmetic and comparison ------------------------------------------------

enum Numeric {
    Int(i64),
    Dec(f64),
}

fn as_numeric(label: &str, cell: &Cell) -> Result<Numeric, Raised> {
    match cell.kind_checked() {
        Kind::Integer => Ok(Numeric::Int(cell.int64())),
        Kind::Decimal | Kind::Percent => Ok(Numeric::Dec(cell.decimal())),
        k => fail(ErrorId::ArgType, &[label, k.name(), "value"]),
    }
}

fn arith(
    f: &mut Frame,
    label: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    dec_op: fn(f64, f64) -> f64,
) -> Result<(), Raised> {
    let a = arg(f, 1);
    let b = arg(f, 2);
    match (as_numeric(label, &a)?, as_numeric(label, &b)?) {
        (Numeric::Int(x), Numeric::Int(y)) => match int_op(x, y) {
            Some(v) => unsafe {
                (*f.out).init_integer(v);
            },
            None => return fail(ErrorId::OutOfRange, &[&format!("{x} {label} {y}")]),
        },
        (x, y) => {
            let xv = match x {
                Numeric::Int(i) => i as f64,
                Numeric::Dec(d) => d,
            };
            let yv = match y {
                Numeric::Int(i) => i as f64,
                Numeric::Dec(d) => d,
            };
            unsafe { (*f.out).init_decimal(dec_op(xv, yv)) };
        }
    }
    Ok(())
}

fn native_add(f: &mut Frame) -> Result<(), Raised> {
    arith(f, "add", i64::checked_add, |a, b| a + b)
}

fn native_subtract(f: &mut Frame) -> Result<(), Raised> {
    arith(f, "subtract", i64::checked_sub, |a, b| a - b)
}

fn native_multiply(f: &mut Frame) -> Result<(), Raised> {
    arith(f, "multiply", i64::checked_mul, |a, b| a * b)
}

/// Loose equality over the kinds the core traffics in.
pub fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match (a.kind(), b.kind()) {
        (Some(Kind::Integer), Some(Kind::Integer)) => a.int64() == b.int64(),
        (Some(Kind::Integer), Some(Kind::Decimal)) => a.int64() as f64 == b.decimal(),
        (Some(Kind::Decimal), Some(Kind::Integer)) => a.decimal() == b.int64() as f64,
        (Some(Kind::Decimal), Some(Kind::Decimal)) => a.decimal() == b.decimal(),
        (Some(Kind::Logic), Some(Kind::Logic)) => a.logic() == b.logic(),
        (Some(Kind::Blank), Some(Kind::Blank)) => true,
        (Some(Kind::Char), Some(Kind::Char)) => a.character() == b.character(),
        (Some(ka), Some(kb)) if ka.is_word() && kb.is_word() => {
            canon_of(a.word_spelling()) == canon_of(b.word_spelling())
        }
        (Some(ka), Some(kb)) if ka.is_string() && kb.is_string() => unsafe {
            (*a.series()).data_slice() == (*b.series()).data_slice()
        },
        (Some(ka), Some(kb)) if ka.is_array() && kb.is_array() => {
            let (sa, sb) = (a.series(), b.series());
            let (la, lb) = unsafe { ((*sa).len(), (*sb).len()) };
            if la - a.index() != lb - b.index() {
                return false;
            }
            for n in 0..la - a.index() {
                let ca = unsafe { &*(*sa).array_at(a.index() + n) };
                let cb = unsafe { &*(*sb).array_at(b.index() + n) };
                if !cells_equal(ca, cb) {
                    return false;
                }
            }
            true
        }
        _ => false,
    }
}

fn native_equal_q(f: &mut Frame) -> Result<(), Raised> {
    let a = arg(f, 1);
    let b = arg(f, 2);
    unsafe { (*f.out).init_logic(cells_equal(&a, &b)) };
    Ok(())
}

fn native_lesser_q(f: &mut Frame) -> Result<(), Raised> {
    let a = arg(f, 1);
    let b = arg(f, 2);
    let result = match (as_numeric("lesser?", &a)?, as_numeric("lesser?", &b)?) {
        (Numeric::Int(x), Numeric::Int(y)) => x < y,
        (x, y) => {
            let xv = match x {
                Numeric::Int(i) => i as f64,
                Numeric::Dec(d) => d,
            };
            let yv = match y {
                Numeric::Int(i) => i as f64,
                Numeric::Dec(d) => d,
            };
            xv < yv
        }
    };
    unsafe { (*f.out).init_logic(result) };
    Ok(())
}

fn native_if(f: &mut Frame) -> Result<(), Raised> {
    let condition = arg(f, 1);
    let branch = arg(f, 2);
    if truthy(&condition) {
        if branch.kind().is_some_and(|k| k.is_array()) {
            return do_any_array(f.out, &branch, Specifier::Specified);
        }
        unsafe { *f.out = branch };
    } else {
        unsafe { (*f.out).set_end() }; // void on the no-branch
    }
    Ok(())
}

fn native_either(f: &mut Frame) -> Result<(), Raised> {
    let condition = arg(f, 1);
    let branch = if truthy(&condition) { arg(f, 2) } else { arg(f, 3) };
    if branch.kind().is_some_and(|k| k.is_array()) {
        return do_any_array(f.out, &branch, Specifier::Specified);
    }
    unsafe { *f.out = branch };
    Ok(())
}

// -- composition --------------------------------------------------------------

fn expect_function(label: &str, cell: &Cell) -> Result<*mut Series, Raised> {
    if !cell.is_kind(Kind::Function) {
        return fail(ErrorId::ArgType, &[label, cell.kind_checked().name(), "target"]);
    }
    Ok(cell.func_paramlist())
}

/// SPECIALIZE target frame-values - fix some arguments of a function.
fn native_specialize(f: &mut Frame) -> Result<(), Raised> {
    let target = arg(f, 1);
    let fills = arg(f, 2);
    let base = expect_function("specialize", &target)?;
    if !fills.is_kind(Kind::Block) {
        return fail(ErrorId::ArgType, &["specialize", fills.kind_checked().name(), "frame-values"]);
    }

    // Exemplar: a FRAME! over the underlying paramlist, slots void until
    // the fill block's set-words assign them.
    let underlying = func_underlying(base);
    let arity = func_num_params(underlying);
    let exemplar = make_array(arity + 1, MKS_NONE);
    unsafe {
        (*exemplar).set_flag(reval_core::series::SERIES_FLAG_VARLIST);
        (*exemplar).link = underlying as u64;
        (*exemplar).misc = 0;
    }
    let mut archetype = Cell::zeroed();
    archetype.init_context(Kind::Frame, exemplar);
    append_cell(exemplar, &archetype);
    let void = Cell::end();
    for _ in 0..arity {
        append_cell(exemplar, &void);
    }
    manage_series(exemplar);

    // The fill block is bound to the exemplar so `value: 10` writes the
    // matching parameter slot.
    let copy = crate::bind::copy_array_deep(fills.series(), fills.index());
    manage_series(copy);
    bind_values_deep(copy, exemplar, BIND_DEEP);
    let mut scratch = Cell::end();
    crate::eval::do_array_full(&mut scratch, copy, 0, Specifier::Specified)?;

    let paramlist = make_specialized(base, exemplar, dispatch_specializer);
    unsafe {
        (*f.out).init_function(paramlist, crate::func::func_body_holder(paramlist));
    }
    Ok(())
}

/// ADAPT target prelude - run a block before delegating.
fn native_adapt(f: &mut Frame) -> Result<(), Raised> {
    let target = arg(f, 1);
    let prelude = arg(f, 2);
    let adaptee = expect_function("adapt", &target)?;
    if !prelude.is_kind(Kind::Block) {
        return fail(ErrorId::ArgType, &["adapt", prelude.kind_checked().name(), "prelude"]);
    }
    let copy = crate::bind::copy_array_deep(prelude.series(), prelude.index());
    manage_series(copy);
    let paramlist = make_adapted(adaptee, copy, dispatch_adapter);
    unsafe {
        (*f.out).init_function(paramlist, crate::func::func_body_holder(paramlist));
    }
    Ok(())
}

/// CHAIN pipeline - pipe one function's output through others.
fn native_chain(f: &mut Frame) -> Result<(), Raised> {
    let block = arg(f, 1);
    if !block.is_kind(Kind::Block) {
        return fail(ErrorId::ArgType, &["chain", block.kind_checked().name(), "pipeline"]);
    }
    // Reduce the block: each element must evaluate to a function.
    let pipeline = make_array(unsafe { (*block.series()).len() }.max(1), MKS_NONE);
    let mut index = block.index();
    let array = block.series();
    let len = unsafe { (*array).len() };
    while index < len {
        let mut slot = Cell::end();
        crate::eval::eval_next(&mut slot, array, &mut index, Specifier::Specified, 0)?;
        if !slot.is_kind(Kind::Function) {
            return fail(ErrorId::ArgType, &["chain", slot.kind_checked().name(), "pipeline"]);
        }
        append_cell(pipeline, &slot);
    }
    if unsafe { (*pipeline).len() } == 0 {
        return fail(ErrorId::InvalidArg, &["empty chain pipeline"]);
    }
    manage_series(pipeline);
    let paramlist = make_chained(pipeline, dispatch_chainer);
    unsafe {
        (*f.out).init_function(paramlist, crate::func::func_body_holder(paramlist));
    }
    Ok(())
}

/// HIJACK victim usurper - all references to victim now run usurper.
fn native_hijack(f: &mut Frame) -> Result<(), Raised> {
    let victim = arg(f, 1);
    let usurper = arg(f, 2);
    let v = expect_function("hijack", &victim)?;
    let u = expect_function("hijack", &usurper)?;
    hijack(v, u)?;
    unsafe { *f.out = victim };
    Ok(())
}

// =============================================================================
// Library bootstrap
// =============================================================================

/// Register a native in a context under `name` (plain prefix dispatch).
pub fn add_native(
    lib: *mut Series,
    name: &str,
    params: &[ParamSpec],
    dispatcher: crate::func::Dispatcher,
) {
    add_native_to_lib(lib, name, params, dispatcher, false);
}

fn add_native_to_lib(
    lib: *mut Series,
    name: &str,
    params: &[ParamSpec],
    dispatcher: crate::func::Dispatcher,
    enfix: bool,
) {
    let paramlist = make_native(params, dispatcher);
    let index = append_context_key(lib, intern(name.as_bytes()));
    unsafe {
        let slot = var_at(lib, index);
        (*slot).init_function(paramlist, crate::func::func_body_holder(paramlist));
        if enfix {
            (*slot).set_flag(WORD_FLAG_ENFIXED);
        }
    }
}

/// Build the lib context and bind every core native into it.
pub fn init_lib() -> *mut Series {
    let lib = make_context(64, Kind::Module);
    crate::context::manage_context(lib);

    use ParamClass as PC;
    let normal = ParamSpec::normal;
    let tight = ParamSpec::tight;
    let hard = ParamSpec::hard_quote;
    let refine = ParamSpec::refinement;
    let named = |name| ParamSpec {
        name,
        class: PC::Normal,
        types: crate::func::ts(Kind::Word),
    };

    add_native_to_lib(lib, "do", &[normal("value")], native_do, false);
    add_native_to_lib(lib, "quote", &[hard("value")], native_quote, false);
    add_native_to_lib(
        lib,
        "throw",
        &[normal("value"), refine("name"), named("word")],
        native_throw,
        false,
    );
    add_native_to_lib(
        lib,
        "catch",
        &[normal("block"), refine("name"), named("word")],
        native_catch,
        false,
    );
    add_native_to_lib(lib, "return", &[normal("value")], native_return, false);
    add_native_to_lib(lib, "quit", &[], native_quit, false);
    add_native_to_lib(lib, "func", &[normal("spec"), normal("body")], native_func, false);
    add_native_to_lib(lib, "trap", &[normal("block")], native_trap, false);
    add_native_to_lib(lib, "recycle", &[], native_recycle, false);
    add_native_to_lib(
        lib,
        "transcode",
        &[
            normal("source"),
            refine("next"),
            refine("only"),
            refine("relax"),
        ],
        native_transcode,
        false,
    );

    add_native_to_lib(lib, "add", &[normal("value1"), normal("value2")], native_add, false);
    add_native_to_lib(
        lib,
        "subtract",
        &[normal("value1"), normal("value2")],
        native_subtract,
        false,
    );
    add_native_to_lib(
        lib,
        "multiply",
        &[normal("value1"), normal("value2")],
        native_multiply,
        false,
    );
    add_native_to_lib(
        lib,
        "equal?",
        &[normal("value1"), normal("value2")],
        native_equal_q,
        false,
    );
    add_native_to_lib(
        lib,
        "lesser?",
        &[normal("value1"), normal("value2")],
        native_lesser_q,
        false,
    );
    add_native_to_lib(lib, "if", &[normal("condition"), normal("branch")], native_if, false);
    add_native_to_lib(
        lib,
        "either",
        &[normal("condition"), normal("true-branch"), normal("false-branch")],
        native_either,
        false,
    );

    add_native_to_lib(
        lib,
        "specialize",
        &[normal("target"), normal("frame-values")],
        native_specialize,
        false,
    );
    add_native_to_lib(lib, "adapt", &[normal("target"), normal("prelude")], native_adapt, false);
    add_native_to_lib(lib, "chain", &[normal("pipeline")], native_chain, false);
    add_native_to_lib(
        lib,
        "hijack",
        &[normal("victim"), normal("usurper")],
        native_hijack,
        false,
    );

    // Enfix operators: lookback aliases with tight arguments, so `1 + 2 * 3`
    // groups left to right.
    add_native_to_lib(lib, "+", &[tight("value1"), tight("value2")], native_add, true);
    add_native_to_lib(lib, "-", &[tight("value1"), tight("value2")], native_subtract, true);
    add_native_to_lib(lib, "*", &[tight("value1"), tight("value2")], native_multiply, true);
    add_native_to_lib(lib, "=", &[tight("value1"), tight("value2")], native_equal_q, true);
    add_native_to_lib(lib, "<", &[tight("value1"), tight("value2")], native_lesser_q, true);

    #[cfg(feature = "ffi")]
    crate::ffi::init_ffi_natives(lib);
    #[cfg(not(feature = "ffi"))]
    add_native_to_lib(
        lib,
        "make-routine",
        &[normal("spec")],
        crate::ffi_stub::native_make_routine_unavailable,
        false,
    );

    lib
}
