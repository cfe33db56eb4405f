//! Evaluator integration: dispatch, enfix, throws, functions, traps.

use reval_core::cell::Kind;
use reval_runtime::error::error_id_name;
use reval_runtime::test_support::RuntimeGuard;
use reval_runtime::{DoResult, do_string};

fn eval_int(src: &str) -> i64 {
    match do_string(src.as_bytes()) {
        DoResult::Value(cell) => {
            assert_eq!(cell.kind(), Some(Kind::Integer), "non-integer from {src:?}");
            cell.int64()
        }
        other => panic!("expected value from {src:?}, got {other:?}"),
    }
}

fn eval_err(src: &str) -> String {
    match do_string(src.as_bytes()) {
        DoResult::Error(ctx) => error_id_name(ctx),
        other => panic!("expected error from {src:?}, got {other:?}"),
    }
}

#[test]
fn literals_self_evaluate() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("42"), 42);
    match do_string(b"\"text\"") {
        DoResult::Value(cell) => assert_eq!(cell.kind(), Some(Kind::String)),
        other => panic!("{other:?}"),
    }
    match do_string(b"[1 2]") {
        DoResult::Value(cell) => assert_eq!(cell.kind(), Some(Kind::Block)),
        other => panic!("{other:?}"),
    }
}

#[test]
fn prefix_natives() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("add 1 2"), 3);
    assert_eq!(eval_int("multiply add 1 2 4"), 12);
    assert_eq!(eval_int("subtract 10 4"), 6);
}

#[test]
fn enfix_lookback() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("1 + 2"), 3);
    // Tight enfix arguments group left to right.
    assert_eq!(eval_int("1 + 2 * 3"), 9);
    assert_eq!(eval_int("add 1 + 1 3"), 5); // enfix completes inside the argument
}

#[test]
fn set_words_and_get_words() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("x: 5 add x 1"), 6);
    assert_eq!(eval_int("x: y: 2 add x y"), 4);
    match do_string(b"f: :add f 1 2") {
        DoResult::Value(cell) => assert_eq!(cell.int64(), 3),
        other => panic!("{other:?}"),
    }
}

#[test]
fn groups_and_barriers() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("(add 1 2)"), 3);
    assert_eq!(eval_int("1 | 2"), 2);
    match do_string(b"()") {
        DoResult::Void => {}
        other => panic!("empty group should be void, got {other:?}"),
    }
}

#[test]
fn conditionals() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("either #[true] [1] [2]"), 1);
    assert_eq!(eval_int("either #[false] [1] [2]"), 2);
    assert_eq!(eval_int("if 1 < 2 [99]"), 99);
    match do_string(b"if 2 < 1 [99]") {
        DoResult::Void => {}
        other => panic!("if-false should be void, got {other:?}"),
    }
}

#[test]
fn throw_and_catch() {
    let _rt = RuntimeGuard::new();
    // S5: catch [throw 42] yields the integer and clears the stash.
    assert_eq!(eval_int("catch [throw 42]"), 42);
    assert_eq!(eval_int("catch [1 throw 2 3]"), 2);
    assert_eq!(eval_int("catch/name [throw/name 7 'tag] 'tag"), 7);
    // A named throw passes an unnamed catch.
    assert_eq!(
        eval_int("catch/name [catch [throw/name 5 'outer]] 'outer"),
        5
    );
}

#[test]
fn uncaught_throw_is_no_catch() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_err("throw 1"), "no-catch");
}

#[test]
fn functions_and_return() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("f: func [a b] [add a b] f 3 4"), 7);
    assert_eq!(eval_int("f: func [n] [return add n 1 99] f 1"), 2);
    assert_eq!(eval_int("f: func [n] [either n < 10 [n] [0]] f 3"), 3);
    // Recursion through the durable frame path.
    assert_eq!(
        eval_int("fact: func [n] [either n < 2 [1] [multiply n fact subtract n 1]] fact 5"),
        120
    );
}

#[test]
fn function_args_are_frame_local() {
    let _rt = RuntimeGuard::new();
    assert_eq!(
        eval_int("x: 100 f: func [x] [add x 1] f 1 | x"),
        100
    );
}

#[test]
fn quote_takes_literally() {
    let _rt = RuntimeGuard::new();
    match do_string(b"quote (add 1 2)") {
        DoResult::Value(cell) => assert_eq!(cell.kind(), Some(Kind::Group)),
        other => panic!("{other:?}"),
    }
    match do_string(b"quote some-word") {
        DoResult::Value(cell) => assert_eq!(cell.kind(), Some(Kind::Word)),
        other => panic!("{other:?}"),
    }
}

#[test]
fn path_selection_and_invocation() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("b: [10 20 30] b/2"), 20);
    assert_eq!(eval_int("b: [x 1 y 2] b/y"), 2);
    assert_eq!(eval_int("b: [1 2 3] b/2: 9 b/2"), 9);
    // Refinement invocation through a path.
    assert_eq!(eval_int("catch/name [throw/name 3 'n] 'n"), 3);
}

#[test]
fn errors_carry_identity() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_err("add 1 \"two\""), "arg-type");
    assert_eq!(eval_err("no-such-word"), "not-bound");
    assert_eq!(eval_err("1.2.x"), "invalid");
}

#[test]
fn trap_catches_and_restores() {
    let _rt = RuntimeGuard::new();
    match do_string(b"trap [add 1 \"two\"]") {
        DoResult::Value(cell) => assert_eq!(cell.kind(), Some(Kind::Error)),
        other => panic!("{other:?}"),
    }
    // After a trapped error, evaluation continues normally.
    assert_eq!(eval_int("e: trap [no-such-thing] 5"), 5);
}

#[test]
fn specialize_fixes_arguments() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("add-ten: specialize :add [value1: 10] add-ten 5"), 15);
}

#[test]
fn adapt_runs_prelude() {
    let _rt = RuntimeGuard::new();
    // The prelude can rewrite arguments before delegation.
    assert_eq!(
        eval_int("noisy-add: adapt :add [value1: add value1 100] noisy-add 1 2"),
        103
    );
}

#[test]
fn chain_pipes_results() {
    let _rt = RuntimeGuard::new();
    assert_eq!(
        eval_int("add-then-double: chain [:add func [x] [multiply x 2]] add-then-double 2 3"),
        10
    );
}

#[test]
fn hijack_redirects_in_place() {
    let _rt = RuntimeGuard::new();
    assert_eq!(
        eval_int(
            "f: func [a b] [add a b] g: func [a b] [multiply a b] hijack :f :g f 3 4"
        ),
        12
    );
}

#[test]
fn do_evaluates_blocks_and_strings() {
    let _rt = RuntimeGuard::new();
    assert_eq!(eval_int("do [add 1 2]"), 3);
    assert_eq!(eval_int("do \"add 2 3\""), 5);
}

#[test]
fn transcode_scans_without_eval() {
    let _rt = RuntimeGuard::new();
    match do_string(b"transcode \"add 1 2\"") {
        DoResult::Value(cell) => {
            assert_eq!(cell.kind(), Some(Kind::Block));
            let pair = cell.series();
            let values = unsafe { *(*pair).array_at(0) };
            assert_eq!(values.kind(), Some(Kind::Block));
            assert_eq!(unsafe { (*values.series()).len() }, 3);
        }
        other => panic!("{other:?}"),
    }
}

#[test]
fn quit_reports_quit_code() {
    let _rt = RuntimeGuard::new();
    match do_string(b"1 quit 2") {
        DoResult::Quit => {}
        other => panic!("{other:?}"),
    }
}

#[test]
fn step_trace_emits_through_tracing() {
    use tracing_subscriber::util::SubscriberInitExt;

    let _rt = RuntimeGuard::new();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    let _guard = subscriber.set_default();

    reval_runtime::interp::rt().trace_on = true;
    assert_eq!(eval_int("add 1 multiply 2 3"), 7);
    reval_runtime::interp::rt().trace_on = false;
}

#[test]
fn comparison_natives() {
    let _rt = RuntimeGuard::new();
    match do_string(b"1 = 1") {
        DoResult::Value(cell) => assert!(cell.logic()),
        other => panic!("{other:?}"),
    }
    match do_string(b"equal? [1 2] [1 2]") {
        DoResult::Value(cell) => assert!(cell.logic()),
        other => panic!("{other:?}"),
    }
    match do_string(b"lesser? 2.5 3") {
        DoResult::Value(cell) => assert!(cell.logic()),
        other => panic!("{other:?}"),
    }
}
