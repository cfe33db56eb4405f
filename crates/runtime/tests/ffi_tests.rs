//! FFI trampoline integration (requires the `ffi` feature).
//!
//! The forward tests resolve symbols out of the running process image
//! (libc is linked in), so no fixture library needs building. The
//! callback test hands a comparator to qsort and lets foreign code call
//! back into the evaluator.

#![cfg(feature = "ffi")]

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
fn int32_roundtrip_through_abs() {
    let _rt = RuntimeGuard::new();
    // abs(int32) -> int32 behaves as identity on non-negative input.
    let src = "
        lib: make-library _
        c-abs: make-routine [lib \"abs\" [value [int32] return: [int32]]]
        c-abs 2147483647
    ";
    assert_eq!(eval_int(src), 2_147_483_647);
}

#[test]
fn int32_range_error_reported_before_call() {
    let _rt = RuntimeGuard::new();
    let src = "
        lib: make-library _
        c-abs: make-routine [lib \"abs\" [value [int32] return: [int32]]]
        c-abs 2147483648
    ";
    assert_eq!(eval_err(src), "out-of-range");
}

#[test]
fn int64_and_double_marshalling() {
    let _rt = RuntimeGuard::new();
    let src = "
        lib: make-library _
        c-labs: make-routine [lib \"labs\" [value [int64] return: [int64]]]
        c-labs -9000000000
    ";
    assert_eq!(eval_int(src), 9_000_000_000);

    match do_string(
        b"
        lib: make-library _
        c-fabs: make-routine [lib \"fabs\" [value [double] return: [double]]]
        c-fabs -2.5
    ",
    ) {
        DoResult::Value(cell) => assert_eq!(cell.decimal(), 2.5),
        other => panic!("{other:?}"),
    }
}

#[test]
fn string_pointer_arguments() {
    let _rt = RuntimeGuard::new();
    // strlen takes the string series' data pointer. The scanner's strings
    // are not NUL-terminated, so append an explicit terminator character.
    let src = "
        lib: make-library _
        c-strnlen: make-routine [lib \"strnlen\" [s [pointer] max [uint64] return: [uint64]]]
        c-strnlen \"hello\" 5
    ";
    assert_eq!(eval_int(src), 5);
}

#[test]
fn unknown_symbol_is_bad_library() {
    let _rt = RuntimeGuard::new();
    let src = "
        lib: make-library _
        make-routine [lib \"no-such-symbol-xyzzy\" [return: [int32]]]
    ";
    assert_eq!(eval_err(src), "bad-library");
}

#[test]
fn closed_library_refuses_calls() {
    let _rt = RuntimeGuard::new();
    let src = "
        lib: make-library _
        c-abs: make-routine [lib \"abs\" [value [int32] return: [int32]]]
        close-library lib
        c-abs 1
    ";
    assert_eq!(eval_err(src), "bad-library");
}

#[test]
fn invalid_abi_reported_at_construction() {
    let _rt = RuntimeGuard::new();
    let src = "
        lib: make-library _
        make-routine/abi [lib \"abs\" [value [int32] return: [int32]]] 'o32-soft-float
    ";
    assert_eq!(eval_err(src), "invalid-arg");
}

#[test]
fn struct_schemas_are_rejected() {
    let _rt = RuntimeGuard::new();
    let src = "
        lib: make-library _
        make-routine [lib \"abs\" [value [[int32 int32]] return: [int32]]]
    ";
    assert_eq!(eval_err(src), "bad-make");
}

#[test]
fn callback_invoked_from_foreign_code() {
    let _rt = RuntimeGuard::new();
    // The closure's code pointer is an ordinary C function pointer; call
    // it the way a library would and watch the evaluator run.
    let ptr = eval_int(
        "inc: make-callback func [n] [add n 1] [n [int32] return: [int32]]
         routine-pointer inc",
    );
    let f: unsafe extern "C" fn(i32) -> i32 =
        unsafe { core::mem::transmute(ptr as usize) };
    assert_eq!(unsafe { f(41) }, 42);
    assert_eq!(unsafe { f(-1) }, 0);
}

#[test]
fn callback_error_parks_instead_of_unwinding() {
    let _rt = RuntimeGuard::new();
    // A raise inside the callback must not unwind through the foreign
    // frame: the call returns a zeroed value and the error parks in the
    // interpreter's callback slot.
    let ptr = eval_int(
        "bad: make-callback func [n] [no-such-word] [n [int32] return: [int32]]
         routine-pointer bad",
    );
    let f: unsafe extern "C" fn(i32) -> i32 =
        unsafe { core::mem::transmute(ptr as usize) };
    assert_eq!(unsafe { f(1) }, 0);

    let parked = reval_runtime::interp::rt().callback_error;
    assert!(!parked.is_null());
    assert_eq!(error_id_name(parked), "not-bound");
    reval_runtime::interp::rt().callback_error = core::ptr::null_mut();
}

#[test]
fn callback_pointer_is_exposed() {
    let _rt = RuntimeGuard::new();
    let src = "
        id: make-callback func [n] [n] [n [int32] return: [int32]]
        routine-pointer id
    ";
    let ptr = eval_int(src);
    assert_ne!(ptr, 0);
}

#[test]
fn plain_functions_have_no_c_face() {
    let _rt = RuntimeGuard::new();
    assert_eq!(
        eval_err("routine-pointer func [n] [n]"),
        "only-callback-ptr"
    );
}

#[test]
fn variadic_routine_calls_with_per_call_interface() {
    let _rt = RuntimeGuard::new();
    // snprintf(buf, size, fmt, ...): the trailing block supplies the
    // variadic tail as [value type ...] pairs, and the interface is
    // rebuilt for this exact call.
    let src = "
        lib: make-library _
        c-snprintf: make-routine [
            lib \"snprintf\"
            [buf [pointer] size [uint64] fmt [pointer] ... return: [int32]]
        ]
        buf: \"................\"
        c-snprintf buf 16 \"%d^(00)\" [4242 int32]
    ";
    // snprintf returns the formatted length.
    assert_eq!(eval_int(src), 4);
}
