//! Collector integration: recycle stability, reachability, unwind marks.

use reval_core::cell::{Cell, Kind};
use reval_core::series::{MKS_NONE, free_series, make_array, make_series, manage_series};
use reval_core::state::mem;
use reval_runtime::error::{ErrorId, Raised, fail, with_trap};
use reval_runtime::gc::{count_live_series, recycle};
use reval_runtime::test_support::RuntimeGuard;
use reval_runtime::{DoResult, do_string};

#[test]
fn unreachable_managed_series_are_swept() {
    let _rt = RuntimeGuard::new();
    recycle();
    let baseline = count_live_series();

    // Managed but reachable from nothing: must die on the next cycle.
    for _ in 0..10 {
        let s = make_series(64, 1, MKS_NONE);
        manage_series(s);
    }
    assert!(count_live_series() >= baseline + 10);
    recycle();
    assert_eq!(count_live_series(), baseline);
}

#[test]
fn guarded_series_survive() {
    let _rt = RuntimeGuard::new();
    let s = make_series(64, 1, MKS_NONE);
    manage_series(s);
    reval_core::push_guard_series(s);
    recycle();
    // Still alive: writing through it is safe.
    reval_core::series::append_bytes(s, b"still here");
    assert_eq!(unsafe { (*s).data_slice() }, b"still here");
    reval_core::drop_guard_series(s);
    recycle();
}

#[test]
fn manual_series_are_never_swept() {
    let _rt = RuntimeGuard::new();
    let s = make_series(16, 1, MKS_NONE);
    recycle();
    reval_core::series::append_bytes(s, b"manual");
    assert_eq!(unsafe { (*s).data_slice() }, b"manual");
    free_series(s);
}

#[test]
fn reachable_tree_survives_through_data_stack() {
    let _rt = RuntimeGuard::new();
    let arr = make_array(4, MKS_NONE);
    let inner = make_series(32, 1, MKS_NONE);
    reval_core::series::append_bytes(inner, b"payload");
    manage_series(inner);
    let mut cell = Cell::zeroed();
    cell.init_series(Kind::String, inner, 0);
    reval_core::series::append_cell(arr, &cell);
    manage_series(arr);

    // Root the outer array on the data stack; the inner string is only
    // reachable through it.
    let dsp = mem().data_stack.dsp();
    unsafe {
        (*mem().data_stack.push()).init_series(Kind::Block, arr, 0);
    }
    recycle();
    assert_eq!(unsafe { (*inner).data_slice() }, b"payload");

    mem().data_stack.drop_to(dsp);
    recycle();
}

#[test]
fn recycle_stability_loop() {
    let _rt = RuntimeGuard::new();
    // Warm up interning and lib lookups, then measure.
    match do_string(b"block: [] 1") {
        DoResult::Value(_) => {}
        other => panic!("{other:?}"),
    }
    recycle();
    let baseline = count_live_series();

    for _ in 0..20 {
        match do_string(b"b: [1 2 3 4 5 6 7 8 9 10] recycle") {
            DoResult::Value(_) => {}
            other => panic!("{other:?}"),
        }
    }
    recycle();
    let after = count_live_series();
    // The loop's scratch must not accumulate: everything it made is
    // unreachable once `b` is rebound each pass.
    assert!(
        after <= baseline + 2,
        "live series grew: {baseline} -> {after}"
    );
}

#[test]
fn trap_unwind_restores_all_marks() {
    let _rt = RuntimeGuard::new();
    let m = mem();
    let dsp = m.data_stack.dsp();
    let chunk = m.chunks.mark();
    let manuals = m.manuals.len();
    let guards = m.guarded_series.len();
    let mold = reval_core::mold::mark();

    let result = with_trap(|| -> Result<(), Raised> {
        unsafe {
            (*mem().data_stack.push()).init_integer(1);
        }
        mem().chunks.push_chunk(4);
        let scratch = make_series(128, 1, MKS_NONE);
        reval_core::push_guard_series(scratch);
        reval_core::mold::push_bytes(b"partial");
        fail(ErrorId::Misc, &[])
    })
    .expect("not a halt");
    assert!(result.is_err());

    let m = mem();
    assert_eq!(m.data_stack.dsp(), dsp);
    assert_eq!(m.chunks.mark(), chunk);
    assert_eq!(m.manuals.len(), manuals);
    assert_eq!(m.guarded_series.len(), guards);
    assert_eq!(reval_core::mold::mark(), mold);
}

#[test]
fn ballast_crossing_requests_recycle() {
    let _rt = RuntimeGuard::new();
    let m = mem();
    m.sig_recycle = false;
    m.ballast = 16;
    let s = make_series(1024, 1, MKS_NONE);
    assert!(mem().sig_recycle, "allocation should trip the ballast");
    free_series(s);
    // The evaluator's next step services the request.
    match do_string(b"1") {
        DoResult::Value(_) => {}
        other => panic!("{other:?}"),
    }
    assert!(!mem().sig_recycle);
}

#[test]
fn reified_frame_outlives_call_as_inaccessible() {
    let _rt = RuntimeGuard::new();
    // A durable function's frame context stays readable after the call;
    // the collector keeps it while anything references it.
    match do_string(b"f: func [a] [a] f 7 recycle 1") {
        DoResult::Value(cell) => assert_eq!(cell.int64(), 1),
        other => panic!("{other:?}"),
    }
}
