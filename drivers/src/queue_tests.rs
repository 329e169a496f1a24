//! Tests for the bounded subscriber queue: FIFO order, bulk dequeue,
//! cancellation, and the async-notify edge trigger.

extern crate alloc;

use alloc::vec::Vec;

use axstream_lib::testing::TestResult;
use axstream_lib::{assert_eq_test, assert_test, pass};

use crate::dma::queue::SubQueue;
use crate::dma::types::DmaError;
use crate::test_fixtures;

fn make_queue(capacity: usize) -> SubQueue {
    test_fixtures::install();
    SubQueue::with_capacity(capacity)
}

pub fn test_queue_fifo_order() -> TestResult {
    let queue = make_queue(8);
    for index in [5u32, 9, 2, 7] {
        assert_test!(queue.push(index).is_ok(), "push succeeds");
    }
    assert_eq_test!(queue.ready_count(), 4, "four queued");
    for expected in [5u32, 9, 2, 7] {
        match queue.pop(None, true) {
            Ok(Some(index)) => assert_eq_test!(index, expected, "strict FIFO"),
            other => {
                axstream_lib::klog_info!("pop returned {:?}", other);
                return TestResult::Fail;
            }
        }
    }
    pass!()
}

pub fn test_queue_empty_nonblocking() -> TestResult {
    let queue = make_queue(4);
    match queue.pop(None, true) {
        Ok(None) => pass!(),
        other => {
            axstream_lib::klog_info!("pop on empty returned {:?}", other);
            TestResult::Fail
        }
    }
}

pub fn test_queue_capacity_bound() -> TestResult {
    let queue = make_queue(2);
    assert_test!(queue.push(1).is_ok(), "first fits");
    assert_test!(queue.push(2).is_ok(), "second fits");
    assert_eq_test!(queue.push(3), Err(3), "full queue hands the index back");
    assert_eq_test!(queue.ready_count(), 2, "count unchanged");
    pass!()
}

pub fn test_queue_pop_bulk() -> TestResult {
    let queue = make_queue(8);
    for index in 0..5u32 {
        let _ = queue.push(index);
    }

    let mut out = [0u32; 3];
    assert_eq_test!(queue.pop_bulk(&mut out), 3, "first bulk takes three");
    assert_eq_test!(out, [0, 1, 2], "bulk preserves order");

    let mut rest = [0u32; 8];
    assert_eq_test!(queue.pop_bulk(&mut rest), 2, "second bulk drains the rest");
    assert_eq_test!(rest[0], 3, "continues in order");
    assert_eq_test!(rest[1], 4, "continues in order");

    assert_eq_test!(queue.pop_bulk(&mut rest), 0, "empty bulk returns zero");
    pass!()
}

pub fn test_queue_cancel_drains_and_blocks_pushes() -> TestResult {
    let queue = make_queue(8);
    for index in [3u32, 4, 5] {
        let _ = queue.push(index);
    }

    let mut drained = Vec::new();
    queue.cancel(|index| drained.push(index));
    assert_eq_test!(drained.as_slice(), &[3, 4, 5][..], "drain in FIFO order");
    assert_test!(queue.is_cancelled(), "cancelled flag set");

    assert_eq_test!(queue.push(9), Err(9), "push after cancel refused");
    assert_eq_test!(
        queue.pop(None, true),
        Err(DmaError::NotAvailable),
        "pop after cancel reports unavailable"
    );
    pass!()
}

pub fn test_queue_async_edge_trigger() -> TestResult {
    let queue = make_queue(8);
    test_fixtures::reset_signals();
    let pgid = 612;
    queue.set_async_pgid(pgid);

    let _ = queue.push(1);
    assert_eq_test!(
        test_fixtures::signals_sent(pgid),
        1,
        "empty to non-empty fires once"
    );

    let _ = queue.push(2);
    assert_eq_test!(
        test_fixtures::signals_sent(pgid),
        1,
        "non-empty push does not fire"
    );

    let _ = queue.pop(None, true);
    let _ = queue.pop(None, true);
    let _ = queue.push(3);
    assert_eq_test!(
        test_fixtures::signals_sent(pgid),
        2,
        "next empty to non-empty fires again"
    );
    pass!()
}

pub fn test_queue_async_unregister() -> TestResult {
    let queue = make_queue(4);
    test_fixtures::reset_signals();
    let pgid = 613;
    queue.set_async_pgid(pgid);
    queue.set_async_pgid(0);

    let _ = queue.push(1);
    assert_eq_test!(
        test_fixtures::signals_sent(pgid),
        0,
        "unregistered subscriber gets no signal"
    );
    pass!()
}

axstream_lib::define_test_suite!(
    queue,
    [
        test_queue_fifo_order,
        test_queue_empty_nonblocking,
        test_queue_capacity_bound,
        test_queue_pop_bulk,
        test_queue_cancel_drains_and_blocks_pushes,
        test_queue_async_edge_trigger,
        test_queue_async_unregister,
    ]
);
