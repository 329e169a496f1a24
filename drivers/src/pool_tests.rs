//! Tests for the buffer pool: free-list discipline, bus-handle lookup,
//! the ownership state machine, and the cache-maintenance hooks.

use axstream_abi::addr::PhysAddr;
use axstream_abi::dma::FrameFlags;
use axstream_lib::testing::TestResult;
use axstream_lib::{assert_eq_test, assert_ok, assert_some, assert_test, pass};

use crate::dma::buffer::{BufOwner, PoolKind};
use crate::dma::config::DmaMode;
use crate::dma::pool::BufferPool;
use crate::dma::types::DmaError;
use crate::test_fixtures;

const BUF_SIZE: u32 = 4096;

fn make_pool(kind: PoolKind, base: u32, count: u32, mode: DmaMode) -> Option<BufferPool> {
    test_fixtures::install();
    BufferPool::create(kind, mode, base, count, BUF_SIZE).ok()
}

pub fn test_pool_create_indexing() -> TestResult {
    let pool = assert_some!(
        make_pool(PoolKind::Rx, 8, 4, DmaMode::Coherent),
        "pool create"
    );
    assert_eq_test!(pool.base(), 8, "base index");
    assert_eq_test!(pool.len(), 4, "count");
    assert_eq_test!(pool.buf_size(), BUF_SIZE, "buffer size");
    assert_test!(pool.contains(8) && pool.contains(11), "range membership");
    assert_test!(!pool.contains(7) && !pool.contains(12), "outside range");
    assert_eq_test!(pool.free_count(), 4, "all buffers start free");
    pass!()
}

pub fn test_pool_acquire_release() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Tx, 0, 3, DmaMode::Coherent));

    let a = assert_some!(pool.acquire_free(), "first acquire");
    let b = assert_some!(pool.acquire_free(), "second acquire");
    assert_test!(a != b, "acquired indices are distinct");
    assert_eq_test!(pool.free_count(), 1, "two detached");

    assert_test!(pool.release(a), "release succeeds");
    assert_eq_test!(pool.free_count(), 2, "released back");

    // Idempotent against a racing double release: the second call must
    // not create a free-list duplicate.
    assert_test!(!pool.release(a), "double release is a no-op");
    assert_eq_test!(pool.free_count(), 2, "no duplicate on free list");

    assert_test!(pool.release(b), "release second");
    assert_eq_test!(pool.free_count(), 3, "all free again");
    pass!()
}

pub fn test_pool_exhaustion() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Tx, 0, 2, DmaMode::Coherent));
    assert_some!(pool.acquire_free());
    assert_some!(pool.acquire_free());
    assert_test!(pool.acquire_free().is_none(), "empty pool yields none");
    pass!()
}

pub fn test_pool_find_by_bus() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 4, 8, DmaMode::Coherent));

    for index in 4..12 {
        let bus = assert_ok!(pool.bus_handle(index), "bus handle");
        let found = assert_some!(pool.find_by_bus(bus), "reverse lookup");
        assert_eq_test!(found, index, "lookup returns the same index");
    }
    assert_test!(
        pool.find_by_bus(PhysAddr(3)).is_none(),
        "unknown handle misses"
    );
    pass!()
}

pub fn test_pool_state_machine_cycle() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 2, DmaMode::Coherent));

    let index = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(index), "arm detached buffer");
    assert_eq_test!(pool.owner_of(index), Some(BufOwner::Armed), "armed");

    assert_ok!(
        pool.complete(index, 1024, FrameFlags::from_parts(2, 0, false), 7, 0),
        "complete"
    );
    assert_eq_test!(pool.owner_of(index), Some(BufOwner::Ready), "ready");

    let info = assert_ok!(pool.frame_info(index));
    assert_eq_test!(info.size, 1024, "size recorded");
    assert_eq_test!(info.dest, 7, "dest recorded");
    assert_eq_test!(info.flags.first_user(), 2, "flags recorded");

    assert_ok!(pool.mark_held(index, 3), "deliver");
    assert_eq_test!(pool.owner_of(index), Some(BufOwner::Held), "held");
    assert_eq_test!(pool.holder_of(index), Some(3), "holder recorded");

    assert_test!(pool.release(index), "return");
    assert_eq_test!(pool.owner_of(index), Some(BufOwner::Free), "free again");
    assert_eq_test!(pool.holder_of(index), None, "holder cleared");
    pass!()
}

pub fn test_pool_illegal_transitions() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 2, DmaMode::Coherent));

    // A free-listed buffer never completes: it is not at the device.
    assert_test!(
        pool.complete(0, 64, FrameFlags::default(), 0, 0).is_err(),
        "complete on listed buffer rejected"
    );
    // Arming a buffer still on the free list is a caller bug.
    assert_test!(pool.arm(0).is_err(), "arm on listed buffer rejected");

    let index = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(index));
    assert_test!(
        pool.mark_held(index, 1).is_err(),
        "armed buffer cannot be delivered before completion"
    );
    pass!()
}

pub fn test_pool_use_count_increments() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 1, DmaMode::Coherent));
    let index = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(index));
    assert_ok!(pool.complete(index, 16, FrameFlags::default(), 0, 0));
    assert_eq_test!(assert_ok!(pool.use_count(index)), 1, "first use");
    assert_ok!(pool.mark_held(index, 0));
    pool.release(index);

    let index = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(index));
    assert_ok!(pool.complete(index, 16, FrameFlags::default(), 0, 0));
    assert_eq_test!(assert_ok!(pool.use_count(index)), 2, "second use");
    pass!()
}

pub fn test_pool_to_hw_failure() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 2, DmaMode::Coherent));
    let index = assert_some!(pool.acquire_free());

    test_fixtures::set_mapping_valid(false);
    let result = pool.arm(index);
    test_fixtures::set_mapping_valid(true);

    assert_eq_test!(result, Err(DmaError::MappingFailed), "arm fails");
    assert_eq_test!(
        pool.owner_of(index),
        Some(BufOwner::Free),
        "no transition happened"
    );

    // The recovery path returns the buffer to the free list, producing
    // no Armed state.
    assert_test!(pool.release(index), "release after failed arm");
    assert_eq_test!(pool.free_count(), 2, "free count restored");
    pass!()
}

pub fn test_pool_streaming_sync_hooks() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 1, DmaMode::Streaming));
    let dev_before = test_fixtures::sync_for_device_count();
    let cpu_before = test_fixtures::sync_for_cpu_count();

    let index = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(index), "arm performs flush");
    assert_eq_test!(
        test_fixtures::sync_for_device_count(),
        dev_before + 1,
        "flush before device write"
    );

    assert_ok!(pool.complete(index, 32, FrameFlags::default(), 0, 0));
    assert_eq_test!(
        test_fixtures::sync_for_cpu_count(),
        cpu_before + 1,
        "invalidate after device write"
    );
    pass!()
}

pub fn test_pool_coherent_skips_sync() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 1, DmaMode::Coherent));
    let dev_before = test_fixtures::sync_for_device_count();

    let index = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(index));
    assert_eq_test!(
        test_fixtures::sync_for_device_count(),
        dev_before,
        "coherent mode needs no maintenance"
    );
    pass!()
}

pub fn test_pool_acp_rewrites_bus_handle() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 2, DmaMode::Acp));
    let bus = assert_ok!(pool.bus_handle(0));
    let phys = assert_ok!(pool.phys_of(0));
    assert_test!(
        bus.as_u64() & test_fixtures::ACP_APERTURE_BIT != 0,
        "device handle goes through the coherent aperture"
    );
    assert_test!(
        phys.as_u64() & test_fixtures::ACP_APERTURE_BIT == 0,
        "CPU-physical address is not rewritten"
    );
    // Completions carry the rewritten handle; lookup must use it.
    assert_eq_test!(pool.find_by_bus(bus), Some(0), "lookup by device handle");
    assert_eq_test!(pool.find_by_bus(phys), None, "raw phys does not match");
    pass!()
}

pub fn test_pool_release_held_by() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 4, DmaMode::Coherent));

    let a = assert_some!(pool.acquire_free());
    let b = assert_some!(pool.acquire_free());
    let c = assert_some!(pool.acquire_free());
    assert_ok!(pool.mark_held(a, 1));
    assert_ok!(pool.mark_held(b, 2));
    assert_ok!(pool.mark_held(c, 1));

    assert_eq_test!(pool.release_held_by(1), 2, "reclaims both of sub 1");
    assert_eq_test!(pool.owner_of(b), Some(BufOwner::Held), "sub 2 untouched");
    assert_eq_test!(pool.free_count(), 3, "two reclaimed plus one untouched");
    assert_eq_test!(pool.holder_of(a), None, "holder cleared");
    pass!()
}

pub fn test_pool_conservation() -> TestResult {
    let pool = assert_some!(make_pool(PoolKind::Rx, 0, 6, DmaMode::Coherent));

    let a = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(a));
    let b = assert_some!(pool.acquire_free());
    assert_ok!(pool.arm(b));
    assert_ok!(pool.complete(b, 8, FrameFlags::default(), 0, 0));
    let c = assert_some!(pool.acquire_free());
    assert_ok!(pool.mark_held(c, 0));

    let counts = pool.owner_counts();
    assert_eq_test!(
        counts.iter().sum::<u32>(),
        pool.len(),
        "every buffer is in exactly one state"
    );
    assert_eq_test!(counts, [3, 1, 1, 1], "free/armed/ready/held split");

    pool.force_all_free();
    assert_eq_test!(pool.free_count(), 6, "shutdown forces all free");
    assert_eq_test!(pool.holder_of(c), None, "holders cleared on shutdown");
    pass!()
}

axstream_lib::define_test_suite!(
    pool,
    [
        test_pool_create_indexing,
        test_pool_acquire_release,
        test_pool_exhaustion,
        test_pool_find_by_bus,
        test_pool_state_machine_cycle,
        test_pool_illegal_transitions,
        test_pool_use_count_increments,
        test_pool_to_hw_failure,
        test_pool_streaming_sync_hooks,
        test_pool_coherent_skips_sync,
        test_pool_acp_rewrites_bus_handle,
        test_pool_release_held_by,
        test_pool_conservation,
    ]
);
