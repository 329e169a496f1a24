//! Tests for destination claims: mutual exclusion, all-or-nothing
//! failure, device-mask enforcement, and release on close.

use axstream_abi::dma::DestMask;
use axstream_lib::testing::TestResult;
use axstream_lib::{assert_eq_test, assert_ok, assert_test, fail, pass};

use crate::dma::chardev::{dma_close, dma_open};
use crate::dma::config::DmaConfig;
use crate::dma::gen2::G2_REG_DEST_CAP;
use crate::dma::types::DmaError;
use crate::test_fixtures;

const SLOT: usize = 0;

fn mask_of(dests: &[u8]) -> DestMask {
    let mut mask = DestMask::empty();
    for &dest in dests {
        mask.set(dest);
    }
    mask
}

pub fn test_dest_claim_conflict_is_all_or_nothing() -> TestResult {
    let dev = match test_fixtures::fresh_device(SLOT, test_fixtures::gen2_window(), DmaConfig::default()) {
        Ok(dev) => dev,
        Err(err) => return fail!("device register: {:?}", err),
    };

    let sub_a = assert_ok!(dma_open(SLOT), "open A");
    let sub_b = assert_ok!(dma_open(SLOT), "open B");

    assert_ok!(
        dev.dest_table.claim(&sub_a, mask_of(&[0, 1, 2]), &dev.dest_mask),
        "A claims 0,1,2"
    );

    // B overlaps on 2: the whole claim must fail and change nothing.
    assert_eq_test!(
        dev.dest_table.claim(&sub_b, mask_of(&[2, 3]), &dev.dest_mask),
        Err(DmaError::DestinationBusy),
        "conflict reported"
    );
    assert_eq_test!(dev.dest_table.owner_id(2), Some(sub_a.id), "A keeps 2");
    assert_eq_test!(dev.dest_table.owner_id(3), None, "3 not claimed");
    assert_test!(sub_b.claimed.lock().is_empty(), "B's mask unchanged");

    assert_ok!(
        dev.dest_table.claim(&sub_b, mask_of(&[3]), &dev.dest_mask),
        "B claims 3"
    );
    assert_eq_test!(dev.dest_table.owner_id(3), Some(sub_b.id), "B owns 3");

    dma_close(&sub_a);
    dma_close(&sub_b);
    pass!()
}

pub fn test_dest_reclaim_replaces_mask() -> TestResult {
    let dev = match test_fixtures::fresh_device(SLOT, test_fixtures::gen2_window(), DmaConfig::default()) {
        Ok(dev) => dev,
        Err(err) => return fail!("device register: {:?}", err),
    };
    let sub = assert_ok!(dma_open(SLOT));

    assert_ok!(dev.dest_table.claim(&sub, mask_of(&[10, 11]), &dev.dest_mask));
    assert_ok!(dev.dest_table.claim(&sub, mask_of(&[11, 12]), &dev.dest_mask));

    assert_eq_test!(dev.dest_table.owner_id(10), None, "10 released");
    assert_eq_test!(dev.dest_table.owner_id(11), Some(sub.id), "11 kept");
    assert_eq_test!(dev.dest_table.owner_id(12), Some(sub.id), "12 added");
    assert_eq_test!(sub.claimed.lock().count(), 2, "mask tracks the claim");

    dma_close(&sub);
    pass!()
}

pub fn test_dest_claim_outside_device_mask() -> TestResult {
    // A card advertising only 4 destinations.
    let regs = test_fixtures::gen2_window();
    regs.write_u32(G2_REG_DEST_CAP, 4);
    let dev = match test_fixtures::fresh_device(SLOT, regs, DmaConfig::default()) {
        Ok(dev) => dev,
        Err(err) => return fail!("device register: {:?}", err),
    };
    assert_eq_test!(dev.dest_mask.count(), 4, "capability mask from hardware");

    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(
        dev.dest_table.claim(&sub, mask_of(&[5]), &dev.dest_mask),
        Err(DmaError::InvalidArgument),
        "claim outside the card's mask rejected"
    );
    assert_ok!(
        dev.dest_table.claim(&sub, mask_of(&[0, 3]), &dev.dest_mask),
        "claim inside the mask accepted"
    );

    dma_close(&sub);
    pass!()
}

pub fn test_dest_close_releases_claims() -> TestResult {
    let dev = match test_fixtures::fresh_device(SLOT, test_fixtures::gen2_window(), DmaConfig::default()) {
        Ok(dev) => dev,
        Err(err) => return fail!("device register: {:?}", err),
    };

    let sub = assert_ok!(dma_open(SLOT));
    assert_ok!(dev.dest_table.claim(&sub, mask_of(&[5]), &dev.dest_mask));
    assert_eq_test!(dev.dest_table.owner_id(5), Some(sub.id), "claimed");
    dma_close(&sub);
    assert_eq_test!(dev.dest_table.owner_id(5), None, "released on close");

    // The next subscriber claims 5 without conflict.
    let sub2 = assert_ok!(dma_open(SLOT));
    assert_ok!(dev.dest_table.claim(&sub2, mask_of(&[5]), &dev.dest_mask));
    dma_close(&sub2);
    pass!()
}

axstream_lib::define_test_suite!(
    dest,
    [
        test_dest_claim_conflict_is_all_or_nothing,
        test_dest_reclaim_replaces_mask,
        test_dest_claim_outside_device_mask,
        test_dest_close_releases_claims,
    ]
);
