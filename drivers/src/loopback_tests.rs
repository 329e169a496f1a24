//! End-to-end loopback scenarios against the descriptor-ring adapter.
//!
//! The suite plays the device side by hand: after each TX post it decodes
//! the posted words from the register window, copies the payload into an
//! armed RX buffer, deposits the RX completion and TX completion
//! descriptors in the rings, and fires the interrupt path.

use axstream_abi::dma::{
    DMA_ERR_FIFO, DMA_ERR_MAX, DMA_IOCTL_READ_INDEX_BULK, DMA_IOCTL_RET_INDEX_BULK,
    DMA_IOCTL_SET_MASK, DmaIndexArray, DmaRequest, FrameFlags,
};
use axstream_lib::testing::TestResult;
use axstream_lib::{assert_eq_test, assert_ok, assert_test, fail, pass};

use crate::dma::chardev::{dma_close, dma_ioctl, dma_open, dma_read, dma_set_async, dma_write};
use crate::dma::config::DmaConfig;
use crate::dma::device::DmaDevice;
use crate::dma::gen2::{
    G2_REG_IRQ_STATUS, G2_REG_RD_RING_HI, G2_REG_RD_RING_LO, G2_REG_TX_POST_HI, G2_REG_TX_POST_LO,
    G2_REG_WR_RING_HI, G2_REG_WR_RING_LO, G2RxDesc, G2_STAT_OVERFLOW, decode_tx_post,
    encode_rx_desc, encode_tx_completion,
};
use crate::test_fixtures;

const SLOT: usize = 0;

fn setup(tx_count: u32, rx_count: u32) -> Result<&'static DmaDevice, TestResult> {
    let config = DmaConfig {
        tx_count,
        rx_count,
        ..DmaConfig::default()
    };
    test_fixtures::fresh_device(SLOT, test_fixtures::gen2_window(), config)
        .map_err(|err| fail!("device register: {:?}", err))
}

fn ring_ptr(dev: &DmaDevice, lo_reg: usize, hi_reg: usize) -> *mut u64 {
    let lo = dev.regs.read_u32(lo_reg) as u64;
    let hi = dev.regs.read_u32(hi_reg) as u64;
    test_fixtures::bus_to_ptr((hi << 32) | lo) as *mut u64
}

fn fire_irq(dev: &DmaDevice) {
    dev.regs.write_u32(G2_REG_IRQ_STATUS, 1);
    let _ = dev.adapter.irq(dev);
    dev.regs.write_u32(G2_REG_IRQ_STATUS, 0);
}

/// Deposit a raw RX completion and service it.
fn inject_rx(dev: &DmaDevice, wr_slot: usize, desc: &G2RxDesc) {
    let ring = ring_ptr(dev, G2_REG_WR_RING_LO, G2_REG_WR_RING_HI);
    unsafe { ring.add(wr_slot).write_volatile(encode_rx_desc(desc)) };
    fire_irq(dev);
}

/// Hardware-loopback the most recent TX post into RX buffer `rx_index`:
/// copy the posted payload across, complete the transmit, and deliver
/// the receive. Returns the posted (size, flags, dest).
fn loopback_last_post(
    dev: &DmaDevice,
    wr_slot: usize,
    rd_slot: usize,
    rx_index: u32,
) -> (u32, FrameFlags, u8) {
    let lo = dev.regs.read_u32(G2_REG_TX_POST_LO);
    let hi = dev.regs.read_u32(G2_REG_TX_POST_HI);
    let (tx_index, size, flags, dest) = decode_tx_post(lo, hi);

    // Move the payload from the posted TX buffer into the RX buffer.
    let src = dev.tx_pool.data_ptr(tx_index).unwrap_or(core::ptr::null_mut());
    let dst = dev.rx_pool.data_ptr(rx_index).unwrap_or(core::ptr::null_mut());
    if !src.is_null() && !dst.is_null() {
        unsafe { core::ptr::copy_nonoverlapping(src, dst, size as usize) };
    }

    let rd_ring = ring_ptr(dev, G2_REG_RD_RING_LO, G2_REG_RD_RING_HI);
    unsafe { rd_ring.add(rd_slot).write_volatile(encode_tx_completion(tx_index)) };

    inject_rx(
        dev,
        wr_slot,
        &G2RxDesc {
            status: 0,
            index: rx_index,
            last_user: flags.last_user(),
            first_user: flags.first_user(),
            size,
            dest,
        },
    );
    (size, flags, dest)
}

fn lfsr_fill(buf: &mut [u8], mut state: u16) {
    for byte in buf.iter_mut() {
        let bit = (state ^ (state >> 2) ^ (state >> 3) ^ (state >> 5)) & 1;
        state = (state >> 1) | (bit << 15);
        *byte = state as u8;
    }
}

pub fn test_loopback_address_mode() -> TestResult {
    let dev = match setup(4, 8) {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1), 0, "claim dest 0");

    let mut src = [0u8; 1024];
    let mut dst = [0u8; 1024];
    let rx_base = dev.rx_pool.base();

    for i in 0..8u32 {
        lfsr_fill(&mut src, 0xACE1 + i as u16);

        let req = DmaRequest {
            data: src.as_ptr() as u64,
            dest: 0,
            flags: FrameFlags::from_parts(0x02, 0, false).0,
            index: 0,
            size: 1024,
            is32: 0,
            pad: 0,
        };
        assert_eq_test!(dma_write(&sub, &req), 1024, "write posts 1024 bytes");

        let rx_index = rx_base + (i % 8);
        loopback_last_post(dev, (i % 8) as usize, (i % 4) as usize, rx_index);

        dst.fill(0);
        let mut read_req = DmaRequest {
            data: dst.as_mut_ptr() as u64,
            size: 1024,
            ..DmaRequest::default()
        };
        assert_eq_test!(dma_read(&sub, &mut read_req, true), 1024, "read 1024 bytes");
        assert_eq_test!(read_req.size, 1024, "size round-trips");
        assert_eq_test!(read_req.dest, 0, "dest round-trips");
        assert_eq_test!(
            FrameFlags(read_req.flags).first_user(),
            0x02,
            "first-user round-trips"
        );
        assert_eq_test!(read_req.pad, 0, "no frame error");
        assert_test!(src == dst, "payload intact after loopback");
    }

    // Conservation: every buffer accounted for in exactly one state.
    let tx = dev.tx_pool.owner_counts();
    let rx = dev.rx_pool.owner_counts();
    assert_eq_test!(tx.iter().sum::<u32>(), 4, "tx conservation");
    assert_eq_test!(rx.iter().sum::<u32>(), 8, "rx conservation");
    assert_eq_test!(rx[1], 8, "all rx re-armed after address-mode reads");

    dma_close(&sub);
    pass!()
}

pub fn test_loopback_index_preserved() -> TestResult {
    let dev = match setup(4, 8) {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1), 0, "claim dest 0");

    let src = [7u8; 64];
    let req = DmaRequest {
        data: src.as_ptr() as u64,
        dest: 0,
        size: 64,
        ..DmaRequest::default()
    };
    assert_eq_test!(dma_write(&sub, &req), 64, "post");
    let rx_index = dev.rx_pool.base() + 5;
    loopback_last_post(dev, 0, 0, rx_index);

    // Index-mode read hands back the completed buffer's stable index.
    let mut read_req = DmaRequest::default();
    assert_eq_test!(dma_read(&sub, &mut read_req, true), 64, "index-mode read");
    assert_eq_test!(read_req.index, rx_index as i32, "index preserved end-to-end");

    assert_eq_test!(
        dma_ioctl(&sub, axstream_abi::dma::DMA_IOCTL_RET_INDEX, rx_index as u64),
        0,
        "held index returned"
    );
    dma_close(&sub);
    pass!()
}

pub fn test_loopback_bulk_index_mode() -> TestResult {
    let dev = match setup(4, 64) {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1), 0, "claim dest 0");

    let rx_base = dev.rx_pool.base();
    let mut src = [0u8; 256];
    for i in 0..64u32 {
        lfsr_fill(&mut src, 0x1D0 + i as u16);
        let size = 100 + i;
        let req = DmaRequest {
            data: src.as_ptr() as u64,
            dest: 0,
            size,
            ..DmaRequest::default()
        };
        assert_eq_test!(dma_write(&sub, &req), size as isize, "post frame");
        loopback_last_post(dev, i as usize, (i % 4) as usize, rx_base + i);
    }
    assert_eq_test!(sub.queue.ready_count(), 64, "all frames queued");

    let mut indices = [0u32; 64];
    let mut hdr = DmaIndexArray {
        max: 32,
        count: 0,
        indices: indices.as_mut_ptr() as u64,
    };
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_READ_INDEX_BULK, &mut hdr as *mut _ as u64),
        32,
        "first bulk read returns 32"
    );
    for (n, &index) in indices[..32].iter().enumerate() {
        assert_test!(
            dev.rx_pool.contains(index),
            "bulk index {} in the rx range",
            n
        );
        let info = assert_ok!(dev.rx_pool.frame_info(index));
        assert_eq_test!(info.size, 100 + n as u32, "size matches transmit");
    }

    let mut second = [0u32; 64];
    hdr.indices = second.as_mut_ptr() as u64;
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_READ_INDEX_BULK, &mut hdr as *mut _ as u64),
        32,
        "second bulk read returns 32"
    );
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_READ_INDEX_BULK, &mut hdr as *mut _ as u64),
        0,
        "third bulk read is empty"
    );

    // Return everything; the pool must be whole again.
    let ret = DmaIndexArray {
        max: 0,
        count: 32,
        indices: indices.as_ptr() as u64,
    };
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_RET_INDEX_BULK, &ret as *const _ as u64),
        0,
        "bulk return first half"
    );
    let ret = DmaIndexArray {
        max: 0,
        count: 32,
        indices: second.as_ptr() as u64,
    };
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_RET_INDEX_BULK, &ret as *const _ as u64),
        0,
        "bulk return second half"
    );
    assert_eq_test!(dev.rx_pool.owner_counts()[1], 64, "all rx armed again");
    assert_eq_test!(dev.rx_pool.free_count(), 0, "free list restored");

    dma_close(&sub);
    pass!()
}

pub fn test_close_with_inflight_traffic() -> TestResult {
    let dev = match setup(4, 8) {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let (tx_free_before, rx_free_before) = dev.free_counts();
    let rx_armed_before = dev.rx_pool.owner_counts()[1];

    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1 << 5), 0, "claim dest 5");

    // Frames land and queue up; the subscriber never reads them.
    let rx_base = dev.rx_pool.base();
    for i in 0..3u32 {
        inject_rx(
            dev,
            i as usize,
            &G2RxDesc {
                status: 0,
                index: rx_base + i,
                last_user: 0,
                first_user: 0,
                size: 512,
                dest: 5,
            },
        );
    }
    assert_eq_test!(sub.queue.ready_count(), 3, "three frames in flight");

    dma_close(&sub);

    assert_eq_test!(dev.free_counts(), (tx_free_before, rx_free_before), "free lists restored");
    assert_eq_test!(
        dev.rx_pool.owner_counts()[1],
        rx_armed_before,
        "drained buffers re-armed to hardware"
    );
    assert_eq_test!(dev.dest_table.owner_id(5), None, "destination 5 unowned");

    // A completion racing the close finds no owner and re-arms.
    inject_rx(
        dev,
        3,
        &G2RxDesc {
            status: 0,
            index: rx_base + 3,
            last_user: 0,
            first_user: 0,
            size: 512,
            dest: 5,
        },
    );
    assert_eq_test!(dev.rx_pool.owner_counts()[1], rx_armed_before, "still armed");

    // The next subscriber claims 5 without conflict.
    let sub2 = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub2, DMA_IOCTL_SET_MASK, 1 << 5), 0, "reclaim dest 5");
    dma_close(&sub2);
    pass!()
}

pub fn test_oversized_frame_reports_errors() -> TestResult {
    let dev = match setup(4, 8) {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1), 0, "claim dest 0");

    // A frame larger than the buffer arrives as a zero-size descriptor
    // with the overflow status bit set.
    inject_rx(
        dev,
        0,
        &G2RxDesc {
            status: G2_STAT_OVERFLOW,
            index: dev.rx_pool.base(),
            last_user: 0,
            first_user: 0,
            size: 0,
            dest: 0,
        },
    );

    let mut req = DmaRequest::default();
    assert_eq_test!(dma_read(&sub, &mut req, true), 0, "zero-size delivery");
    assert_test!(req.pad & DMA_ERR_FIFO != 0, "framing error reported");
    assert_test!(req.pad & DMA_ERR_MAX != 0, "overflow reported");

    assert_eq_test!(
        dma_ioctl(&sub, axstream_abi::dma::DMA_IOCTL_RET_INDEX, req.index as u64),
        0,
        "errored buffer returned"
    );
    dma_close(&sub);
    pass!()
}

pub fn test_async_notify_per_transition() -> TestResult {
    let dev = match setup(4, 8) {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1), 0, "claim dest 0");

    test_fixtures::reset_signals();
    let pgid = test_fixtures::test_pgid();
    dma_set_async(&sub, pgid);

    let rx_base = dev.rx_pool.base();
    inject_rx(
        dev,
        0,
        &G2RxDesc {
            status: 0,
            index: rx_base,
            last_user: 0,
            first_user: 0,
            size: 64,
            dest: 0,
        },
    );
    assert_eq_test!(test_fixtures::signals_sent(pgid), 1, "one signal on first frame");

    // Drain and re-empty; the next frame is a fresh transition.
    let mut dst = [0u8; 64];
    let mut req = DmaRequest {
        data: dst.as_mut_ptr() as u64,
        size: 64,
        ..DmaRequest::default()
    };
    assert_eq_test!(dma_read(&sub, &mut req, true), 64, "drain the queue");

    inject_rx(
        dev,
        1,
        &G2RxDesc {
            status: 0,
            index: rx_base + 1,
            last_user: 0,
            first_user: 0,
            size: 64,
            dest: 0,
        },
    );
    assert_eq_test!(
        test_fixtures::signals_sent(pgid),
        2,
        "exactly one further signal"
    );

    dma_close(&sub);
    pass!()
}

axstream_lib::define_test_suite!(
    loopback,
    [
        test_loopback_address_mode,
        test_loopback_index_preserved,
        test_loopback_bulk_index_mode,
        test_close_with_inflight_traffic,
        test_async_notify_per_transition,
        test_oversized_frame_reports_errors,
    ]
);
