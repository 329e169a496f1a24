//! Tests for the character-device surface: record layout, the ioctl
//! dispatcher, read/write modes, poll, and the mmap view.

extern crate alloc;

use core::mem::{offset_of, size_of};

use axstream_abi::dma::{
    DMA_API_VERSION, DMA_IOCTL_ADAPTER_ACK, DMA_IOCTL_GET_BUF_SIZE, DMA_IOCTL_GET_RX_COUNT,
    DMA_IOCTL_GET_TX_INDEX, DMA_IOCTL_GET_VERSION, DMA_IOCTL_READ_READY, DMA_IOCTL_READ_REG,
    DMA_IOCTL_RET_INDEX, DMA_IOCTL_SET_DEBUG, DMA_IOCTL_SET_MASK, DMA_IOCTL_WRITE_REG,
    DmaRegisterOp, DmaRequest, FrameFlags,
};
use axstream_lib::testing::TestResult;
use axstream_lib::{assert_eq_test, assert_ok, assert_test, fail, pass};

use crate::dma::buffer::BufOwner;
use crate::dma::chardev::{
    PollFlags, dma_close, dma_ioctl, dma_mmap_len, dma_mmap_phys, dma_open, dma_poll, dma_read,
    dma_write,
};
use crate::dma::config::DmaConfig;
use crate::dma::device::DmaDevice;
use crate::dma::gen2::{G2_REG_IRQ_STATUS, G2_REG_LOOPBACK, encode_rx_desc, G2RxDesc};
use crate::dma::gen2::{G2_REG_WR_RING_HI, G2_REG_WR_RING_LO};
use crate::dma::types::DmaError;
use crate::test_fixtures;

const SLOT: usize = 3;

fn setup() -> Result<&'static DmaDevice, TestResult> {
    let config = DmaConfig {
        tx_count: 4,
        rx_count: 8,
        ..DmaConfig::default()
    };
    test_fixtures::fresh_device(SLOT, test_fixtures::gen2_window(), config)
        .map_err(|err| fail!("device register: {:?}", err))
}

/// Deposit one RX completion and run the interrupt path.
fn inject(dev: &DmaDevice, slot: usize, index: u32, size: u32, dest: u8) {
    let lo = dev.regs.read_u32(G2_REG_WR_RING_LO) as u64;
    let hi = dev.regs.read_u32(G2_REG_WR_RING_HI) as u64;
    let ring = test_fixtures::bus_to_ptr((hi << 32) | lo) as *mut u64;
    let desc = G2RxDesc {
        status: 0,
        index,
        last_user: 0,
        first_user: 0,
        size,
        dest,
    };
    unsafe { ring.add(slot).write_volatile(encode_rx_desc(&desc)) };
    dev.regs.write_u32(G2_REG_IRQ_STATUS, 1);
    let _ = dev.adapter.irq(dev);
    dev.regs.write_u32(G2_REG_IRQ_STATUS, 0);
}

pub fn test_request_record_layout() -> TestResult {
    // The record layout is frozen ABI shared with existing userland
    // tools; 32-bit and 64-bit callers use the same 32 bytes.
    assert_eq_test!(size_of::<DmaRequest>(), 32, "record size");
    assert_eq_test!(offset_of!(DmaRequest, data), 0, "data offset");
    assert_eq_test!(offset_of!(DmaRequest, dest), 8, "dest offset");
    assert_eq_test!(offset_of!(DmaRequest, flags), 12, "flags offset");
    assert_eq_test!(offset_of!(DmaRequest, index), 16, "index offset");
    assert_eq_test!(offset_of!(DmaRequest, size), 20, "size offset");
    assert_eq_test!(offset_of!(DmaRequest, is32), 24, "is32 offset");
    assert_eq_test!(offset_of!(DmaRequest, pad), 28, "pad offset");
    pass!()
}

pub fn test_flags_encoding() -> TestResult {
    let flags = FrameFlags::from_parts(0xAB, 0xCD, true);
    assert_eq_test!(flags.0 & 0xFF, 0xAB, "first-user bits [7:0]");
    assert_eq_test!((flags.0 >> 8) & 0xFF, 0xCD, "last-user bits [15:8]");
    assert_test!(flags.0 & (1 << 16) != 0, "continuation bit 16");
    pass!()
}

pub fn test_open_unregistered_slot() -> TestResult {
    test_fixtures::install();
    assert_eq_test!(
        dma_open(99).err(),
        Some(DmaError::NotAvailable),
        "no device in the slot"
    );
    pass!()
}

pub fn test_open_subscriber_limit() -> TestResult {
    if let Err(result) = setup() {
        return result;
    }

    let mut subs = alloc::vec::Vec::new();
    for _ in 0..crate::dma::device::MAX_SUBSCRIBERS {
        match dma_open(SLOT) {
            Ok(sub) => subs.push(sub),
            Err(err) => return fail!("open within limit: {:?}", err),
        }
    }
    assert_eq_test!(
        dma_open(SLOT).err(),
        Some(DmaError::TooManySubscribers),
        "limit enforced"
    );
    for sub in &subs {
        dma_close(sub);
    }
    // Slots recycle after close.
    let sub = assert_ok!(dma_open(SLOT), "open after close");
    dma_close(&sub);
    pass!()
}

pub fn test_ioctl_basics() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));

    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_GET_RX_COUNT, 0),
        8,
        "rx buffer count"
    );
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_GET_BUF_SIZE, 0),
        dev.config.buf_size as i64,
        "buffer size"
    );
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_GET_VERSION, 0),
        DMA_API_VERSION as i64,
        "api version"
    );
    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_READ_READY, 0), 0, "nothing ready");
    assert_eq_test!(
        dma_ioctl(&sub, 0x9999, 0),
        DmaError::NotSupported.to_errno() as i64,
        "unknown code"
    );

    dma_close(&sub);
    pass!()
}

pub fn test_ioctl_set_debug() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));

    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_DEBUG, 2), 0, "set accepted");
    assert_eq_test!(
        dev.debug.load(core::sync::atomic::Ordering::Relaxed),
        2,
        "device level stored"
    );
    assert_test!(
        sub.debug.load(core::sync::atomic::Ordering::Relaxed),
        "subscriber flag set"
    );

    dma_close(&sub);
    pass!()
}

pub fn test_ioctl_set_mask_conflict() -> TestResult {
    if let Err(result) = setup() {
        return result;
    }
    let sub_a = assert_ok!(dma_open(SLOT));
    let sub_b = assert_ok!(dma_open(SLOT));

    assert_eq_test!(dma_ioctl(&sub_a, DMA_IOCTL_SET_MASK, 0b0111), 0, "A claims 0-2");
    assert_eq_test!(
        dma_ioctl(&sub_b, DMA_IOCTL_SET_MASK, 0b1100),
        DmaError::DestinationBusy.to_errno() as i64,
        "B conflicts on 2"
    );
    assert_eq_test!(dma_ioctl(&sub_b, DMA_IOCTL_SET_MASK, 0b1000), 0, "B claims 3");

    dma_close(&sub_a);
    dma_close(&sub_b);
    pass!()
}

pub fn test_ioctl_tx_index_and_return_errors() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));

    let index = dma_ioctl(&sub, DMA_IOCTL_GET_TX_INDEX, 0);
    assert_test!(index >= 0, "tx index granted");
    assert_eq_test!(
        dev.tx_pool.owner_of(index as u32),
        Some(BufOwner::Held),
        "granted buffer is held"
    );
    assert_eq_test!(
        dev.tx_pool.holder_of(index as u32),
        Some(sub.id),
        "held by this subscriber"
    );

    // Returning a TX index through the RX return path is a bad index.
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_RET_INDEX, index as u64),
        DmaError::BadIndex.to_errno() as i64,
        "tx index rejected by rx return"
    );
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_RET_INDEX, 4095),
        DmaError::BadIndex.to_errno() as i64,
        "out-of-range index rejected"
    );

    dma_close(&sub);
    // Close reclaims the held TX buffer.
    assert_eq_test!(dev.tx_pool.free_count(), 4, "tx pool restored");
    pass!()
}

pub fn test_ioctl_register_access() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));

    let mut op = DmaRegisterOp {
        address: G2_REG_LOOPBACK as u32,
        data: 0xCAFE_F00D,
    };
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_WRITE_REG, &op as *const _ as u64),
        0,
        "register write"
    );
    assert_eq_test!(
        dev.regs.read_u32(G2_REG_LOOPBACK),
        0xCAFE_F00D,
        "value landed"
    );

    op.data = 0;
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_READ_REG, &mut op as *mut _ as u64),
        0,
        "register read"
    );
    assert_eq_test!(op.data, 0xCAFE_F00D, "read back");

    op.address = (test_fixtures::REGS_WINDOW_LEN + 4) as u32;
    assert_eq_test!(
        dma_ioctl(&sub, DMA_IOCTL_WRITE_REG, &op as *const _ as u64),
        DmaError::InvalidArgument.to_errno() as i64,
        "out-of-window offset rejected"
    );

    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_ADAPTER_ACK, 0), 0, "adapter ack");

    dma_close(&sub);
    pass!()
}

pub fn test_read_nonblocking_empty() -> TestResult {
    if let Err(result) = setup() {
        return result;
    }
    let sub = assert_ok!(dma_open(SLOT));
    let mut req = DmaRequest::default();
    assert_eq_test!(dma_read(&sub, &mut req, true), 0, "empty queue reads zero");
    dma_close(&sub);
    pass!()
}

pub fn test_write_argument_validation() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));
    let payload = [0u8; 8];

    let mut req = DmaRequest {
        data: payload.as_ptr() as u64,
        size: 0,
        ..DmaRequest::default()
    };
    assert_eq_test!(
        dma_write(&sub, &req),
        DmaError::InvalidArgument.to_errno() as isize,
        "zero size rejected"
    );

    req.size = dev.config.buf_size + 1;
    assert_eq_test!(
        dma_write(&sub, &req),
        DmaError::InvalidArgument.to_errno() as isize,
        "oversized write rejected"
    );

    // Index mode with a buffer this subscriber does not hold.
    let req = DmaRequest {
        data: 0,
        index: 0,
        size: 64,
        ..DmaRequest::default()
    };
    assert_eq_test!(
        dma_write(&sub, &req),
        DmaError::BadIndex.to_errno() as isize,
        "unheld index rejected"
    );

    dma_close(&sub);
    pass!()
}

pub fn test_poll_readiness() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let sub = assert_ok!(dma_open(SLOT));

    assert_eq_test!(
        dma_poll(&sub),
        PollFlags::WRITABLE,
        "free tx, empty queue"
    );

    assert_eq_test!(dma_ioctl(&sub, DMA_IOCTL_SET_MASK, 1), 0, "claim dest 0");
    inject(dev, 0, dev.rx_pool.base(), 128, 0);
    assert_test!(
        dma_poll(&sub).contains(PollFlags::READABLE),
        "queued frame is readable"
    );

    dma_close(&sub);
    pass!()
}

pub fn test_mmap_view() -> TestResult {
    let dev = match setup() {
        Ok(dev) => dev,
        Err(result) => return result,
    };
    let buf_size = dev.config.buf_size as u64;
    assert_eq_test!(dma_mmap_len(dev), 12 * buf_size, "view covers both pools");

    // Buffer k sits at offset k * buf_size; bytes alias the pool memory.
    let index = dev.rx_pool.base();
    let offset = index as u64 * buf_size + 17;
    let phys = match dma_mmap_phys(dev, offset) {
        Some(phys) => phys,
        None => return fail!("offset should translate"),
    };

    let data = assert_ok!(dev.rx_pool.data_ptr(index));
    unsafe { data.add(17).write(0x7E) };
    let aliased = unsafe { test_fixtures::bus_to_ptr(phys.as_u64()).read() };
    assert_eq_test!(aliased, 0x7E, "mmap offset aliases the buffer byte");

    assert_test!(
        dma_mmap_phys(dev, dma_mmap_len(dev)).is_none(),
        "offset past the view rejected"
    );
    pass!()
}

axstream_lib::define_test_suite!(
    chardev,
    [
        test_request_record_layout,
        test_flags_encoding,
        test_open_unregistered_slot,
        test_open_subscriber_limit,
        test_ioctl_basics,
        test_ioctl_set_debug,
        test_ioctl_set_mask_conflict,
        test_ioctl_tx_index_and_return_errors,
        test_ioctl_register_access,
        test_read_nonblocking_empty,
        test_write_argument_validation,
        test_poll_readiness,
        test_mmap_view,
    ]
);
