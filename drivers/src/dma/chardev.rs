//! The character-device surface: one open = one subscriber.
//!
//! The platform's file-operations glue copies the 32-byte request record
//! in and out and forwards here; payload addresses inside the record are
//! caller addresses the platform has already validated and mapped. Byte
//! layouts live in `axstream-abi` and are frozen.

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use axstream_abi::addr::PhysAddr;
use axstream_abi::dma::{
    DMA_API_VERSION, DMA_IOCTL_ADAPTER_ACK, DMA_IOCTL_GET_BUF_SIZE, DMA_IOCTL_GET_RX_COUNT,
    DMA_IOCTL_GET_TX_INDEX, DMA_IOCTL_GET_VERSION, DMA_IOCTL_HW_BASE, DMA_IOCTL_HW_LAST,
    DMA_IOCTL_READ_INDEX_BULK, DMA_IOCTL_READ_READY, DMA_IOCTL_READ_REG, DMA_IOCTL_RET_INDEX,
    DMA_IOCTL_RET_INDEX_BULK, DMA_IOCTL_SET_DEBUG, DMA_IOCTL_SET_MASK, DMA_IOCTL_SET_MASK_EXT,
    DMA_IOCTL_WRITE_REG, DestMask, DmaIndexArray, DmaRegisterOp, DmaRequest, FrameFlags,
};
use axstream_lib::{IrqMutex, klog_debug};
use bitflags::bitflags;

use super::buffer::BufOwner;
use super::device::{DEV_READY, DmaDevice, MAX_SUBSCRIBERS, device_get};
use super::queue::SubQueue;
use super::types::DmaError;

bitflags! {
    /// Poll readiness, POLLIN/POLLOUT bit positions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PollFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 2;
    }
}

/// One open of the character device.
pub struct DmaSubscriber {
    /// Slot in the device's subscriber table; unique while open.
    pub id: u32,
    /// The owning device. Stable for the subscriber's lifetime: close
    /// removes the subscriber before teardown drops the device box.
    dev: *const DmaDevice,
    /// READY-buffer queue plus wait primitive and async registration.
    pub queue: SubQueue,
    /// Claimed destinations; written only under the destination-table
    /// lock (table lock < mask lock).
    pub claimed: IrqMutex<DestMask>,
    /// Per-subscriber debug chatter.
    pub debug: AtomicBool,
}

// SAFETY: the raw device pointer targets the registry's boxed device,
// which outlives every subscriber (close_all_subscribers runs before the
// box drops). All mutable state behind the pointer is lock-protected.
unsafe impl Send for DmaSubscriber {}
unsafe impl Sync for DmaSubscriber {}

impl DmaSubscriber {
    #[inline]
    pub fn device(&self) -> &DmaDevice {
        // SAFETY: see the Send/Sync justification above.
        unsafe { &*self.dev }
    }
}

// =============================================================================
// open / close
// =============================================================================

/// Open the device in registry slot `slot`, creating a subscriber.
/// Fails "not available" during teardown.
pub fn dma_open(slot: usize) -> Result<Arc<DmaSubscriber>, DmaError> {
    let dev = device_get(slot).ok_or(DmaError::NotAvailable)?;
    if dev.state.get() != DEV_READY {
        return Err(DmaError::NotAvailable);
    }

    let mut subs = dev.subscribers.lock();
    let free = subs
        .iter()
        .position(Option::is_none)
        .ok_or(DmaError::TooManySubscribers)?;

    let sub = Arc::new(DmaSubscriber {
        id: free as u32,
        dev: dev as *const DmaDevice,
        queue: SubQueue::with_capacity(dev.config.rx_count as usize),
        claimed: IrqMutex::new(DestMask::empty()),
        debug: AtomicBool::new(false),
    });
    subs[free] = Some(sub.clone());
    Ok(sub)
}

/// Close a subscriber: release its destination claims first (so racing
/// completions re-arm to hardware), cancel and drain its queue, reclaim
/// everything it held, re-arm the reclaimed RX buffers, and free the
/// subscriber slot.
pub fn dma_close(sub: &Arc<DmaSubscriber>) {
    let dev = sub.device();

    dev.dest_table.release_all(sub.id);
    sub.queue.cancel(|index| {
        dev.rx_pool.release(index);
    });
    dev.rx_pool.release_held_by(sub.id);
    dev.tx_pool.release_held_by(sub.id);

    // Put the reclaimed RX buffers back in the device's hands; receive
    // stalls otherwise. Bounded: an arm failure releases the buffer back
    // to the free list and a retry would spin.
    if dev.state.get() == DEV_READY {
        for _ in 0..dev.config.rx_count {
            let Some(index) = dev.rx_pool.acquire_free() else {
                break;
            };
            let _ = dev.adapter.return_rx_buffer(dev, index);
        }
    }

    let mut subs = dev.subscribers.lock();
    if let Some(entry) = subs.get_mut(sub.id as usize) {
        if entry.as_ref().is_some_and(|s| Arc::ptr_eq(s, sub)) {
            *entry = None;
        }
    }
}

/// Force-close every subscriber of a device. Teardown path.
pub(crate) fn close_all_subscribers(dev: &DmaDevice) {
    for slot in 0..MAX_SUBSCRIBERS {
        let sub = { dev.subscribers.lock()[slot].clone() };
        if let Some(sub) = sub {
            dma_close(&sub);
        }
    }
}

// =============================================================================
// read / write
// =============================================================================

/// Dequeue one ready frame.
///
/// Address mode (`req.data` nonzero): the payload is copied out to the
/// caller's buffer and the DMA buffer is immediately re-armed. Index mode
/// (`req.data` zero): only the index is returned and the buffer stays
/// held until returned by ioctl. Returns the payload size, 0 when empty
/// in non-blocking mode, or a negative errno.
pub fn dma_read(sub: &DmaSubscriber, req: &mut DmaRequest, nonblock: bool) -> isize {
    let dev = sub.device();
    if dev.state.get() != DEV_READY {
        return DmaError::NotAvailable.to_errno() as isize;
    }

    let index = match sub.queue.pop(None, nonblock) {
        Ok(Some(index)) => index,
        Ok(None) => return 0,
        Err(err) => return err.to_errno() as isize,
    };

    let info = match dev.rx_pool.frame_info(index) {
        Ok(info) => info,
        Err(err) => return err.to_errno() as isize,
    };
    if dev.rx_pool.mark_held(index, sub.id).is_err() {
        return DmaError::BadIndex.to_errno() as isize;
    }

    req.dest = info.dest as u32;
    req.flags = info.flags.0;
    req.size = info.size;
    req.pad = info.error;

    if sub.debug.load(Ordering::Relaxed) {
        klog_debug!(
            "dma{}: read sub {} buffer {} size {} err {:#x}",
            dev.index,
            sub.id,
            index,
            info.size,
            info.error
        );
    }

    if req.data != 0 {
        let n = info.size.min(req.size) as usize;
        let src = match dev.rx_pool.data_ptr(index) {
            Ok(ptr) => ptr,
            Err(err) => return err.to_errno() as isize,
        };
        // SAFETY: the buffer is held by this subscriber; `req.data` is a
        // caller address the platform glue validated and mapped.
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, req.data as *mut u8, n);
        }
        let _ = dev.adapter.return_rx_buffer(dev, index);
        n as isize
    } else {
        req.index = index as i32;
        info.size as isize
    }
}

/// Post one frame.
///
/// Address mode (`req.data` nonzero): a free TX buffer is acquired, the
/// payload copied in, and the buffer posted. Index mode: the caller's
/// already-populated TX buffer at `req.index` is posted. Returns the
/// posted size, 0 when no TX buffer is free, or a negative errno.
pub fn dma_write(sub: &DmaSubscriber, req: &DmaRequest) -> isize {
    let dev = sub.device();
    if dev.state.get() != DEV_READY {
        return DmaError::NotAvailable.to_errno() as isize;
    }
    if req.size == 0 || req.size > dev.config.buf_size || req.dest > 0xFF {
        return DmaError::InvalidArgument.to_errno() as isize;
    }

    let flags = FrameFlags(req.flags);
    let dest = req.dest as u8;

    let index = if req.data != 0 {
        let Some(index) = dev.tx_pool.acquire_free() else {
            return 0;
        };
        let dst = match dev.tx_pool.data_ptr(index) {
            Ok(ptr) => ptr,
            Err(err) => {
                dev.tx_pool.release(index);
                return err.to_errno() as isize;
            }
        };
        // SAFETY: the buffer was just detached from the free list and is
        // exclusively ours; `req.data` is a validated caller address.
        unsafe {
            core::ptr::copy_nonoverlapping(req.data as *const u8, dst, req.size as usize);
        }
        index
    } else {
        if req.index < 0 {
            return DmaError::BadIndex.to_errno() as isize;
        }
        let index = req.index as u32;
        if !dev.tx_pool.contains(index)
            || dev.tx_pool.holder_of(index) != Some(sub.id)
            || dev.tx_pool.owner_of(index) != Some(BufOwner::Held)
        {
            return DmaError::BadIndex.to_errno() as isize;
        }
        index
    };

    if let Err(err) = dev.tx_pool.set_frame(index, req.size, flags, dest) {
        dev.tx_pool.release(index);
        return err.to_errno() as isize;
    }

    if sub.debug.load(Ordering::Relaxed) {
        klog_debug!(
            "dma{}: write sub {} buffer {} size {} dest {}",
            dev.index,
            sub.id,
            index,
            req.size,
            dest
        );
    }

    match dev.adapter.send_buffer(dev, index) {
        Ok(()) => {
            let mut stats = dev.stats.lock();
            stats.tx_frames += 1;
            stats.tx_bytes += req.size as u64;
            drop(stats);
            req.size as isize
        }
        Err(err) => {
            // send_buffer already bounced the buffer to the free list.
            dev.stats.lock().tx_errors += 1;
            err.to_errno() as isize
        }
    }
}

// =============================================================================
// ioctl
// =============================================================================

/// The ioctl dispatcher. Returns a non-negative result value or a
/// negative errno.
pub fn dma_ioctl(sub: &Arc<DmaSubscriber>, code: u32, arg: u64) -> i64 {
    let dev = sub.device();
    if dev.state.get() != DEV_READY {
        return DmaError::NotAvailable.to_errno() as i64;
    }

    match code {
        DMA_IOCTL_GET_RX_COUNT => dev.config.rx_count as i64,
        DMA_IOCTL_GET_BUF_SIZE => dev.config.buf_size as i64,
        DMA_IOCTL_GET_VERSION => DMA_API_VERSION as i64,
        DMA_IOCTL_READ_READY => sub.queue.ready_count() as i64,

        DMA_IOCTL_SET_DEBUG => {
            dev.debug.store(arg as u32, Ordering::Relaxed);
            sub.debug.store(arg != 0, Ordering::Relaxed);
            0
        }

        DMA_IOCTL_SET_MASK => claim_mask(dev, sub, DestMask::from_low32(arg as u32)),
        DMA_IOCTL_SET_MASK_EXT => {
            if arg == 0 {
                return DmaError::Fault.to_errno() as i64;
            }
            // SAFETY: validated caller pointer per the platform contract.
            let mask = unsafe { *(arg as *const DestMask) };
            claim_mask(dev, sub, mask)
        }

        DMA_IOCTL_RET_INDEX => errno_or_zero(return_held_index(dev, sub, arg as u32)),

        DMA_IOCTL_GET_TX_INDEX => match dev.tx_pool.acquire_free() {
            Some(index) => match dev.tx_pool.mark_held(index, sub.id) {
                Ok(()) => index as i64,
                Err(err) => {
                    dev.tx_pool.release(index);
                    err.to_errno() as i64
                }
            },
            None => DmaError::NoBufferSpace.to_errno() as i64,
        },

        DMA_IOCTL_READ_INDEX_BULK => bulk_read(dev, sub, arg),
        DMA_IOCTL_RET_INDEX_BULK => bulk_return(dev, sub, arg),

        DMA_IOCTL_WRITE_REG => {
            if arg == 0 {
                return DmaError::Fault.to_errno() as i64;
            }
            // SAFETY: validated caller pointer per the platform contract.
            let op = unsafe { *(arg as *const DmaRegisterOp) };
            if !dev.regs.offset_valid(op.address as usize, 4) {
                return DmaError::InvalidArgument.to_errno() as i64;
            }
            let _guard = dev.command_lock.lock();
            dev.regs.write_u32(op.address as usize, op.data);
            0
        }
        DMA_IOCTL_READ_REG => {
            if arg == 0 {
                return DmaError::Fault.to_errno() as i64;
            }
            // SAFETY: validated caller pointer per the platform contract.
            let op = unsafe { &mut *(arg as *mut DmaRegisterOp) };
            if !dev.regs.offset_valid(op.address as usize, 4) {
                return DmaError::InvalidArgument.to_errno() as i64;
            }
            let _guard = dev.command_lock.lock();
            op.data = dev.regs.read_u32(op.address as usize);
            0
        }

        DMA_IOCTL_ADAPTER_ACK => adapter_command(dev, code, arg),
        code if (DMA_IOCTL_HW_BASE..=DMA_IOCTL_HW_LAST).contains(&code) => {
            adapter_command(dev, code, arg)
        }

        _ => DmaError::NotSupported.to_errno() as i64,
    }
}

fn adapter_command(dev: &DmaDevice, code: u32, arg: u64) -> i64 {
    let _guard = dev.command_lock.lock();
    match dev.adapter.command(dev, code, arg) {
        Ok(value) => value,
        Err(err) => err.to_errno() as i64,
    }
}

fn claim_mask(dev: &DmaDevice, sub: &Arc<DmaSubscriber>, mask: DestMask) -> i64 {
    match dev.dest_table.claim(sub, mask, &dev.dest_mask) {
        Ok(()) => 0,
        Err(err) => err.to_errno() as i64,
    }
}

fn return_held_index(dev: &DmaDevice, sub: &DmaSubscriber, index: u32) -> Result<(), DmaError> {
    if !dev.rx_pool.contains(index)
        || dev.rx_pool.holder_of(index) != Some(sub.id)
        || dev.rx_pool.owner_of(index) != Some(BufOwner::Held)
    {
        return Err(DmaError::BadIndex);
    }
    dev.adapter.return_rx_buffer(dev, index)
}

fn bulk_read(dev: &DmaDevice, sub: &DmaSubscriber, arg: u64) -> i64 {
    if arg == 0 {
        return DmaError::Fault.to_errno() as i64;
    }
    // SAFETY: validated caller pointer per the platform contract.
    let hdr = unsafe { &mut *(arg as *mut DmaIndexArray) };
    if hdr.indices == 0 {
        return DmaError::Fault.to_errno() as i64;
    }
    let out = hdr.indices as *mut u32;

    let mut delivered = 0u32;
    while delivered < hdr.max {
        let Ok(Some(index)) = sub.queue.pop(None, true) else {
            break;
        };
        if dev.rx_pool.mark_held(index, sub.id).is_err() {
            dev.count_rx_drop();
            continue;
        }
        // SAFETY: `out` has room for `hdr.max` entries per the contract.
        unsafe { out.add(delivered as usize).write(index) };
        delivered += 1;
    }
    hdr.count = delivered;
    delivered as i64
}

fn bulk_return(dev: &DmaDevice, sub: &DmaSubscriber, arg: u64) -> i64 {
    if arg == 0 {
        return DmaError::Fault.to_errno() as i64;
    }
    // SAFETY: validated caller pointer per the platform contract.
    let hdr = unsafe { &*(arg as *const DmaIndexArray) };
    if hdr.indices == 0 {
        return DmaError::Fault.to_errno() as i64;
    }
    let indices = hdr.indices as *const u32;
    for i in 0..hdr.count as usize {
        // SAFETY: `indices` has `hdr.count` entries per the contract.
        let index = unsafe { indices.add(i).read() };
        if let Err(err) = return_held_index(dev, sub, index) {
            return err.to_errno() as i64;
        }
    }
    0
}

fn errno_or_zero(result: Result<(), DmaError>) -> i64 {
    match result {
        Ok(()) => 0,
        Err(err) => err.to_errno() as i64,
    }
}

// =============================================================================
// poll / async / mmap
// =============================================================================

/// Non-blocking readiness mask: readable when the queue is non-empty (or
/// cancelled, so a blocked poller observes close), writable when a TX
/// buffer is free.
pub fn dma_poll(sub: &DmaSubscriber) -> PollFlags {
    let dev = sub.device();
    let mut flags = PollFlags::empty();
    if sub.queue.ready_count() > 0 || sub.queue.is_cancelled() {
        flags |= PollFlags::READABLE;
    }
    if dev.tx_pool.free_count() > 0 {
        flags |= PollFlags::WRITABLE;
    }
    flags
}

/// Block until the subscriber is readable or `timeout_ms` expires.
/// The platform's poll glue parks here.
pub fn dma_poll_wait(sub: &DmaSubscriber, timeout_ms: Option<u64>) -> PollFlags {
    sub.queue.wait_ready(timeout_ms);
    dma_poll(sub)
}

/// Register (`pgid` nonzero) or drop (`pgid` zero) async notification:
/// one out-of-band signal per empty→non-empty queue transition.
pub fn dma_set_async(sub: &DmaSubscriber, pgid: u32) {
    sub.queue.set_async_pgid(pgid);
}

/// Total length of the mmap view: every buffer of both pools at a
/// `buf_size` stride, TX range first.
pub fn dma_mmap_len(dev: &DmaDevice) -> u64 {
    dev.config.total_count() as u64 * dev.config.buf_size as u64
}

/// Translate an offset in the mmap view to the CPU-physical address the
/// platform should map: buffer `k` occupies
/// `[k * buf_size, (k + 1) * buf_size)`.
pub fn dma_mmap_phys(dev: &DmaDevice, offset: u64) -> Option<PhysAddr> {
    let buf_size = dev.config.buf_size as u64;
    let index = (offset / buf_size) as u32;
    let within = offset % buf_size;
    if index >= dev.config.total_count() {
        return None;
    }
    let pool = if dev.tx_pool.contains(index) {
        &dev.tx_pool
    } else {
        &dev.rx_pool
    };
    pool.phys_of(index).ok().map(|phys| phys.offset(within))
}
