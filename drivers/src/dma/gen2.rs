//! Generation-2 hardware: descriptor-ring model.
//!
//! Two host-resident rings of 8-byte entries are coherently mapped at
//! init. The device fills the next slot and advances its head; this side
//! consumes from its tail, zeroing each slot (all-zeros means
//! not-yet-written), and acknowledges the device with the count of
//! handled entries at the end of each interrupt.
//!
//! RX completion descriptor layout:
//! `[3:0]` status nibble, `[15:4]` buffer index, `[23:16]` last-user,
//! `[31:24]` first-user, `[55:32]` size, `[63:56]` destination.
//! A size of zero signals a framing error. TX completion descriptors
//! carry only the buffer index in `[15:4]`.

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{Ordering, fence};

use axstream_abi::dma::{
    DMA_ERR_BUS, DMA_ERR_EOFE, DMA_ERR_FIFO, DMA_ERR_LEN, DMA_ERR_MAX, DestMask, FrameFlags,
};
use axstream_lib::kernel_services::dma_memory::{self, DmaMapping};
use axstream_lib::{IrqMutex, klog_debug, klog_warn};

use super::config::{BG_THOLD_GROUPS, DmaConfig};
use super::device::DmaDevice;
use super::pool::release_on_arm_failure;
use super::types::DmaError;

// =============================================================================
// Register map
// =============================================================================

pub const G2_REG_IRQ_STATUS: usize = 0x04;
pub const G2_REG_IRQ_ENABLE: usize = 0x08;
pub const G2_REG_IRQ_ACK: usize = 0x0C;
pub const G2_REG_CONT_ENABLE: usize = 0x10;
pub const G2_REG_IRQ_HOLD: usize = 0x14;
pub const G2_REG_MAX_SIZE: usize = 0x18;
pub const G2_REG_ONLINE: usize = 0x1C;
pub const G2_REG_WR_RING_LO: usize = 0x20;
pub const G2_REG_WR_RING_HI: usize = 0x24;
pub const G2_REG_WR_RING_LEN: usize = 0x28;
pub const G2_REG_RD_RING_LO: usize = 0x2C;
pub const G2_REG_RD_RING_HI: usize = 0x30;
pub const G2_REG_RD_RING_LEN: usize = 0x34;
pub const G2_REG_RX_FREE: usize = 0x38;
pub const G2_REG_TX_POST_LO: usize = 0x3C;
pub const G2_REG_TX_POST_HI: usize = 0x40;
pub const G2_REG_DEST_CAP: usize = 0x44;
pub const G2_REG_BG_THOLD_BASE: usize = 0x48;
pub const G2_REG_LOOPBACK: usize = 0x68;
pub const G2_REG_HANDLE_SEL: usize = 0x6C;
pub const G2_REG_HANDLE_LO: usize = 0x70;
pub const G2_REG_HANDLE_HI: usize = 0x74;

/// Minimum register window length for a Gen2 card.
pub const G2_WINDOW_LEN: usize = 0x78;

/// Loopback toggle, passed through the adapter command hook.
pub const G2_CMD_LOOPBACK: u32 = 0x2002;

// Status nibble bits in RX completion descriptors.
pub const G2_STAT_BUS_ERR: u8 = 1 << 0;
pub const G2_STAT_OVERFLOW: u8 = 1 << 1;
pub const G2_STAT_EOFE: u8 = 1 << 2;

// =============================================================================
// Descriptor codec
// =============================================================================

/// Decoded RX completion descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct G2RxDesc {
    pub status: u8,
    pub index: u32,
    pub last_user: u8,
    pub first_user: u8,
    pub size: u32,
    pub dest: u8,
}

pub fn decode_rx_desc(raw: u64) -> G2RxDesc {
    G2RxDesc {
        status: (raw & 0xF) as u8,
        index: ((raw >> 4) & 0xFFF) as u32,
        last_user: (raw >> 16) as u8,
        first_user: (raw >> 24) as u8,
        size: ((raw >> 32) & 0x00FF_FFFF) as u32,
        dest: (raw >> 56) as u8,
    }
}

pub fn encode_rx_desc(desc: &G2RxDesc) -> u64 {
    (desc.status as u64 & 0xF)
        | ((desc.index as u64 & 0xFFF) << 4)
        | ((desc.last_user as u64) << 16)
        | ((desc.first_user as u64) << 24)
        | ((desc.size as u64 & 0x00FF_FFFF) << 32)
        | ((desc.dest as u64) << 56)
}

/// Buffer index from a TX completion descriptor.
pub fn decode_tx_completion(raw: u64) -> u32 {
    ((raw >> 4) & 0xFFF) as u32
}

pub fn encode_tx_completion(index: u32) -> u64 {
    ((index as u64) & 0xFFF) << 4
}

/// Pack a TX post into the two 32-bit register words: word-low carries
/// {continue, buffer index, last-user, first-user}, word-high {size,
/// destination}.
pub fn encode_tx_post(index: u32, size: u32, flags: FrameFlags, dest: u8) -> (u32, u32) {
    let mut lo = (flags.first_user() as u32)
        | ((flags.last_user() as u32) << 8)
        | ((index & 0xFFF) << 16);
    if flags.cont() {
        lo |= 1 << 28;
    }
    let hi = (size & 0x00FF_FFFF) | ((dest as u32) << 24);
    (lo, hi)
}

/// Unpack the TX post words; the inverse of [`encode_tx_post`].
pub fn decode_tx_post(lo: u32, hi: u32) -> (u32, u32, FrameFlags, u8) {
    let index = (lo >> 16) & 0xFFF;
    let flags = FrameFlags::from_parts(lo as u8, (lo >> 8) as u8, lo & (1 << 28) != 0);
    let size = hi & 0x00FF_FFFF;
    let dest = (hi >> 24) as u8;
    (index, size, flags, dest)
}

// =============================================================================
// Ring access
// =============================================================================

/// Write barrier before publishing ring state to the device.
#[inline(always)]
fn dma_wmb() {
    fence(Ordering::Release);
}

/// Read barrier before consuming device-written ring slots.
#[inline(always)]
fn dma_rmb() {
    fence(Ordering::Acquire);
}

#[inline]
fn ring_read(ring: &DmaMapping, slot: usize) -> u64 {
    unsafe { read_volatile((ring.virt.as_u64() as *const u64).add(slot)) }
}

#[inline]
fn ring_write(ring: &DmaMapping, slot: usize, value: u64) {
    unsafe { write_volatile((ring.virt.as_u64() as *mut u64).add(slot), value) }
}

const RING_ENTRY_SIZE: usize = core::mem::size_of::<u64>();

struct Gen2Rings {
    /// Device→host RX completion ring.
    write_ring: DmaMapping,
    write_len: usize,
    write_tail: usize,
    /// Device→host TX completion ring.
    read_ring: DmaMapping,
    read_len: usize,
    read_tail: usize,
}

// =============================================================================
// Adapter
// =============================================================================

pub struct Gen2Adapter {
    rings: IrqMutex<Gen2Rings>,
    /// Serializes the two-word TX post sequence across subscribers.
    write_lock: IrqMutex<()>,
}

impl Gen2Adapter {
    /// Allocate the completion rings from coherent memory. Register
    /// programming is deferred to [`init`](Self::init).
    pub fn new(config: &DmaConfig) -> Result<Self, DmaError> {
        let write_len = config.rx_count as usize;
        let read_len = config.tx_count as usize;

        let write_ring = dma_memory::alloc_coherent(write_len * RING_ENTRY_SIZE);
        if !write_ring.is_valid() {
            return Err(DmaError::NoBufferSpace);
        }
        let read_ring = dma_memory::alloc_coherent(read_len * RING_ENTRY_SIZE);
        if !read_ring.is_valid() {
            dma_memory::free_coherent(write_ring, write_len * RING_ENTRY_SIZE);
            return Err(DmaError::NoBufferSpace);
        }

        for slot in 0..write_len {
            ring_write(&write_ring, slot, 0);
        }
        for slot in 0..read_len {
            ring_write(&read_ring, slot, 0);
        }

        Ok(Self {
            rings: IrqMutex::new(Gen2Rings {
                write_ring,
                write_len,
                write_tail: 0,
                read_ring,
                read_len,
                read_tail: 0,
            }),
            write_lock: IrqMutex::new(()),
        })
    }

    /// Return the ring memory to the platform. Teardown only.
    pub fn release_memory(&self) {
        let rings = self.rings.lock();
        dma_memory::free_coherent(rings.write_ring, rings.write_len * RING_ENTRY_SIZE);
        dma_memory::free_coherent(rings.read_ring, rings.read_len * RING_ENTRY_SIZE);
    }

    /// Program registers, install the buffer-handle table, arm the initial
    /// RX buffers, and report the destination mask.
    pub fn init(&self, dev: &DmaDevice) -> Result<DestMask, DmaError> {
        let regs = &dev.regs;
        let config = &dev.config;

        {
            let rings = self.rings.lock();
            let wr = rings.write_ring.bus.as_u64();
            regs.write_u32(G2_REG_WR_RING_LO, wr as u32);
            regs.write_u32(G2_REG_WR_RING_HI, (wr >> 32) as u32);
            regs.write_u32(G2_REG_WR_RING_LEN, rings.write_len as u32);
            let rd = rings.read_ring.bus.as_u64();
            regs.write_u32(G2_REG_RD_RING_LO, rd as u32);
            regs.write_u32(G2_REG_RD_RING_HI, (rd >> 32) as u32);
            regs.write_u32(G2_REG_RD_RING_LEN, rings.read_len as u32);
        }

        regs.write_u32(G2_REG_MAX_SIZE, config.buf_size);
        regs.write_u32(G2_REG_IRQ_HOLD, config.irq_hold);
        regs.write_u32(G2_REG_CONT_ENABLE, config.cont as u32);
        for (group, &thold) in config.bg_thold.iter().enumerate().take(BG_THOLD_GROUPS) {
            regs.write_u32(G2_REG_BG_THOLD_BASE + group * 4, thold);
        }

        // Install the index→bus handle table for both pools; the device
        // addresses buffers by index from here on.
        for pool in [&dev.tx_pool, &dev.rx_pool] {
            for index in pool.base()..pool.base() + pool.len() {
                let bus = pool.bus_handle(index)?.as_u64();
                regs.write_u32(G2_REG_HANDLE_SEL, index);
                regs.write_u32(G2_REG_HANDLE_LO, bus as u32);
                regs.write_u32(G2_REG_HANDLE_HI, (bus >> 32) as u32);
            }
        }

        // Arm every RX buffer. Bounded: an arm failure puts the buffer
        // back on the free list and a retry would spin.
        for _ in 0..config.rx_count {
            let Some(index) = dev.rx_pool.acquire_free() else {
                break;
            };
            match dev.rx_pool.arm(index) {
                Ok(()) => {
                    dma_wmb();
                    regs.write_u32(G2_REG_RX_FREE, index);
                }
                Err(err) => release_on_arm_failure(&dev.rx_pool, index, err),
            }
        }

        let cap = regs.read_u32(G2_REG_DEST_CAP);
        let mask = if cap == 0 || cap >= 256 {
            DestMask::full()
        } else {
            DestMask::first_n(cap as usize)
        };
        Ok(mask)
    }

    pub fn enable(&self, dev: &DmaDevice) {
        dev.regs.write_u32(G2_REG_ONLINE, 1);
        if !dev.config.irq_dis {
            dev.regs.write_u32(G2_REG_IRQ_ENABLE, 1);
        }
    }

    pub fn clear(&self, dev: &DmaDevice) {
        dev.regs.write_u32(G2_REG_IRQ_ENABLE, 0);
        dev.regs.write_u32(G2_REG_ONLINE, 0);
        let mut rings = self.rings.lock();
        for slot in 0..rings.write_len {
            ring_write(&rings.write_ring, slot, 0);
        }
        for slot in 0..rings.read_len {
            ring_write(&rings.read_ring, slot, 0);
        }
        rings.write_tail = 0;
        rings.read_tail = 0;
    }

    /// Interrupt entry: claim the interrupt via the status register, drain
    /// both rings, acknowledge with the handled count. Returns `false`
    /// ("not mine") when the status register shows nothing pending.
    pub fn irq(&self, dev: &DmaDevice) -> bool {
        if dev.regs.read_u32(G2_REG_IRQ_STATUS) == 0 {
            return false;
        }
        let handled = self.service(dev);
        dev.regs.write_u32(G2_REG_IRQ_ACK, handled as u32);
        true
    }

    /// Poll-mode entry (`irq_dis`): drain without consulting the status
    /// register.
    pub fn poll(&self, dev: &DmaDevice) -> usize {
        let handled = self.service(dev);
        if handled > 0 {
            dev.regs.write_u32(G2_REG_IRQ_ACK, handled as u32);
        }
        handled
    }

    fn service(&self, dev: &DmaDevice) -> usize {
        let mut handled = 0;

        loop {
            let raw = {
                let mut rings = self.rings.lock();
                dma_rmb();
                let raw = ring_read(&rings.write_ring, rings.write_tail);
                if raw == 0 {
                    None
                } else {
                    ring_write(&rings.write_ring, rings.write_tail, 0);
                    rings.write_tail = (rings.write_tail + 1) % rings.write_len;
                    Some(raw)
                }
            };
            let Some(raw) = raw else { break };
            handled += 1;
            self.handle_rx_completion(dev, raw);
        }

        loop {
            let raw = {
                let mut rings = self.rings.lock();
                dma_rmb();
                let raw = ring_read(&rings.read_ring, rings.read_tail);
                if raw == 0 {
                    None
                } else {
                    ring_write(&rings.read_ring, rings.read_tail, 0);
                    rings.read_tail = (rings.read_tail + 1) % rings.read_len;
                    Some(raw)
                }
            };
            let Some(raw) = raw else { break };
            handled += 1;
            self.handle_tx_completion(dev, raw);
        }

        handled
    }

    fn handle_rx_completion(&self, dev: &DmaDevice, raw: u64) {
        let desc = decode_rx_desc(raw);

        if !dev.rx_pool.contains(desc.index) {
            // Stale or corrupt index: there is no buffer to attach the
            // error to and no way to tell which pool to return it to.
            klog_warn!("dma{}: rx completion for unknown index {}", dev.index, desc.index);
            dev.count_rx_drop();
            return;
        }

        let mut error = 0u32;
        let mut size = desc.size;
        if size == 0 {
            error |= DMA_ERR_FIFO;
        }
        if size > dev.config.buf_size {
            error |= DMA_ERR_LEN;
            size = dev.config.buf_size;
        }
        if desc.status & G2_STAT_BUS_ERR != 0 {
            error |= DMA_ERR_BUS;
        }
        if desc.status & G2_STAT_OVERFLOW != 0 {
            error |= DMA_ERR_MAX;
        }
        if desc.status & G2_STAT_EOFE != 0 {
            error |= DMA_ERR_EOFE;
        }

        let flags = FrameFlags::from_parts(desc.first_user, desc.last_user, false);
        dev.rx_dispatch(desc.index, size, flags, desc.dest, error);
    }

    fn handle_tx_completion(&self, dev: &DmaDevice, raw: u64) {
        let index = decode_tx_completion(raw);
        if dev.tx_pool.contains(index) {
            dev.tx_pool.release(index);
        } else {
            klog_warn!("dma{}: tx completion for unknown index {}", dev.index, index);
            dev.count_rx_drop();
        }
    }

    /// Encode and post one TX buffer. The buffer must already carry its
    /// frame metadata; the two-word register sequence is serialized by the
    /// hardware-write lock.
    pub fn send_buffer(&self, dev: &DmaDevice, index: u32) -> Result<(), DmaError> {
        let info = dev.tx_pool.frame_info(index)?;
        if let Err(err) = dev.tx_pool.arm(index) {
            release_on_arm_failure(&dev.tx_pool, index, err);
            return Err(err);
        }

        let (lo, hi) = encode_tx_post(index, info.size, info.flags, info.dest);
        let _guard = self.write_lock.lock();
        dev.regs.write_u32(G2_REG_TX_POST_LO, lo);
        // The high-word write triggers the post.
        dev.regs.write_u32(G2_REG_TX_POST_HI, hi);
        Ok(())
    }

    /// Re-arm a freed RX buffer: a single register write of its index.
    /// A failed `to_hw` leaves the buffer on the free list with a warning
    /// rather than handing the device a dead mapping.
    pub fn return_rx_buffer(&self, dev: &DmaDevice, index: u32) -> Result<(), DmaError> {
        match dev.rx_pool.arm(index) {
            Ok(()) => {
                dma_wmb();
                dev.regs.write_u32(G2_REG_RX_FREE, index);
                Ok(())
            }
            Err(err) => {
                release_on_arm_failure(&dev.rx_pool, index, err);
                Ok(())
            }
        }
    }

    /// Card-specific command passthrough.
    pub fn command(&self, dev: &DmaDevice, code: u32, arg: u64) -> Result<i64, DmaError> {
        match code {
            axstream_abi::dma::DMA_IOCTL_ADAPTER_ACK => {
                dev.regs.write_u32(G2_REG_IRQ_ACK, 0);
                Ok(0)
            }
            G2_CMD_LOOPBACK => {
                klog_debug!("dma{}: loopback {}", dev.index, arg != 0);
                dev.regs.write_u32(G2_REG_LOOPBACK, arg as u32);
                Ok(0)
            }
            _ => Err(DmaError::NotSupported),
        }
    }

    pub fn seq_show(&self, dev: &DmaDevice, w: &mut dyn core::fmt::Write) -> core::fmt::Result {
        let rings = self.rings.lock();
        writeln!(w, "  gen2: write ring {}/{} read ring {}/{}",
            rings.write_tail, rings.write_len, rings.read_tail, rings.read_len)?;
        writeln!(
            w,
            "  irq status {:#x} online {}",
            dev.regs.read_u32(G2_REG_IRQ_STATUS),
            dev.regs.read_u32(G2_REG_ONLINE)
        )
    }
}
