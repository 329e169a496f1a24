//! Generation-1 hardware: gather/scatter FIFO-port model.
//!
//! RX completions arrive as word triples read from a single port:
//! {bus handle}, {size word, marker 0xE in the top nibble}, {status word,
//! marker 0xF in the top nibble carrying destination, first-user,
//! last-user and the overflow/bus-error bits}. TX completions return bare
//! bus handles through a parallel port. Posts are three sequential
//! register writes serialized by the hardware-write lock.


use axstream_abi::addr::PhysAddr;
use axstream_abi::dma::{
    DMA_ERR_BUS, DMA_ERR_FIFO, DMA_ERR_LEN, DMA_ERR_MAX, DestMask, FrameFlags,
};
use axstream_lib::{IrqMutex, klog_debug, klog_warn};

use super::device::DmaDevice;
use super::pool::release_on_arm_failure;
use super::types::DmaError;

// =============================================================================
// Register map
// =============================================================================

pub const G1_REG_SCRATCH: usize = 0x04;
pub const G1_REG_IRQ_STATUS: usize = 0x08;
pub const G1_REG_IRQ_ENABLE: usize = 0x0C;
pub const G1_REG_IRQ_ACK: usize = 0x10;
pub const G1_REG_RX_FIFO: usize = 0x14;
pub const G1_REG_TX_COMP_FIFO: usize = 0x18;
pub const G1_REG_RX_FREE: usize = 0x1C;
pub const G1_REG_TX_POST_HANDLE: usize = 0x20;
pub const G1_REG_TX_POST_SIZE: usize = 0x24;
pub const G1_REG_TX_POST_CTRL: usize = 0x28;
pub const G1_REG_MAX_RX_SIZE: usize = 0x2C;
pub const G1_REG_ONLINE: usize = 0x30;
pub const G1_REG_LOOPBACK: usize = 0x34;
pub const G1_REG_IRQ_HOLD: usize = 0x38;

/// Minimum register window length for a Gen1 card.
pub const G1_WINDOW_LEN: usize = 0x3C;

/// Pattern written to the scratch register during version probing.
pub const G1_SCRATCH_PATTERN: u32 = 0x5A5A_A5A5;

/// IRQ status: RX completion triples pending.
pub const G1_IRQ_RX_PENDING: u32 = 1 << 0;
/// IRQ status: TX completion handles pending.
pub const G1_IRQ_TX_PENDING: u32 = 1 << 1;

/// Loopback toggle, passed through the adapter command hook.
pub const G1_CMD_LOOPBACK: u32 = 0x2002;

// =============================================================================
// Word codec
// =============================================================================

const G1_MARKER_SIZE: u32 = 0xE;
const G1_MARKER_STATUS: u32 = 0xF;

// Status word: [31:28] marker, [25] bus error, [24] overflow,
// [23:16] destination, [15:8] last-user, [7:0] first-user.
const G1_STATUS_BUS_ERR: u32 = 1 << 25;
const G1_STATUS_OVERFLOW: u32 = 1 << 24;

/// Build the size word of an RX completion triple.
pub fn encode_size_word(size: u32) -> u32 {
    (G1_MARKER_SIZE << 28) | (size & 0x00FF_FFFF)
}

/// Build the status word of an RX completion triple.
pub fn encode_status_word(dest: u8, first_user: u8, last_user: u8, overflow: bool, bus_err: bool) -> u32 {
    let mut word = (G1_MARKER_STATUS << 28)
        | ((dest as u32) << 16)
        | ((last_user as u32) << 8)
        | first_user as u32;
    if overflow {
        word |= G1_STATUS_OVERFLOW;
    }
    if bus_err {
        word |= G1_STATUS_BUS_ERR;
    }
    word
}

/// Build the control word of a TX post: [31:24] destination, [16]
/// continuation, [15:8] last-user, [7:0] first-user.
pub fn encode_ctrl_word(flags: FrameFlags, dest: u8) -> u32 {
    let mut word =
        (flags.first_user() as u32) | ((flags.last_user() as u32) << 8) | ((dest as u32) << 24);
    if flags.cont() {
        word |= 1 << 16;
    }
    word
}

/// Decoded frame metadata from one RX completion triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct G1RxFrame {
    pub size: u32,
    pub flags: FrameFlags,
    pub dest: u8,
    pub error: u32,
}

/// Validate markers and decode the size/status words of an RX triple.
///
/// Mismatched markers force the size to zero and set the framing error;
/// the rest of the status word is decoded best-effort so the dispatch
/// rule still has a destination to consult. Zero-size frames are framing
/// errors on this generation, and an oversized frame is clamped to the
/// buffer with the length error set.
pub fn parse_rx_words(size_word: u32, status_word: u32, buf_size: u32) -> G1RxFrame {
    let mut error = 0u32;
    let mut size = size_word & 0x00FF_FFFF;

    if size_word >> 28 != G1_MARKER_SIZE || status_word >> 28 != G1_MARKER_STATUS {
        error |= DMA_ERR_FIFO;
        size = 0;
    }
    if size == 0 {
        error |= DMA_ERR_FIFO;
    }
    if size > buf_size {
        error |= DMA_ERR_LEN;
        size = buf_size;
    }
    if status_word & G1_STATUS_OVERFLOW != 0 {
        error |= DMA_ERR_MAX;
    }
    if status_word & G1_STATUS_BUS_ERR != 0 {
        error |= DMA_ERR_BUS;
    }

    G1RxFrame {
        size,
        flags: FrameFlags::from_parts(status_word as u8, (status_word >> 8) as u8, false),
        dest: (status_word >> 16) as u8,
        error,
    }
}

// =============================================================================
// Adapter
// =============================================================================

pub struct Gen1Adapter {
    /// Serializes the three-register TX post sequence across subscribers.
    write_lock: IrqMutex<()>,
}

impl Gen1Adapter {
    pub fn new() -> Self {
        Self {
            write_lock: IrqMutex::new(()),
        }
    }

    /// Program registers, prime the RX free-list FIFO, and report the
    /// destination mask (Gen1 cards accept the full destination space).
    pub fn init(&self, dev: &DmaDevice) -> Result<DestMask, DmaError> {
        let regs = &dev.regs;
        regs.write_u32(G1_REG_MAX_RX_SIZE, dev.config.buf_size);
        regs.write_u32(G1_REG_IRQ_HOLD, dev.config.irq_hold);

        // Bounded: an arm failure puts the buffer back on the free list
        // and a retry would spin.
        for _ in 0..dev.config.rx_count {
            let Some(index) = dev.rx_pool.acquire_free() else {
                break;
            };
            match dev.rx_pool.arm(index) {
                Ok(()) => {
                    let bus = dev.rx_pool.bus_handle(index)?;
                    regs.write_u32(G1_REG_RX_FREE, bus.as_u64() as u32);
                }
                Err(err) => release_on_arm_failure(&dev.rx_pool, index, err),
            }
        }

        Ok(DestMask::full())
    }

    pub fn enable(&self, dev: &DmaDevice) {
        dev.regs.write_u32(G1_REG_ONLINE, 1);
        if !dev.config.irq_dis {
            dev.regs.write_u32(G1_REG_IRQ_ENABLE, 1);
        }
    }

    pub fn clear(&self, dev: &DmaDevice) {
        dev.regs.write_u32(G1_REG_IRQ_ENABLE, 0);
        dev.regs.write_u32(G1_REG_ONLINE, 0);
    }

    /// Interrupt entry: drain both FIFO ports while the status register
    /// reports pending data, then acknowledge. Returns `false` ("not
    /// mine") when nothing was pending.
    pub fn irq(&self, dev: &DmaDevice) -> bool {
        let status = dev.regs.read_u32(G1_REG_IRQ_STATUS);
        if status & (G1_IRQ_RX_PENDING | G1_IRQ_TX_PENDING) == 0 {
            return false;
        }
        self.service(dev);
        dev.regs.write_u32(G1_REG_IRQ_ACK, 1);
        true
    }

    /// Poll-mode entry (`irq_dis`).
    pub fn poll(&self, dev: &DmaDevice) -> usize {
        let handled = self.service(dev);
        if handled > 0 {
            dev.regs.write_u32(G1_REG_IRQ_ACK, 1);
        }
        handled
    }

    fn service(&self, dev: &DmaDevice) -> usize {
        let regs = &dev.regs;
        let mut handled = 0;

        while regs.read_u32(G1_REG_IRQ_STATUS) & G1_IRQ_RX_PENDING != 0 {
            let handle = regs.read_u32(G1_REG_RX_FIFO);
            let size_word = regs.read_u32(G1_REG_RX_FIFO);
            let status_word = regs.read_u32(G1_REG_RX_FIFO);
            handled += 1;

            let Some(index) = dev.rx_pool.find_by_bus(PhysAddr(handle as u64)) else {
                klog_warn!("dma{}: rx completion for unknown handle {:#x}", dev.index, handle);
                dev.count_rx_drop();
                continue;
            };

            let frame = parse_rx_words(size_word, status_word, dev.config.buf_size);
            dev.rx_dispatch(index, frame.size, frame.flags, frame.dest, frame.error);
        }

        while regs.read_u32(G1_REG_IRQ_STATUS) & G1_IRQ_TX_PENDING != 0 {
            let handle = PhysAddr(regs.read_u32(G1_REG_TX_COMP_FIFO) as u64);
            handled += 1;

            if let Some(index) = dev.tx_pool.find_by_bus(handle) {
                dev.tx_pool.release(index);
            } else if let Some(index) = dev.rx_pool.find_by_bus(handle) {
                // The card sometimes returns an unused RX entry through the
                // TX completion port; push its handle straight back onto the
                // hardware free list.
                // TODO: confirm with the vendor whether firmware relies on
                // this or it is compensating for a quirk.
                if dev.rx_pool.owner_of(index) == Some(super::buffer::BufOwner::Armed)
                    && dev.rx_pool.to_hw(index).is_ok()
                {
                    regs.write_u32(G1_REG_RX_FREE, handle.as_u64() as u32);
                    dev.count_rx_rearm();
                } else {
                    klog_warn!(
                        "dma{}: rx handle {:#x} on tx completion port in unexpected state",
                        dev.index,
                        handle.as_u64()
                    );
                }
            } else {
                klog_warn!(
                    "dma{}: tx completion for unknown handle {:#x}",
                    dev.index,
                    handle.as_u64()
                );
                dev.count_rx_drop();
            }
        }

        handled
    }

    /// Encode and post one TX buffer: three sequential register writes
    /// under the hardware-write lock (the control write triggers).
    pub fn send_buffer(&self, dev: &DmaDevice, index: u32) -> Result<(), DmaError> {
        let info = dev.tx_pool.frame_info(index)?;
        let bus = dev.tx_pool.bus_handle(index)?;
        if let Err(err) = dev.tx_pool.arm(index) {
            release_on_arm_failure(&dev.tx_pool, index, err);
            return Err(err);
        }

        let _guard = self.write_lock.lock();
        dev.regs.write_u32(G1_REG_TX_POST_HANDLE, bus.as_u64() as u32);
        dev.regs.write_u32(G1_REG_TX_POST_SIZE, info.size);
        dev.regs
            .write_u32(G1_REG_TX_POST_CTRL, encode_ctrl_word(info.flags, info.dest));
        Ok(())
    }

    /// Re-arm a freed RX buffer by pushing its bus handle back onto the
    /// hardware free-list FIFO.
    pub fn return_rx_buffer(&self, dev: &DmaDevice, index: u32) -> Result<(), DmaError> {
        match dev.rx_pool.arm(index) {
            Ok(()) => {
                let bus = dev.rx_pool.bus_handle(index)?;
                dev.regs.write_u32(G1_REG_RX_FREE, bus.as_u64() as u32);
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
                dev.regs.write_u32(G1_REG_IRQ_ACK, 1);
                Ok(0)
            }
            G1_CMD_LOOPBACK => {
                klog_debug!("dma{}: loopback {}", dev.index, arg != 0);
                dev.regs.write_u32(G1_REG_LOOPBACK, arg as u32);
                Ok(0)
            }
            _ => Err(DmaError::NotSupported),
        }
    }

    pub fn seq_show(&self, dev: &DmaDevice, w: &mut dyn core::fmt::Write) -> core::fmt::Result {
        writeln!(
            w,
            "  gen1: irq status {:#x} online {}",
            dev.regs.read_u32(G1_REG_IRQ_STATUS),
            dev.regs.read_u32(G1_REG_ONLINE)
        )
    }
}

impl Default for Gen1Adapter {
    fn default() -> Self {
        Self::new()
    }
}
