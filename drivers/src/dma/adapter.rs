//! The hardware adapter seam: one contract, two ring-format generations.
//!
//! The generation is probed once at bring-up from the top byte of the
//! first device register and the device holds exactly one realization for
//! its lifetime; dispatch is a plain match, no vtables.

use core::fmt;

use axstream_abi::dma::DestMask;

use super::config::DmaConfig;
use super::device::DmaDevice;
use super::gen1::{G1_REG_SCRATCH, G1_SCRATCH_PATTERN, Gen1Adapter};
use super::gen2::Gen2Adapter;
use super::types::DmaError;
use crate::mmio::MmioRegion;

/// First device register; the top byte encodes the ring-format
/// generation.
pub const REG_VERSION: usize = 0x00;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Generation {
    Gen1,
    Gen2,
}

/// Probe the ring-format generation. A version byte of 2 or higher means
/// the descriptor-ring format; otherwise the scratch register must read
/// back a written pattern to confirm a Gen1 card is actually present.
pub fn probe(regs: &MmioRegion) -> Result<Generation, DmaError> {
    let version = regs.read_u32(REG_VERSION);
    if version >> 24 >= 2 {
        return Ok(Generation::Gen2);
    }
    regs.write_u32(G1_REG_SCRATCH, G1_SCRATCH_PATTERN);
    if regs.read_u32(G1_REG_SCRATCH) == G1_SCRATCH_PATTERN {
        Ok(Generation::Gen1)
    } else {
        Err(DmaError::NotAvailable)
    }
}

/// One concrete hardware realization, fixed at bring-up.
pub enum HwAdapter {
    Gen1(Gen1Adapter),
    Gen2(Gen2Adapter),
}

impl HwAdapter {
    pub fn new(generation: Generation, config: &DmaConfig) -> Result<Self, DmaError> {
        match generation {
            Generation::Gen1 => Ok(Self::Gen1(Gen1Adapter::new())),
            Generation::Gen2 => Ok(Self::Gen2(Gen2Adapter::new(config)?)),
        }
    }

    pub fn generation(&self) -> Generation {
        match self {
            Self::Gen1(_) => Generation::Gen1,
            Self::Gen2(_) => Generation::Gen2,
        }
    }

    /// Program registers, install handle tables / prime the free-list
    /// FIFO, arm the initial RX buffers, and report the destination mask.
    pub fn init(&self, dev: &DmaDevice) -> Result<DestMask, DmaError> {
        match self {
            Self::Gen1(a) => a.init(dev),
            Self::Gen2(a) => a.init(dev),
        }
    }

    /// Device online transition.
    pub fn enable(&self, dev: &DmaDevice) {
        match self {
            Self::Gen1(a) => a.enable(dev),
            Self::Gen2(a) => a.enable(dev),
        }
    }

    /// Device offline transition.
    pub fn clear(&self, dev: &DmaDevice) {
        match self {
            Self::Gen1(a) => a.clear(dev),
            Self::Gen2(a) => a.clear(dev),
        }
    }

    /// Interrupt-context handler. Returns `true` when the interrupt was
    /// ours.
    pub fn irq(&self, dev: &DmaDevice) -> bool {
        match self {
            Self::Gen1(a) => a.irq(dev),
            Self::Gen2(a) => a.irq(dev),
        }
    }

    /// Poll-mode service entry (`irq_dis` configurations). Returns the
    /// number of completions handled.
    pub fn poll(&self, dev: &DmaDevice) -> usize {
        match self {
            Self::Gen1(a) => a.poll(dev),
            Self::Gen2(a) => a.poll(dev),
        }
    }

    /// Encode a descriptor and hand a TX buffer to the device.
    pub fn send_buffer(&self, dev: &DmaDevice, index: u32) -> Result<(), DmaError> {
        match self {
            Self::Gen1(a) => a.send_buffer(dev, index),
            Self::Gen2(a) => a.send_buffer(dev, index),
        }
    }

    /// Re-arm a freed RX buffer to the device.
    pub fn return_rx_buffer(&self, dev: &DmaDevice, index: u32) -> Result<(), DmaError> {
        match self {
            Self::Gen1(a) => a.return_rx_buffer(dev, index),
            Self::Gen2(a) => a.return_rx_buffer(dev, index),
        }
    }

    /// Card-specific ioctl passthrough.
    pub fn command(&self, dev: &DmaDevice, code: u32, arg: u64) -> Result<i64, DmaError> {
        match self {
            Self::Gen1(a) => a.command(dev, code, arg),
            Self::Gen2(a) => a.command(dev, code, arg),
        }
    }

    /// Diagnostic dump.
    pub fn seq_show(&self, dev: &DmaDevice, w: &mut dyn fmt::Write) -> fmt::Result {
        match self {
            Self::Gen1(a) => a.seq_show(dev, w),
            Self::Gen2(a) => a.seq_show(dev, w),
        }
    }

    /// Free adapter-owned DMA memory. Teardown only.
    pub fn release_memory(&self) {
        match self {
            Self::Gen1(_) => {}
            Self::Gen2(a) => a.release_memory(),
        }
    }
}
