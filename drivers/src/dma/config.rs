//! Per-device configuration, fixed at bring-up.

use axstream_abi::PAGE_SIZE;

use super::types::DmaError;

/// Number of back-pressure threshold groups the hardware exposes.
pub const BG_THOLD_GROUPS: usize = 8;

/// Cache-snoop policy for the buffer pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaMode {
    /// Coherent (cache-snooped) memory; no explicit maintenance needed.
    Coherent,
    /// Pageable host memory; explicit flush/invalidate at each
    /// host/device ownership transition.
    Streaming,
    /// Coherent through the SoC's accelerator coherency port; bus
    /// addresses are rewritten at buffer installation.
    Acp,
}

/// Bring-up configuration for one device.
#[derive(Clone, Copy, Debug)]
pub struct DmaConfig {
    /// Number of TX buffers.
    pub tx_count: u32,
    /// Number of RX buffers.
    pub rx_count: u32,
    /// Bytes per buffer; must be a page multiple so the mmap stride lands
    /// every buffer on a page boundary.
    pub buf_size: u32,
    /// Cache-snoop policy.
    pub mode: DmaMode,
    /// Allow receive-continue descriptors (Gen2 only).
    pub cont: bool,
    /// Interrupt coalescing hold-off, device ticks. Zero disables.
    pub irq_hold: u32,
    /// Disable the IRQ line and service completions from the idle poll
    /// loop instead.
    pub irq_dis: bool,
    /// Per-group back-pressure thresholds (Gen2 only).
    pub bg_thold: [u32; BG_THOLD_GROUPS],
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            tx_count: 8,
            rx_count: 8,
            buf_size: PAGE_SIZE as u32,
            mode: DmaMode::Coherent,
            cont: false,
            irq_hold: 0,
            irq_dis: false,
            bg_thold: [0; BG_THOLD_GROUPS],
        }
    }
}

impl DmaConfig {
    /// Reject configurations the pools and the mmap layout cannot honor.
    pub fn validate(&self) -> Result<(), DmaError> {
        if self.tx_count == 0 || self.rx_count == 0 {
            return Err(DmaError::InvalidArgument);
        }
        if self.buf_size == 0 || self.buf_size as u64 % PAGE_SIZE != 0 {
            return Err(DmaError::InvalidArgument);
        }
        // Buffer indices are encoded in 12 bits in Gen2 descriptors.
        if self.tx_count + self.rx_count > 1 << 12 {
            return Err(DmaError::InvalidArgument);
        }
        for &thold in &self.bg_thold {
            if thold > self.rx_count {
                return Err(DmaError::InvalidArgument);
            }
        }
        Ok(())
    }

    /// Total buffer count across both pools.
    #[inline]
    pub const fn total_count(&self) -> u32 {
        self.tx_count + self.rx_count
    }
}
