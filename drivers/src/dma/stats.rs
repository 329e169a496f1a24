//! Per-device counters.

use core::fmt;

/// Cumulative device statistics. Counters are monotonically increasing;
/// the IRQ path bumps the receive side, the post paths bump transmit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DmaStats {
    /// Frames delivered to a subscriber queue.
    pub rx_frames: u64,
    /// Payload bytes delivered.
    pub rx_bytes: u64,
    /// Completions dropped: unmatched handle, bad descriptor, no space.
    pub rx_dropped: u64,
    /// Frames delivered carrying a nonzero error bitset.
    pub rx_errors: u64,
    /// Completions for unowned destinations bounced straight back to
    /// hardware.
    pub rx_rearms: u64,
    /// Frames posted to the device.
    pub tx_frames: u64,
    /// Payload bytes posted.
    pub tx_bytes: u64,
    /// Post attempts that failed (no buffer, encode error).
    pub tx_errors: u64,
}

impl DmaStats {
    pub const fn new() -> Self {
        Self {
            rx_frames: 0,
            rx_bytes: 0,
            rx_dropped: 0,
            rx_errors: 0,
            rx_rearms: 0,
            tx_frames: 0,
            tx_bytes: 0,
            tx_errors: 0,
        }
    }

    /// Total frames moved in either direction.
    #[inline]
    pub const fn total_frames(&self) -> u64 {
        self.rx_frames + self.tx_frames
    }
}

impl fmt::Display for DmaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx: {} frames/{} bytes (drop {}, err {}, rearm {}), tx: {} frames/{} bytes (err {})",
            self.rx_frames,
            self.rx_bytes,
            self.rx_dropped,
            self.rx_errors,
            self.rx_rearms,
            self.tx_frames,
            self.tx_bytes,
            self.tx_errors
        )
    }
}
