//! Buffer metadata and the per-buffer ownership state machine.
//!
//! A buffer is identified everywhere by its stable `index`, assigned once
//! at pool creation. The payload memory itself lives in DMA mappings held
//! by the pool; this module tracks who currently owns each buffer.

use axstream_abi::dma::FrameFlags;

/// Sentinel holder id: not held by any subscriber.
pub const HOLDER_NONE: u32 = u32::MAX;

/// Who owns a buffer right now.
///
/// Steady-state transitions:
/// Free→Armed (arming), Armed→Ready (completion), Ready→Held (delivery),
/// Held→Free (return). Recovery edges: Ready→Armed (completion for an
/// unowned destination re-arms), Free→Held / Held→Armed (TX acquire and
/// post), Ready/Held/Armed→Free (close drain, failed arm, shutdown).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufOwner {
    /// On the pool free list.
    Free,
    /// Handed to the device, completion pending. Device has exclusive
    /// access to the payload.
    Armed,
    /// Completed by the device, sitting in a subscriber queue.
    Ready,
    /// Delivered to (or acquired by) a subscriber, which has exclusive
    /// access until it returns the buffer.
    Held,
}

impl BufOwner {
    pub(crate) fn transition_ok(self, to: BufOwner) -> bool {
        use BufOwner::*;
        matches!(
            (self, to),
            (Free, Armed)
                | (Armed, Ready)
                | (Ready, Held)
                | (Held, Free)
                | (Free, Held)
                | (Held, Armed)
                | (Ready, Armed)
                | (Ready, Free)
                | (Armed, Free)
                | (Armed, Armed)
        )
    }
}

/// Which pool a buffer belongs to. Membership is fixed for the buffer's
/// lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolKind {
    Tx,
    Rx,
}

/// Per-buffer bookkeeping. Payload addresses live in the pool's mapping
/// table; everything here is protected by the pool lock.
#[derive(Clone, Copy, Debug)]
pub struct DmaBuffer {
    /// Stable identifier, unique across both pools.
    pub index: u32,
    /// Valid payload bytes. Device-written on receive, subscriber-written
    /// on transmit.
    pub size: u32,
    /// AXI-Stream sideband for the frame in this buffer.
    pub flags: FrameFlags,
    /// `DMA_ERR_*` bitset accumulated for the frame in this buffer.
    pub error: u32,
    /// Destination tag for the frame in this buffer.
    pub dest: u8,
    /// Times this buffer has carried a frame; statistics only.
    pub count: u64,
    /// Current owner state.
    pub owner: BufOwner,
    /// Subscriber holding this buffer, or [`HOLDER_NONE`].
    pub holder: u32,
    /// Whether the buffer currently sits on the pool free list. Guards
    /// release() idempotence: a listed buffer is never pushed twice.
    pub(crate) listed: bool,
}

impl DmaBuffer {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            size: 0,
            flags: FrameFlags::default(),
            error: 0,
            dest: 0,
            count: 0,
            owner: BufOwner::Free,
            holder: HOLDER_NONE,
            listed: true,
        }
    }

    /// Clear per-frame fields when the buffer goes back to the free list.
    pub(crate) fn reset_frame(&mut self) {
        self.size = 0;
        self.flags = FrameFlags::default();
        self.error = 0;
        self.dest = 0;
        self.holder = HOLDER_NONE;
    }
}

/// Snapshot of the frame currently described by a buffer, handed across
/// the pool lock to the character-device layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInfo {
    pub size: u32,
    pub flags: FrameFlags,
    pub error: u32,
    pub dest: u8,
}
