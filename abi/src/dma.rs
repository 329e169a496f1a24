//! Streaming DMA engine ABI: request records, ioctl codes, frame sideband
//! and error encodings, and the destination mask.
//!
//! The byte layouts here are frozen. Existing userland tools (frame
//! writers/readers, rate testers) are built against them, and the same
//! record shape is used by 32-bit and 64-bit callers alike (`is32`
//! disambiguates where it matters).

// =============================================================================
// Destinations
// =============================================================================

/// Full size of the destination identifier space (8-bit tag).
pub const DMA_DEST_COUNT: usize = 256;

/// Bitset over the 256 destination identifiers.
///
/// Carried by the arbitrary-width set-mask ioctl and by the device's
/// capability mask. Stored as four little-endian u64 words: destination
/// `d` lives at word `d / 64`, bit `d % 64`.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct DestMask(pub [u64; 4]);

impl DestMask {
    /// No destinations.
    pub const fn empty() -> Self {
        Self([0; 4])
    }

    /// All 256 destinations.
    pub const fn full() -> Self {
        Self([u64::MAX; 4])
    }

    /// Mask containing only the low 32 destinations from a 32-bit word.
    ///
    /// This is the legacy set-mask ioctl's argument format.
    pub const fn from_low32(bits: u32) -> Self {
        Self([bits as u64, 0, 0, 0])
    }

    /// Mask covering destinations `0..n`.
    pub fn first_n(n: usize) -> Self {
        let mut mask = Self::empty();
        let n = n.min(DMA_DEST_COUNT);
        for dest in 0..n {
            mask.set(dest as u8);
        }
        mask
    }

    /// Set destination `dest`.
    #[inline]
    pub fn set(&mut self, dest: u8) {
        self.0[(dest >> 6) as usize] |= 1 << (dest & 63);
    }

    /// Clear destination `dest`.
    #[inline]
    pub fn clear(&mut self, dest: u8) {
        self.0[(dest >> 6) as usize] &= !(1 << (dest & 63));
    }

    /// Whether destination `dest` is present.
    #[inline]
    pub const fn test(&self, dest: u8) -> bool {
        self.0[(dest >> 6) as usize] & (1 << (dest & 63)) != 0
    }

    /// Whether no destination is present.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0[0] == 0 && self.0[1] == 0 && self.0[2] == 0 && self.0[3] == 0
    }

    /// Whether every destination in `self` is also in `other`.
    #[inline]
    pub const fn is_subset_of(&self, other: &DestMask) -> bool {
        self.0[0] & !other.0[0] == 0
            && self.0[1] & !other.0[1] == 0
            && self.0[2] & !other.0[2] == 0
            && self.0[3] & !other.0[3] == 0
    }

    /// Whether `self` and `other` share at least one destination.
    #[inline]
    pub const fn overlaps(&self, other: &DestMask) -> bool {
        self.0[0] & other.0[0] != 0
            || self.0[1] & other.0[1] != 0
            || self.0[2] & other.0[2] != 0
            || self.0[3] & other.0[3] != 0
    }

    /// Number of destinations present.
    pub fn count(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    /// Iterate over the present destination identifiers, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..DMA_DEST_COUNT as u16).filter_map(move |d| {
            let d = d as u8;
            if self.test(d) { Some(d) } else { None }
        })
    }
}

impl core::fmt::Debug for DestMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "DestMask({:#018x}:{:#018x}:{:#018x}:{:#018x})",
            self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

// =============================================================================
// Frame sideband flags
// =============================================================================

/// AXI-Stream per-frame sideband, packed into the request record's `flags`
/// field and the on-buffer flags: bits [7:0] first-user, bits [15:8]
/// last-user, bit [16] continuation.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(pub u32);

/// Continuation bit: this frame continues in the next buffer.
pub const DMA_FLAG_CONT: u32 = 1 << 16;

impl FrameFlags {
    /// Pack sideband fields into the wire encoding.
    #[inline]
    pub const fn from_parts(first_user: u8, last_user: u8, cont: bool) -> Self {
        let mut bits = first_user as u32 | (last_user as u32) << 8;
        if cont {
            bits |= DMA_FLAG_CONT;
        }
        Self(bits)
    }

    /// First-user sideband byte (accompanies the first beat of the frame).
    #[inline]
    pub const fn first_user(self) -> u8 {
        self.0 as u8
    }

    /// Last-user sideband byte (accompanies the last beat of the frame).
    #[inline]
    pub const fn last_user(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Continuation bit.
    #[inline]
    pub const fn cont(self) -> bool {
        self.0 & DMA_FLAG_CONT != 0
    }
}

impl core::fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "FrameFlags(fu={:#04x}, lu={:#04x}, cont={})",
            self.first_user(),
            self.last_user(),
            self.cont()
        )
    }
}

// =============================================================================
// Frame error bits
// =============================================================================

/// Descriptor framing/corruption from the device side (bad marker, zero
/// size with a status bit set).
pub const DMA_ERR_FIFO: u32 = 0x01;
/// Received frame larger than the configured buffer size.
pub const DMA_ERR_LEN: u32 = 0x02;
/// Device-side free-list exhausted (overflow status).
pub const DMA_ERR_MAX: u32 = 0x04;
/// Host-bus write error reported by the device.
pub const DMA_ERR_BUS: u32 = 0x08;
/// End-of-frame error carried in descriptor status (card-specific).
pub const DMA_ERR_EOFE: u32 = 0x10;

// =============================================================================
// Request record
// =============================================================================

/// The read/write request record exchanged over the character device.
///
/// The same 32-byte shape serves both directions:
///
/// * **write**: `data` nonzero means "copy `size` bytes from `data` into a
///   fresh TX buffer and post it"; `data` zero means "post the
///   already-populated TX buffer at `index`".
/// * **read**: `data` nonzero means "copy the next ready payload out to
///   `data` (up to `size`) and immediately re-arm the DMA buffer"; `data`
///   zero means "return only `index`, the buffer stays held until returned
///   by ioctl".
///
/// `is32` is 1 when the caller is a 32-bit process; the `data` field is
/// 8 bytes regardless of caller width so the record layout never forks.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct DmaRequest {
    /// Caller's source/destination address, or zero for index mode.
    pub data: u64,
    /// Destination identifier (low 8 bits significant).
    pub dest: u32,
    /// Frame sideband, [`FrameFlags`] encoding.
    pub flags: u32,
    /// Buffer index (index mode); kernel-filled on index-mode read.
    pub index: i32,
    /// Payload byte count.
    pub size: u32,
    /// 1 if the caller is a 32-bit process.
    pub is32: u32,
    /// Zero on submission. A completed read fills in the frame's
    /// `DMA_ERR_*` bitset here.
    pub pad: u32,
}

impl DmaRequest {
    /// Record size in bytes; the char-device layer rejects short reads
    /// and writes.
    pub const SIZE: usize = core::mem::size_of::<DmaRequest>();
}

/// Register access argument for the read/write register ioctls.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct DmaRegisterOp {
    /// Byte offset into the device register window.
    pub address: u32,
    /// Value to write, or kernel-filled value on read.
    pub data: u32,
}

/// Index array argument for the bulk read/return ioctls.
///
/// `indices` is a user pointer to `max` (bulk read) or `count` (bulk
/// return) u32 slots. Kept as a u64 so 32-bit callers share the layout.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct DmaIndexArray {
    /// Capacity of the user array (bulk read).
    pub max: u32,
    /// Entries used: kernel-filled on bulk read, caller-set on bulk return.
    pub count: u32,
    /// User pointer to the u32 index array.
    pub indices: u64,
}

// =============================================================================
// Ioctl command set
// =============================================================================

/// Number of RX buffers in the pool.
pub const DMA_IOCTL_GET_RX_COUNT: u32 = 0x1001;
/// Bytes per DMA buffer.
pub const DMA_IOCTL_GET_BUF_SIZE: u32 = 0x1002;
/// Set the device debug level (arg: integer level).
pub const DMA_IOCTL_SET_DEBUG: u32 = 0x1003;
/// Replace the subscriber's destination mask, low 32 destinations only
/// (arg: 32-bit mask).
pub const DMA_IOCTL_SET_MASK: u32 = 0x1004;
/// Return a held RX buffer by index (arg: index).
pub const DMA_IOCTL_RET_INDEX: u32 = 0x1005;
/// Acquire one free TX buffer; returns its index or negative.
pub const DMA_IOCTL_GET_TX_INDEX: u32 = 0x1006;
/// Number of ready (queued, undelivered) buffers.
pub const DMA_IOCTL_READ_READY: u32 = 0x1007;
/// Replace the subscriber's destination mask, arbitrary width
/// (arg: pointer to [`DestMask`]).
pub const DMA_IOCTL_SET_MASK_EXT: u32 = 0x1008;
/// Dequeue up to `max` ready indices in one call
/// (arg: pointer to [`DmaIndexArray`]).
pub const DMA_IOCTL_READ_INDEX_BULK: u32 = 0x1009;
/// Return multiple held indices in one call
/// (arg: pointer to [`DmaIndexArray`]).
pub const DMA_IOCTL_RET_INDEX_BULK: u32 = 0x100A;
/// ABI version of this header set.
pub const DMA_IOCTL_GET_VERSION: u32 = 0x100B;
/// Write a device register (arg: pointer to [`DmaRegisterOp`]).
pub const DMA_IOCTL_WRITE_REG: u32 = 0x100C;
/// Read a device register (arg: pointer to [`DmaRegisterOp`]).
pub const DMA_IOCTL_READ_REG: u32 = 0x100D;
/// Acknowledge/clear adapter interrupt state.
pub const DMA_IOCTL_ADAPTER_ACK: u32 = 0x2001;

/// First command code owned by card-specific hardware subsystems; codes in
/// `0x2000..=0x3FFF` (other than [`DMA_IOCTL_ADAPTER_ACK`]) pass through
/// the adapter's command hook verbatim.
pub const DMA_IOCTL_HW_BASE: u32 = 0x2000;
/// Last command code forwarded to the adapter.
pub const DMA_IOCTL_HW_LAST: u32 = 0x3FFF;

/// Value returned by [`DMA_IOCTL_GET_VERSION`].
pub const DMA_API_VERSION: u32 = 6;
