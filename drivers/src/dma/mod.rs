//! Host-resident streaming DMA engine for AXI-Stream data-acquisition
//! cards.
//!
//! The core manages fixed pools of DMA buffers, owns the hardware rings
//! that hand those buffers between CPU and device, dispatches completed
//! receive frames to per-destination subscribers, accepts transmit
//! requests, and exposes a character-device abstraction whose
//! read/write/ioctl/mmap/poll semantics are the public API.

pub mod adapter;
pub mod buffer;
pub mod chardev;
pub mod config;
pub mod dest;
pub mod device;
pub mod gen1;
pub mod gen2;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod types;

pub use adapter::{Generation, HwAdapter};
pub use buffer::{BufOwner, DmaBuffer, FrameInfo, PoolKind};
pub use chardev::{
    DmaSubscriber, PollFlags, dma_close, dma_ioctl, dma_mmap_len, dma_mmap_phys, dma_open,
    dma_poll, dma_poll_wait, dma_read, dma_set_async, dma_write,
};
pub use config::{DmaConfig, DmaMode};
pub use dest::DestTable;
pub use device::{
    DmaDevice, HwInfo, MAX_DEVICES, MAX_SUBSCRIBERS, device_get, dma_device_register,
    dma_device_shutdown,
};
pub use pool::BufferPool;
pub use queue::SubQueue;
pub use stats::DmaStats;
pub use types::DmaError;
