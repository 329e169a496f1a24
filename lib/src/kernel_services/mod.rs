//! Function-pointer service tables registered by the platform at bring-up.
//!
//! The driver core never links against the scheduler, the memory manager,
//! or the interrupt controller directly; it calls through these tables.
//! Each table is declared with [`define_service!`](crate::define_service)
//! and installed exactly once.

pub mod dma_memory;
pub mod driver_runtime;
pub mod platform;
