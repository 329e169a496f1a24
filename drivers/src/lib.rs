#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod dma;
pub mod mmio;

pub mod test_fixtures;

pub mod chardev_tests;
pub mod dest_tests;
pub mod loopback_tests;
pub mod pool_tests;
pub mod queue_tests;
