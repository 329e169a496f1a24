//! AXSTREAM Kernel-Userland ABI Types
//!
//! This crate provides the canonical definitions for everything that crosses
//! the character-device boundary of the streaming DMA engine: request
//! records, ioctl command codes, frame flag and error encodings, and the
//! destination mask. Having a single source of truth eliminates:
//! - Duplicate type definitions
//! - ABI mismatches between kernel and userland
//! - The need for unsafe FFI conversions
//!
//! All types in this crate are `#[repr(C)]` for ABI stability.

#![no_std]
#![forbid(unsafe_code)]

pub mod addr;
pub mod dma;

/// Standard 4KB page size for userland memory calculations.
pub const PAGE_SIZE: u64 = 0x1000;

pub use addr::*;
pub use dma::*;
