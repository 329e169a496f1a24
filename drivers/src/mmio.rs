//! Volatile access to device register windows.
//!
//! The card-specific bring-up code maps the PCI BAR (or SoC register
//! block) and hands the core a pre-mapped window via
//! [`MmioRegion::from_parts`]; the core itself never touches the page
//! tables.

use core::ptr::{read_volatile, write_volatile};

use axstream_abi::addr::{PhysAddr, VirtAddr};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MmioRegion {
    virt_base: u64,
    phys_base: u64,
    size: usize,
}

impl MmioRegion {
    #[inline]
    pub const fn empty() -> Self {
        Self {
            virt_base: 0,
            phys_base: 0,
            size: 0,
        }
    }

    /// Wrap an already-mapped register window.
    ///
    /// The caller (hardware bring-up) guarantees `virt` is mapped,
    /// uncached-device memory of at least `size` bytes backed by `phys`.
    pub const fn from_parts(virt: VirtAddr, phys: PhysAddr, size: usize) -> Self {
        Self {
            virt_base: virt.as_u64(),
            phys_base: phys.as_u64(),
            size,
        }
    }

    #[inline]
    pub const fn is_mapped(&self) -> bool {
        self.virt_base != 0
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub const fn phys_base(&self) -> PhysAddr {
        PhysAddr(self.phys_base)
    }

    /// Whether `[offset, offset + width)` lies inside the window and is
    /// naturally aligned. Used by the register read/write ioctls to
    /// validate user-supplied offsets before touching hardware.
    #[inline]
    pub const fn offset_valid(&self, offset: usize, width: usize) -> bool {
        offset % width == 0 && offset + width <= self.size
    }

    #[inline]
    pub fn read<T: Copy>(&self, offset: usize) -> T {
        let size = core::mem::size_of::<T>();
        let end = offset.checked_add(size).expect("offset overflow");

        debug_assert!(
            end <= self.size,
            "MMIO read out of bounds: offset={}, size={}, region_size={}",
            offset,
            size,
            self.size
        );

        debug_assert!(
            offset % size == 0,
            "MMIO read misaligned: offset={}, align={}",
            offset,
            size
        );

        let ptr = (self.virt_base + offset as u64) as *const T;
        unsafe { read_volatile(ptr) }
    }

    #[inline]
    pub fn write<T: Copy>(&self, offset: usize, value: T) {
        let size = core::mem::size_of::<T>();
        let end = offset.checked_add(size).expect("offset overflow");

        debug_assert!(
            end <= self.size,
            "MMIO write out of bounds: offset={}, size={}, region_size={}",
            offset,
            size,
            self.size
        );

        debug_assert!(
            offset % size == 0,
            "MMIO write misaligned: offset={}, align={}",
            offset,
            size
        );

        let ptr = (self.virt_base + offset as u64) as *mut T;
        unsafe { write_volatile(ptr, value) }
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        self.read(offset)
    }

    #[inline]
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write(offset, value)
    }
}
