//! DMA memory services: allocation, cache maintenance, and address
//! rewriting for device-visible buffers.
//!
//! The platform decides where DMA memory comes from (CMA region, direct
//! map, IOMMU) and registers these entry points; the driver core only
//! sees `(virt, bus)` pairs.

use axstream_abi::addr::{PhysAddr, VirtAddr};

/// One DMA-capable allocation: the kernel virtual address the CPU uses
/// and the bus address the device uses. A null `virt` means allocation
/// failed.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DmaMapping {
    pub virt: VirtAddr,
    pub bus: PhysAddr,
}

impl DmaMapping {
    pub const INVALID: Self = Self {
        virt: VirtAddr::NULL,
        bus: PhysAddr::NULL,
    };

    #[inline]
    pub const fn is_valid(&self) -> bool {
        !self.virt.is_null()
    }
}

crate::define_service! {
    dma_memory => DmaMemoryServices {
        alloc_coherent(len: usize) -> DmaMapping;
        free_coherent(mapping: DmaMapping, len: usize);
        alloc_streaming(len: usize) -> DmaMapping;
        free_streaming(mapping: DmaMapping, len: usize);
        sync_for_device(bus: PhysAddr, len: usize);
        sync_for_cpu(bus: PhysAddr, len: usize);
        map_acp(bus: PhysAddr) -> PhysAddr;
        mapping_valid(bus: PhysAddr, len: usize) -> bool;
    }
}
