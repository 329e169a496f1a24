//! Fixed pools of DMA buffers with three views: by index, by bus handle,
//! and an iterable free list.
//!
//! Two pools exist per device (TX, RX), built once at bring-up. Indices
//! are sequential from a base; the RX base sits above the TX range so a
//! bare index identifies its pool. The bus-handle view supports the
//! interrupt path, which must resolve a completed bus address back to a
//! buffer in O(log n).

extern crate alloc;

use alloc::vec::Vec;

use axstream_abi::addr::PhysAddr;
use axstream_abi::dma::FrameFlags;
use axstream_lib::IrqMutex;
use axstream_lib::kernel_services::dma_memory::{self, DmaMapping};
use axstream_lib::klog_warn;

use super::buffer::{BufOwner, DmaBuffer, FrameInfo, HOLDER_NONE, PoolKind};
use super::config::DmaMode;
use super::types::DmaError;

/// One buffer's memory: the CPU mapping and the handle the device sees.
/// In ACP mode `bus` is the rewritten accelerator-port address; otherwise
/// it equals `mapping.bus`.
#[derive(Clone, Copy)]
struct BufMap {
    mapping: DmaMapping,
    bus: PhysAddr,
}

struct PoolInner {
    meta: Vec<DmaBuffer>,
    /// LIFO free list of buffer indices.
    free: Vec<u32>,
}

pub struct BufferPool {
    kind: PoolKind,
    mode: DmaMode,
    base: u32,
    count: u32,
    buf_size: u32,
    /// Immutable after create; payload access needs no lock.
    maps: Vec<BufMap>,
    /// Immutable after create; sorted by bus handle for binary search.
    by_bus: Vec<(u64, u32)>,
    inner: IrqMutex<PoolInner>,
}

impl BufferPool {
    /// Allocate `count` buffers of `buf_size` bytes each, indexed from
    /// `base`, using the platform's DMA memory services per `mode`.
    pub fn create(
        kind: PoolKind,
        mode: DmaMode,
        base: u32,
        count: u32,
        buf_size: u32,
    ) -> Result<Self, DmaError> {
        let mut maps = Vec::with_capacity(count as usize);
        let mut meta = Vec::with_capacity(count as usize);
        let mut free = Vec::with_capacity(count as usize);

        for i in 0..count {
            let mapping = match mode {
                DmaMode::Streaming => dma_memory::alloc_streaming(buf_size as usize),
                DmaMode::Coherent | DmaMode::Acp => {
                    dma_memory::alloc_coherent(buf_size as usize)
                }
            };
            if !mapping.is_valid() {
                free_maps(&maps, mode, buf_size);
                return Err(DmaError::NoBufferSpace);
            }
            let bus = match mode {
                DmaMode::Acp => dma_memory::map_acp(mapping.bus),
                _ => mapping.bus,
            };
            maps.push(BufMap { mapping, bus });
            meta.push(DmaBuffer::new(base + i));
            free.push(base + i);
        }

        let mut by_bus: Vec<(u64, u32)> = maps
            .iter()
            .enumerate()
            .map(|(i, m)| (m.bus.as_u64(), base + i as u32))
            .collect();
        by_bus.sort_unstable_by_key(|&(bus, _)| bus);

        Ok(Self {
            kind,
            mode,
            base,
            count,
            buf_size,
            maps,
            by_bus,
            inner: IrqMutex::new(PoolInner { meta, free }),
        })
    }

    /// Return every DMA mapping to the platform. The pool is unusable
    /// afterwards; only the teardown path calls this.
    pub fn release_memory(&mut self) {
        free_maps(&self.maps, self.mode, self.buf_size);
        self.maps.clear();
        self.by_bus.clear();
        let mut inner = self.inner.lock();
        inner.meta.clear();
        inner.free.clear();
    }

    #[inline]
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    #[inline]
    pub fn base(&self) -> u32 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Whether `index` belongs to this pool.
    #[inline]
    pub fn contains(&self, index: u32) -> bool {
        index >= self.base && index < self.base + self.count
    }

    #[inline]
    fn slot(&self, index: u32) -> usize {
        debug_assert!(self.contains(index));
        (index - self.base) as usize
    }

    /// Number of buffers on the free list.
    pub fn free_count(&self) -> u32 {
        self.inner.lock().free.len() as u32
    }

    /// Buffer counts by owner state: `[free, armed, ready, held]`.
    /// Diagnostic snapshot for the proc dump and the conservation tests.
    pub fn owner_counts(&self) -> [u32; 4] {
        let inner = self.inner.lock();
        let mut counts = [0u32; 4];
        for meta in inner.meta.iter() {
            let i = match meta.owner {
                BufOwner::Free => 0,
                BufOwner::Armed => 1,
                BufOwner::Ready => 2,
                BufOwner::Held => 3,
            };
            counts[i] += 1;
        }
        counts
    }

    // -------------------------------------------------------------------
    // Free-list operations
    // -------------------------------------------------------------------

    /// Detach one buffer from the free list. The buffer stays `Free`
    /// until the caller arms it or marks it held.
    pub fn acquire_free(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        let index = inner.free.pop()?;
        let slot = self.slot(index);
        inner.meta[slot].listed = false;
        Some(index)
    }

    /// Put a buffer back on the free list. Idempotent: a buffer already
    /// listed is left alone and `false` is returned, so racing callers
    /// cannot create duplicates.
    pub fn release(&self, index: u32) -> bool {
        if !self.contains(index) {
            return false;
        }
        let slot = self.slot(index);
        let mut inner = self.inner.lock();
        if inner.meta[slot].listed {
            return false;
        }
        inner.meta[slot].owner = BufOwner::Free;
        inner.meta[slot].reset_frame();
        inner.meta[slot].listed = true;
        inner.free.push(index);
        true
    }

    /// Release every buffer held by subscriber `sub`. Returns how many
    /// were reclaimed. Used by close.
    pub fn release_held_by(&self, sub: u32) -> u32 {
        let mut reclaimed = 0;
        let mut inner = self.inner.lock();
        for slot in 0..inner.meta.len() {
            let meta = &mut inner.meta[slot];
            if meta.owner == BufOwner::Held && meta.holder == sub {
                let index = meta.index;
                meta.owner = BufOwner::Free;
                meta.reset_frame();
                meta.listed = true;
                inner.free.push(index);
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Force every buffer back to `Free`, regardless of state. Shutdown
    /// only: the device must already be offline.
    pub fn force_all_free(&self) {
        let mut inner = self.inner.lock();
        inner.free.clear();
        for slot in 0..inner.meta.len() {
            let index = inner.meta[slot].index;
            inner.meta[slot].owner = BufOwner::Free;
            inner.meta[slot].reset_frame();
            inner.meta[slot].listed = true;
            inner.free.push(index);
        }
    }

    // -------------------------------------------------------------------
    // Reverse lookup
    // -------------------------------------------------------------------

    /// Resolve a bus handle from a hardware completion back to a buffer
    /// index. O(log n); lock-free (the bus view is immutable).
    pub fn find_by_bus(&self, bus: PhysAddr) -> Option<u32> {
        self.by_bus
            .binary_search_by_key(&bus.as_u64(), |&(b, _)| b)
            .ok()
            .map(|pos| self.by_bus[pos].1)
    }

    // -------------------------------------------------------------------
    // State-machine hooks
    // -------------------------------------------------------------------

    /// Host-to-device handoff hook: verify the mapping is still valid and,
    /// in streaming mode, flush CPU caches. Failure prevents the state
    /// transition the caller is about to make.
    pub fn to_hw(&self, index: u32) -> Result<(), DmaError> {
        let map = self.map_of(index)?;
        if !dma_memory::mapping_valid(map.mapping.bus, self.buf_size as usize) {
            return Err(DmaError::MappingFailed);
        }
        if self.mode == DmaMode::Streaming {
            dma_memory::sync_for_device(map.mapping.bus, self.buf_size as usize);
        }
        Ok(())
    }

    /// Device-to-host handoff hook: verify the mapping and, in streaming
    /// mode, invalidate CPU caches.
    pub fn from_hw(&self, index: u32) -> Result<(), DmaError> {
        let map = self.map_of(index)?;
        if !dma_memory::mapping_valid(map.mapping.bus, self.buf_size as usize) {
            return Err(DmaError::MappingFailed);
        }
        if self.mode == DmaMode::Streaming {
            dma_memory::sync_for_cpu(map.mapping.bus, self.buf_size as usize);
        }
        Ok(())
    }

    /// Hand a buffer to the device: `to_hw` then transition to `Armed`.
    ///
    /// On failure the buffer is left in its prior state; the caller
    /// decides whether to release it.
    pub fn arm(&self, index: u32) -> Result<(), DmaError> {
        self.to_hw(index)?;
        self.transition(index, BufOwner::Armed)?;
        Ok(())
    }

    /// Record a device completion: `from_hw`, transition `Armed→Ready`,
    /// and store the frame metadata from the completion descriptor.
    pub fn complete(
        &self,
        index: u32,
        size: u32,
        flags: FrameFlags,
        dest: u8,
        error: u32,
    ) -> Result<(), DmaError> {
        self.from_hw(index)?;
        let slot = self.slot_checked(index)?;
        let mut inner = self.inner.lock();
        let meta = &mut inner.meta[slot];
        if !meta.owner.transition_ok(BufOwner::Ready) {
            return Err(DmaError::BadIndex);
        }
        meta.owner = BufOwner::Ready;
        meta.size = size;
        meta.flags = flags;
        meta.dest = dest;
        meta.error = error;
        meta.count += 1;
        Ok(())
    }

    /// Deliver a buffer to subscriber `sub` (`Ready→Held`), or hand a
    /// freshly acquired TX buffer to it (`Free→Held`).
    pub fn mark_held(&self, index: u32, sub: u32) -> Result<(), DmaError> {
        let slot = self.slot_checked(index)?;
        let mut inner = self.inner.lock();
        let meta = &mut inner.meta[slot];
        if meta.listed || !meta.owner.transition_ok(BufOwner::Held) {
            return Err(DmaError::BadIndex);
        }
        meta.owner = BufOwner::Held;
        meta.holder = sub;
        Ok(())
    }

    fn transition(&self, index: u32, to: BufOwner) -> Result<(), DmaError> {
        let slot = self.slot_checked(index)?;
        let mut inner = self.inner.lock();
        let meta = &mut inner.meta[slot];
        if meta.listed || !meta.owner.transition_ok(to) {
            return Err(DmaError::BadIndex);
        }
        meta.owner = to;
        if to != BufOwner::Held {
            meta.holder = HOLDER_NONE;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Metadata access
    // -------------------------------------------------------------------

    pub fn owner_of(&self, index: u32) -> Option<BufOwner> {
        if !self.contains(index) {
            return None;
        }
        let slot = self.slot(index);
        Some(self.inner.lock().meta[slot].owner)
    }

    pub fn holder_of(&self, index: u32) -> Option<u32> {
        if !self.contains(index) {
            return None;
        }
        let slot = self.slot(index);
        let holder = self.inner.lock().meta[slot].holder;
        if holder == HOLDER_NONE { None } else { Some(holder) }
    }

    /// Snapshot the frame metadata of a buffer.
    pub fn frame_info(&self, index: u32) -> Result<FrameInfo, DmaError> {
        let slot = self.slot_checked(index)?;
        let inner = self.inner.lock();
        let meta = &inner.meta[slot];
        Ok(FrameInfo {
            size: meta.size,
            flags: meta.flags,
            error: meta.error,
            dest: meta.dest,
        })
    }

    /// Set the frame metadata on a buffer about to be posted (TX path).
    pub fn set_frame(
        &self,
        index: u32,
        size: u32,
        flags: FrameFlags,
        dest: u8,
    ) -> Result<(), DmaError> {
        let slot = self.slot_checked(index)?;
        let mut inner = self.inner.lock();
        let meta = &mut inner.meta[slot];
        meta.size = size;
        meta.flags = flags;
        meta.dest = dest;
        meta.error = 0;
        meta.count += 1;
        Ok(())
    }

    /// Times buffer `index` has carried a frame.
    pub fn use_count(&self, index: u32) -> Result<u64, DmaError> {
        let slot = self.slot_checked(index)?;
        Ok(self.inner.lock().meta[slot].count)
    }

    // -------------------------------------------------------------------
    // Address access
    // -------------------------------------------------------------------

    /// The handle the device sees for this buffer (ACP-rewritten in ACP
    /// mode).
    pub fn bus_handle(&self, index: u32) -> Result<PhysAddr, DmaError> {
        Ok(self.map_of(index)?.bus)
    }

    /// The CPU-physical address backing this buffer; the mmap path hands
    /// this to the platform to map into the subscriber.
    pub fn phys_of(&self, index: u32) -> Result<PhysAddr, DmaError> {
        Ok(self.map_of(index)?.mapping.bus)
    }

    /// Raw payload pointer, valid for `buf_size` bytes. The caller must
    /// respect the ownership state: only the exclusive owner (subscriber
    /// for `Held`, device for `Armed`) may touch the payload.
    pub(crate) fn data_ptr(&self, index: u32) -> Result<*mut u8, DmaError> {
        let map = self.map_of(index)?;
        Ok(map.mapping.virt.as_u64() as *mut u8)
    }

    fn map_of(&self, index: u32) -> Result<&BufMap, DmaError> {
        let slot = self.slot_checked(index)?;
        Ok(&self.maps[slot])
    }

    fn slot_checked(&self, index: u32) -> Result<usize, DmaError> {
        if !self.contains(index) {
            return Err(DmaError::BadIndex);
        }
        Ok(self.slot(index))
    }
}

fn free_maps(maps: &[BufMap], mode: DmaMode, buf_size: u32) {
    for map in maps {
        match mode {
            DmaMode::Streaming => {
                dma_memory::free_streaming(map.mapping, buf_size as usize);
            }
            DmaMode::Coherent | DmaMode::Acp => {
                dma_memory::free_coherent(map.mapping, buf_size as usize);
            }
        }
    }
}

/// Warn-and-release helper for the arming failure path: a buffer whose
/// `to_hw` fails goes back to `Free` instead of `Armed`.
pub fn release_on_arm_failure(pool: &BufferPool, index: u32, err: DmaError) {
    klog_warn!(
        "dma: arm failed for buffer {} ({:?}), returning to free list",
        index,
        err
    );
    pool.release(index);
}
