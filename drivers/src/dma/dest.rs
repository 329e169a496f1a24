//! Destination ownership table: destination id → at-most-one subscriber.
//!
//! Read from device-completion context on every receive, mutated by
//! subscriber open/close/reconfigure. One short `IrqMutex` section covers
//! both; the lock order is destination table before subscriber queue,
//! never the reverse.

extern crate alloc;

use alloc::sync::Arc;

use axstream_abi::dma::{DMA_DEST_COUNT, DestMask};
use axstream_lib::IrqMutex;

use super::chardev::DmaSubscriber;
use super::types::DmaError;

struct DestState {
    owners: [Option<Arc<DmaSubscriber>>; DMA_DEST_COUNT],
}

pub struct DestTable {
    inner: IrqMutex<DestState>,
}

impl DestTable {
    pub fn new() -> Self {
        Self {
            inner: IrqMutex::new(DestState {
                owners: [const { None }; DMA_DEST_COUNT],
            }),
        }
    }

    /// Replace `sub`'s claimed destinations with `new_mask`.
    ///
    /// All-or-nothing: every newly claimed destination must be inside the
    /// device's capability mask and not owned by another subscriber. On
    /// conflict nothing changes and the conflict is reported. Destinations
    /// dropped from the mask return to the unowned state.
    pub fn claim(
        &self,
        sub: &Arc<DmaSubscriber>,
        new_mask: DestMask,
        dev_mask: &DestMask,
    ) -> Result<(), DmaError> {
        if !new_mask.is_subset_of(dev_mask) {
            return Err(DmaError::InvalidArgument);
        }

        let mut state = self.inner.lock();

        for dest in new_mask.iter() {
            if let Some(owner) = &state.owners[dest as usize] {
                if owner.id != sub.id {
                    return Err(DmaError::DestinationBusy);
                }
            }
        }

        for dest in 0..DMA_DEST_COUNT {
            let owned = state.owners[dest]
                .as_ref()
                .is_some_and(|owner| owner.id == sub.id);
            let wanted = new_mask.test(dest as u8);
            if owned && !wanted {
                state.owners[dest] = None;
            } else if !owned && wanted {
                state.owners[dest] = Some(sub.clone());
            }
        }

        // The claimed-mask lock nests inside the table lock (table < mask).
        *sub.claimed.lock() = new_mask;
        Ok(())
    }

    /// Release every destination owned by subscriber `sub_id`. Returns the
    /// number released. Close calls this before draining the queue, so a
    /// completion racing the unclaim re-arms to hardware instead of
    /// queueing.
    pub fn release_all(&self, sub_id: u32) -> u32 {
        let mut state = self.inner.lock();
        let mut released = 0;
        for dest in 0..DMA_DEST_COUNT {
            let owned = state.owners[dest]
                .as_ref()
                .is_some_and(|owner| owner.id == sub_id);
            if owned {
                state.owners[dest] = None;
                released += 1;
            }
        }
        released
    }

    /// Run `f` with the owner of `dest` (if any) while holding the table
    /// lock. The receive dispatch queues the buffer inside `f` so an
    /// unclaim cannot slip between lookup and enqueue.
    pub fn with_owner<R>(
        &self,
        dest: u8,
        f: impl FnOnce(Option<&Arc<DmaSubscriber>>) -> R,
    ) -> R {
        let state = self.inner.lock();
        f(state.owners[dest as usize].as_ref())
    }

    /// Owning subscriber id of `dest`, if claimed. Diagnostic.
    pub fn owner_id(&self, dest: u8) -> Option<u32> {
        let state = self.inner.lock();
        state.owners[dest as usize].as_ref().map(|owner| owner.id)
    }

    /// Number of currently claimed destinations. Diagnostic.
    pub fn claimed_count(&self) -> u32 {
        let state = self.inner.lock();
        state.owners.iter().filter(|o| o.is_some()).count() as u32
    }
}

impl Default for DestTable {
    fn default() -> Self {
        Self::new()
    }
}
