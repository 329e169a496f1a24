//! Bounded per-subscriber FIFO of ready buffer indices.
//!
//! Single producer (device-completion context), multiple waiters
//! (subscriber read/poll). Capacity equals the RX pool size, so the
//! software side never drops: the hardware-managed free list is the
//! bounded resource.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use axstream_lib::kernel_services::driver_runtime::signal_process_group;
use axstream_lib::{IrqMutex, WaitQueue};

use super::types::DmaError;

/// Out-of-band notification signal (SIGIO).
pub const DMA_ASYNC_SIGNAL: u8 = 29;

struct QueueState {
    ring: Vec<u32>,
    head: usize,
    tail: usize,
    count: usize,
    cancelled: bool,
    /// Process group registered for async notification; 0 = none.
    async_pgid: u32,
}

impl QueueState {
    fn push(&mut self, index: u32) -> bool {
        if self.count >= self.ring.len() {
            return false;
        }
        self.ring[self.head] = index;
        self.head = (self.head + 1) % self.ring.len();
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        let index = self.ring[self.tail];
        self.tail = (self.tail + 1) % self.ring.len();
        self.count -= 1;
        Some(index)
    }
}

/// The READY-buffer queue of one subscriber, with its wait primitive and
/// async-notify registration.
pub struct SubQueue {
    inner: IrqMutex<QueueState>,
    waiters: WaitQueue,
}

impl SubQueue {
    /// A queue holding up to `capacity` buffer references.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: IrqMutex::new(QueueState {
                ring: vec![0; capacity.max(1)],
                head: 0,
                tail: 0,
                count: 0,
                cancelled: false,
                async_pgid: 0,
            }),
            waiters: WaitQueue::new(),
        }
    }

    /// Enqueue a ready buffer. Called only from device-completion context.
    ///
    /// Wakes one waiter, and on the empty→non-empty transition fires the
    /// registered async notification. Returns the index back on failure
    /// (cancelled or full) so the caller can re-arm the buffer.
    pub fn push(&self, index: u32) -> Result<(), u32> {
        let notify_pgid = {
            let mut state = self.inner.lock();
            if state.cancelled {
                return Err(index);
            }
            let was_empty = state.count == 0;
            if !state.push(index) {
                return Err(index);
            }
            if was_empty { state.async_pgid } else { 0 }
        };

        if notify_pgid != 0 {
            let _ = signal_process_group(notify_pgid, DMA_ASYNC_SIGNAL);
        }
        self.waiters.wake_one();
        Ok(())
    }

    /// Dequeue one ready buffer, blocking up to `timeout_ms` when empty
    /// (`None` = wait indefinitely).
    ///
    /// Returns `Ok(None)` when nothing arrived (non-blocking callers, an
    /// expired timeout, or no scheduler to block on) and
    /// `Err(NotAvailable)` once the queue is cancelled.
    pub fn pop(&self, timeout_ms: Option<u64>, nonblock: bool) -> Result<Option<u32>, DmaError> {
        loop {
            {
                let mut state = self.inner.lock();
                if state.cancelled {
                    return Err(DmaError::NotAvailable);
                }
                if let Some(index) = state.pop() {
                    return Ok(Some(index));
                }
            }
            if nonblock {
                return Ok(None);
            }

            let ready = || {
                let state = self.inner.lock();
                state.count > 0 || state.cancelled
            };
            let woke = match timeout_ms {
                Some(ms) => self.waiters.wait_event_timeout(ready, ms),
                None => self.waiters.wait_event(ready),
            };
            if !woke {
                // Timeout, wait-queue full, or no scheduler available.
                return Ok(None);
            }
        }
    }

    /// Dequeue up to `out.len()` ready buffers without blocking. Returns
    /// the number written.
    pub fn pop_bulk(&self, out: &mut [u32]) -> usize {
        let mut state = self.inner.lock();
        let mut n = 0;
        while n < out.len() {
            match state.pop() {
                Some(index) => {
                    out[n] = index;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Non-destructive count of queued buffers; used by poll.
    pub fn ready_count(&self) -> usize {
        self.inner.lock().count
    }

    /// Register `pgid` for one out-of-band signal per empty→non-empty
    /// transition. Passing 0 unregisters.
    pub fn set_async_pgid(&self, pgid: u32) {
        self.inner.lock().async_pgid = pgid;
    }

    pub fn async_pgid(&self) -> u32 {
        self.inner.lock().async_pgid
    }

    /// Block until the queue is readable (non-empty or cancelled) or the
    /// timeout expires. Non-destructive; the poll glue parks here.
    pub fn wait_ready(&self, timeout_ms: Option<u64>) -> bool {
        let ready = || {
            let state = self.inner.lock();
            state.count > 0 || state.cancelled
        };
        match timeout_ms {
            Some(ms) => self.waiters.wait_event_timeout(ready, ms),
            None => self.waiters.wait_event(ready),
        }
    }

    /// Cancel the queue: refuse further pushes, hand every queued index to
    /// `reclaim`, and wake all waiters so blocked readers observe the
    /// cancellation. Close calls this exactly once.
    pub fn cancel(&self, mut reclaim: impl FnMut(u32)) {
        let drained = {
            let mut state = self.inner.lock();
            state.cancelled = true;
            state.async_pgid = 0;
            let mut drained = Vec::with_capacity(state.count);
            while let Some(index) = state.pop() {
                drained.push(index);
            }
            drained
        };
        for index in drained {
            reclaim(index);
        }
        self.waiters.wake_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }
}
