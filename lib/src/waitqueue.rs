//! Wait queue primitive for blocking/waking kernel tasks.
//!
//! Provides a fixed-capacity queue of blocked tasks that can be woken
//! individually (`wake_one`) or all at once (`wake_all`). Integrates with
//! the scheduler through the `driver_runtime` kernel service.
//!
//! # Usage
//!
//! ```rust,ignore
//! static MY_WQ: WaitQueue = WaitQueue::new();
//!
//! // Waiting side (consumer):
//! MY_WQ.wait_event(|| has_data());
//!
//! // Waking side (producer):
//! MY_WQ.wake_one();
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use crate::IrqMutex;
use crate::clock;
use crate::kernel_services::driver_runtime::{
    self, DriverTaskHandle, block_current_task, current_task, unblock_task,
};

/// Maximum number of tasks that can wait on a single `WaitQueue`.
const WAITQUEUE_CAPACITY: usize = 32;

/// A null task handle sentinel.
const NULL_HANDLE: DriverTaskHandle = core::ptr::null_mut();

/// Inner state of a wait queue, protected by `IrqMutex`.
struct WaitQueueInner {
    /// Waiting task handles. Null entries are empty slots.
    waiters: [DriverTaskHandle; WAITQUEUE_CAPACITY],
    /// Number of active waiters.
    count: usize,
}

impl WaitQueueInner {
    const fn new() -> Self {
        Self {
            waiters: [NULL_HANDLE; WAITQUEUE_CAPACITY],
            count: 0,
        }
    }

    /// Add `task` to the queue. Returns `true` on success, `false` if full.
    fn enqueue(&mut self, task: DriverTaskHandle) -> bool {
        if task.is_null() {
            return false;
        }
        for slot in self.waiters.iter_mut() {
            if slot.is_null() {
                *slot = task;
                self.count += 1;
                return true;
            }
        }
        false
    }

    /// Remove and return the first waiting task, or `None`.
    fn dequeue_one(&mut self) -> Option<DriverTaskHandle> {
        for slot in self.waiters.iter_mut() {
            if !slot.is_null() {
                let task = *slot;
                *slot = NULL_HANDLE;
                self.count = self.count.saturating_sub(1);
                return Some(task);
            }
        }
        None
    }

    /// Remove all waiting tasks, returning the count. Calls `f` for each.
    fn dequeue_all(&mut self, mut f: impl FnMut(DriverTaskHandle)) -> usize {
        let mut woken = 0;
        for slot in self.waiters.iter_mut() {
            if !slot.is_null() {
                let task = *slot;
                *slot = NULL_HANDLE;
                f(task);
                woken += 1;
            }
        }
        self.count = 0;
        woken
    }

    /// Remove a specific task from the queue (e.g. on timeout or cancel).
    fn remove_task(&mut self, task: DriverTaskHandle) -> bool {
        for slot in self.waiters.iter_mut() {
            if *slot == task {
                *slot = NULL_HANDLE;
                self.count = self.count.saturating_sub(1);
                return true;
            }
        }
        false
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// SAFETY: `DriverTaskHandle` (`*mut c_void`) is managed by the scheduler.
// Access is synchronized through the `IrqMutex`.
unsafe impl Send for WaitQueueInner {}

/// A wait queue for blocking and waking kernel tasks.
///
/// Tasks call [`wait_event`](Self::wait_event) to sleep until a condition
/// is met. Producers call [`wake_one`](Self::wake_one) or
/// [`wake_all`](Self::wake_all) when the condition changes.
pub struct WaitQueue {
    inner: IrqMutex<WaitQueueInner>,
    /// Monotonic counter incremented on each wake, used for spurious-wakeup
    /// detection and debugging.
    generation: AtomicU32,
}

impl WaitQueue {
    /// Create a new empty wait queue.
    pub const fn new() -> Self {
        Self {
            inner: IrqMutex::new(WaitQueueInner::new()),
            generation: AtomicU32::new(0),
        }
    }

    /// Block the current task until `condition()` returns `true`.
    ///
    /// The condition is checked under the wait queue lock before sleeping.
    /// If the condition is already true, returns immediately without
    /// blocking.
    ///
    /// Returns `true` if the condition was met, `false` if the wait queue
    /// was full or the scheduler is unavailable (caller should retry or
    /// return EAGAIN).
    ///
    /// # Lost-wakeup safety
    ///
    /// The scheduler's pending-wakeup flag prevents lost wakeups: if
    /// `unblock_task()` is called between enqueue and
    /// `block_current_task()`, the block is skipped.
    pub fn wait_event<F: Fn() -> bool>(&self, condition: F) -> bool {
        loop {
            // Check condition first — fast path.
            if condition() {
                return true;
            }

            if !driver_runtime::is_driver_runtime_initialized() {
                return false;
            }

            let task = current_task();
            if task.is_null() {
                return false;
            }

            {
                let mut inner = self.inner.lock();
                // Re-check condition under lock to close the race window.
                if condition() {
                    return true;
                }
                if !inner.enqueue(task) {
                    // Queue full — cannot wait.
                    return false;
                }
            }
            // Lock dropped here — window where wake_one could fire.
            // The scheduler's pending-wakeup flag covers this window.

            block_current_task();

            // We were woken up (or spurious wakeup). Re-check condition
            // at the top of the loop.
        }
    }

    /// Block the current task until `condition()` returns `true` or
    /// `timeout_ms` milliseconds elapse.
    ///
    /// Returns `true` if the condition was met, `false` on timeout or
    /// error.
    pub fn wait_event_timeout<F: Fn() -> bool>(&self, condition: F, timeout_ms: u64) -> bool {
        if condition() {
            return true;
        }

        if !driver_runtime::is_driver_runtime_initialized() {
            return false;
        }

        let deadline_ms = clock::uptime_ms().saturating_add(timeout_ms);

        loop {
            if condition() {
                return true;
            }

            let now = clock::uptime_ms();
            if now >= deadline_ms {
                // Timeout — remove ourselves from the queue if still there.
                let task = current_task();
                if !task.is_null() {
                    let mut inner = self.inner.lock();
                    inner.remove_task(task);
                }
                return false;
            }

            let task = current_task();
            if task.is_null() {
                return false;
            }

            {
                let mut inner = self.inner.lock();
                if condition() {
                    return true;
                }
                if !inner.enqueue(task) {
                    return false;
                }
            }

            // Block and rely on wake_one/wake_all + re-check. The re-check
            // loop with uptime comparison achieves timed-wait correctness
            // at the cost of one extra context switch on timeout.
            block_current_task();
        }
    }

    /// Wake one waiting task.
    ///
    /// Returns `true` if a task was woken, `false` if the queue was empty.
    pub fn wake_one(&self) -> bool {
        let task = {
            let mut inner = self.inner.lock();
            inner.dequeue_one()
        };

        if let Some(task) = task {
            self.generation.fetch_add(1, Ordering::Relaxed);
            let _ = unblock_task(task);
            true
        } else {
            false
        }
    }

    /// Wake all waiting tasks.
    ///
    /// Returns the number of tasks woken.
    pub fn wake_all(&self) -> usize {
        // Collect tasks under the lock, then unblock outside the lock
        // to avoid holding the wait queue lock while the scheduler does
        // its work.
        let mut tasks = [NULL_HANDLE; WAITQUEUE_CAPACITY];
        let count = {
            let mut inner = self.inner.lock();
            let mut i = 0;
            inner.dequeue_all(|t| {
                if i < tasks.len() {
                    tasks[i] = t;
                    i += 1;
                }
            })
        };

        if count > 0 {
            self.generation.fetch_add(1, Ordering::Relaxed);
        }

        for task in &tasks[..count] {
            let _ = unblock_task(*task);
        }
        count
    }

    /// Check if there are any waiters.
    pub fn has_waiters(&self) -> bool {
        !self.inner.lock().is_empty()
    }

    /// Get the number of waiting tasks.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().count
    }

    /// Remove a specific task from the wait queue.
    ///
    /// Used when a task is terminated while waiting, to prevent dangling
    /// handles.
    pub fn remove_task(&self, task: DriverTaskHandle) {
        let mut inner = self.inner.lock();
        inner.remove_task(task);
    }

    /// Get the wake generation counter (for debugging / testing).
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
