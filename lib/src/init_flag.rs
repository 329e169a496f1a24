//! Set-once claim flags for singleton bring-up.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// A claim flag guarding one-shot initialization (driver probe, singleton
/// device claim). `claim()` succeeds exactly once until `reset()`.
pub struct InitFlag {
    claimed: AtomicBool,
}

impl InitFlag {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Attempt to claim. Returns `true` for exactly one caller.
    #[inline]
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    /// Release the claim (probe failure teardown path).
    #[inline]
    pub fn reset(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A small atomic state byte for components with a lifecycle beyond
/// claimed/unclaimed (offline → ready → tearing down).
pub struct StateFlag {
    state: AtomicU8,
}

impl StateFlag {
    pub const fn new(initial: u8) -> Self {
        Self {
            state: AtomicU8::new(initial),
        }
    }

    #[inline]
    pub fn get(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }

    /// Transition `from → to`; returns `false` if the current state was not
    /// `from`.
    #[inline]
    pub fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
