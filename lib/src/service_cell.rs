//! Set-once storage for kernel service tables.
//!
//! A `ServiceCell` holds a `&'static` table of function pointers that the
//! platform registers exactly once during bring-up. Consumers read the
//! table lock-free on every call.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Set-once cell holding a `&'static T` service table.
pub struct ServiceCell<T: 'static> {
    ptr: AtomicPtr<T>,
}

impl<T: 'static> ServiceCell<T> {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Install the table. Returns `false` if a table was already installed
    /// (the original installation wins).
    pub fn install(&self, table: &'static T) -> bool {
        let raw = table as *const T as *mut T;
        self.ptr
            .compare_exchange(
                core::ptr::null_mut(),
                raw,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The installed table, or `None` before registration.
    #[inline]
    pub fn get(&self) -> Option<&'static T> {
        let raw = self.ptr.load(Ordering::Acquire);
        if raw.is_null() {
            None
        } else {
            // SAFETY: install() only stores pointers derived from &'static T.
            Some(unsafe { &*raw })
        }
    }

    #[inline]
    pub fn is_installed(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }
}

impl<T: 'static> Default for ServiceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
