//! Cross-interrupt busy flag guarding an in-flight spark.
//!
//! The capture interrupt acquires the flag when it hands a fire event to the
//! scheduler; the compare interrupt that ends the dwell (or the stall path)
//! releases it. Acquisition is a compare-and-set, which `portable-atomic`
//! lowers to an interrupt-masked section on cores without native CAS.

use portable_atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct BusyFlag {
    busy: AtomicBool,
}

impl BusyFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Marks the flag busy. Returns `false` if it already was.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}
