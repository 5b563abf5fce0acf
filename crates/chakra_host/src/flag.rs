use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that can be raised exactly once.
#[derive(Debug, Default)]
pub struct StatedFlag(AtomicBool);

impl StatedFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raises the flag. Returns `true` only for the call that raised it.
    pub fn set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
