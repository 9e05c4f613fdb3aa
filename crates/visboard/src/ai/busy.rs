use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "operation in progress" flag.
///
/// [`BusyFlag::try_acquire`] hands out a guard that clears the flag when
/// dropped, so the flag is reset on every exit path.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

#[must_use = "the flag is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the operation is already running.
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(self.0.clone()))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
