use std::sync::atomic::{AtomicBool, Ordering};

/// At-most-one-concurrent-run slot.
///
/// ```
/// use fetchtrack_indexer::SingleFlight;
///
/// let flight = SingleFlight::default();
/// let permit = flight.try_acquire().unwrap();
/// assert!(flight.try_acquire().is_none());
/// drop(permit);
/// assert!(flight.try_acquire().is_some());
/// ```
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}
impl SingleFlight {
    /// Claim the slot, or `None` if it is already taken.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Permit { running: &self.running })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Holds the [`SingleFlight`] slot until dropped.
#[derive(Debug)]
pub struct Permit<'a> {
    running: &'a AtomicBool,
}
impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
