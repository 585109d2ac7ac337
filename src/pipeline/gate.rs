use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot exclusion gate for reconciliation runs.
///
/// At most one permit exists at a time within the process; a trigger that
/// arrives while a run holds the permit is rejected immediately, never queued.
/// The gate is process-local and does not prevent two separate process
/// instances from running concurrently.
#[derive(Clone, Default)]
pub struct RunGate {
    running: Arc<AtomicBool>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the single run slot; `None` means a run is in flight
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of holding the run slot.
///
/// Releases the gate when dropped, so every exit path — success, error, early
/// return, panic unwind — frees the slot.
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
