// src/flight.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot busy token shared by sends and session loads.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    held: Arc<AtomicBool>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails fast with `None` when another operation holds the slot.
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { held: Arc::clone(&self.held) })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the slot when dropped, on every exit path including panics and cancelled tasks.
#[derive(Debug)]
pub struct InFlightGuard {
    held: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
