//! Cooperative stop requests for a publication run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Polled once before each record; a `true` answer stops the run after the
/// record in flight.
pub trait SignalSource {
    fn interrupted(&self) -> bool;
}

/// Shared flag a signal handler can raise from another thread.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }
}

impl SignalSource for InterruptFlag {
    fn interrupted(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NeverInterrupted;

impl SignalSource for NeverInterrupted {
    fn interrupted(&self) -> bool {
        false
    }
}
