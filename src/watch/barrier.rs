//! One-shot readiness latch
//!
//! The latch is armed while entities are discovered at startup and fires once
//! the count drops to zero. After firing it is frozen: `add` and `done` are
//! ignored and `is_ready` stays true for the rest of the process.

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug)]
struct Counter {
    pending: usize,
    fired: bool,
}

/// Countdown latch sized dynamically during startup
#[derive(Debug)]
pub struct ReadinessBarrier {
    counter: Mutex<Counter>,
    ready_tx: watch::Sender<bool>,
}

impl ReadinessBarrier {
    /// Create a latch waiting for `pending` participants
    ///
    /// A latch created with zero participants is ready immediately.
    pub fn new(pending: usize) -> Self {
        let (ready_tx, _) = watch::channel(pending == 0);
        Self {
            counter: Mutex::new(Counter {
                pending,
                fired: pending == 0,
            }),
            ready_tx,
        }
    }

    /// Register `n` more participants
    pub fn add(&self, n: usize) {
        let mut counter = self.lock();
        if counter.fired {
            warn!("readiness barrier already fired, ignoring add({n})");
            return;
        }
        counter.pending += n;
        debug!("readiness barrier armed with {n} more, {} pending", counter.pending);
    }

    /// Count one participant as ready
    pub fn done(&self) {
        let mut counter = self.lock();
        if counter.fired {
            warn!("readiness barrier already fired, ignoring done()");
            return;
        }
        counter.pending = counter.pending.saturating_sub(1);
        if counter.pending == 0 {
            counter.fired = true;
            self.ready_tx.send_replace(true);
            debug!("readiness barrier fired");
        }
    }

    /// True once the latch fired; never resets
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Participants still outstanding
    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    /// Resolves once the latch fired
    pub async fn wait(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(|e| e.into_inner())
    }
}
