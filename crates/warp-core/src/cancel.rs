//! Session-wide cancellation signal.
//!
//! One [`CancellationSignal`] is created per session and cloned into every
//! concurrently running task (interrupt listener, tunnel pump, background
//! sync loop). It transitions from open to closed exactly once; closing it
//! again is a no-op, never a fault.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;

/// Broadcast, close-once cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    closed: AtomicBool,
    tx: watch::Sender<bool>,
}

impl CancellationSignal {
    /// Create an open signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Close the signal.
    ///
    /// Returns `true` for the call that actually performed the transition and
    /// `false` for every later call.
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.inner.tx.send_replace(true);
        true
    }

    /// Non-blocking query.
    pub fn is_cancelled(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolve once the signal is closed (immediately if it already is).
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives in `inner`, which we hold, so the channel never closes.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}
