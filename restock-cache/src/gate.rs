//! One-shot readiness signal.
//!
//! Separates "never loaded" from "loaded at least once" so readers wait
//! (bounded) for the first refresh instead of observing an empty cache.

use std::time::Duration;
use tokio::sync::watch;

/// Gate that opens once and stays open.
#[derive(Debug)]
pub struct ReadinessGate {
    tx: watch::Sender<bool>,
}

impl ReadinessGate {
    /// Create a closed gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Open the gate, waking every waiter.
    ///
    /// Idempotent; returns true only for the call that actually opened it.
    pub fn open(&self) -> bool {
        self.tx.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    /// Returns true once the gate has been opened.
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait up to `timeout` for the gate to open.
    ///
    /// Returns immediately if it is already open.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        if self.is_open() {
            return true;
        }

        let mut rx = self.tx.subscribe();
        let opened = tokio::time::timeout(timeout, rx.wait_for(|open| *open)).await;
        matches!(opened, Ok(Ok(_)))
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_open());
        assert!(gate.open());
        assert!(!gate.open());
        assert!(gate.is_open());
        assert!(gate.wait_ready(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_when_closed() {
        let gate = ReadinessGate::new();
        assert!(!gate.wait_ready(Duration::from_secs(300)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_open() {
        let gate = Arc::new(ReadinessGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_ready(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.open();

        let ready = waiter.await.expect("waiter task should not panic");
        assert!(ready);
    }
}
