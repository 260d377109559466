//! Cooperative shutdown signal shared by every consumer loop.

use tokio::sync::watch;

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observes the shutdown signal.
///
/// Dropping the [`ShutdownTrigger`] counts as a shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    /// Creates a trigger together with its first observer.
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    /// Returns another observer.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Signals every observer. Calling it again has no effect.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// Returns true once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Waits until shutdown is requested. Returns immediately if it already was.
    pub async fn wait(&mut self) {
        // Err means the trigger is gone.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_every_observer() {
        let (trigger, mut first) = ShutdownTrigger::new();
        let mut second = trigger.subscribe();
        assert!(!first.is_triggered());

        trigger.trigger();
        first.wait().await;
        second.wait().await;
        assert!(first.is_triggered());
        assert!(second.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_triggered() {
        let (trigger, mut shutdown) = ShutdownTrigger::new();
        let waiter = tokio::spawn(async move { shutdown.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        trigger.trigger();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = ShutdownTrigger::new();
        drop(trigger);
        shutdown.wait().await;
        assert!(shutdown.is_triggered());
    }
}
