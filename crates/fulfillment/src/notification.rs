//! Notification dispatch for settled orders.
//!
//! Delivery is at-least-once: a message is acked only after the send
//! returned, so a crash mid-send notifies the user twice on redelivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{OrderResult, ResultStatus};
use event_bus::{EventBus, Topology};
use tokio::task::JoinHandle;

use crate::{Disposition, MessageHandler, Result, Shutdown, spawn_consumer};

/// A channel that tells a user how their order ended.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a notification for `result`.
    async fn send(&self, result: &OrderResult) -> Result<()>;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn send(&self, result: &OrderResult) -> Result<()> {
        (**self).send(result).await
    }
}

/// Placeholder channel that logs instead of emailing.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    latency: Duration,
}

impl LogNotifier {
    /// Default simulated send time.
    pub const DEFAULT_LATENCY: Duration = Duration::from_millis(200);

    /// Creates a notifier that takes `latency` per send.
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LATENCY)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, result: &OrderResult) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        match result.status {
            ResultStatus::Confirmed => {
                tracing::info!(order_id = %result.order_id, user_id = %result.user_id, "sending CONFIRM email");
            }
            ResultStatus::Cancelled => {
                tracing::info!(
                    order_id = %result.order_id,
                    user_id = %result.user_id,
                    reason = result.reason.as_deref().unwrap_or_default(),
                    "sending CANCEL email"
                );
            }
        }
        Ok(())
    }
}

/// Consumes `OrderResult` messages and notifies the user.
pub struct NotificationDispatcher<N: Notifier> {
    notifier: N,
}

impl<N: Notifier + 'static> NotificationDispatcher<N> {
    /// Creates a dispatcher sending through `notifier`.
    pub fn new(notifier: N) -> Self {
        Self { notifier }
    }

    /// Starts one consumer loop on the confirmed queue and one on the failed
    /// queue. Each loop stops on its own when `shutdown` fires.
    pub async fn spawn<B>(
        self: Arc<Self>,
        bus: &B,
        topology: &Topology,
        shutdown: &Shutdown,
    ) -> Result<Vec<JoinHandle<()>>>
    where
        B: EventBus + ?Sized,
    {
        let mut handles = Vec::with_capacity(2);
        for queue in [&topology.confirmed_queue, &topology.failed_queue] {
            let subscription = bus.consume(queue).await?;
            handles.push(spawn_consumer(
                subscription,
                Arc::clone(&self),
                shutdown.clone(),
            ));
        }
        Ok(handles)
    }
}

#[async_trait]
impl<N: Notifier> MessageHandler for NotificationDispatcher<N> {
    async fn handle(&self, body: &[u8], _redelivered: bool) -> Disposition {
        let result: OrderResult = match serde_json::from_slice(body) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "discarding malformed OrderResult message");
                return Disposition::Discard;
            }
        };

        let kind = match result.status {
            ResultStatus::Confirmed => "confirm",
            ResultStatus::Cancelled => "cancel",
        };
        match self.notifier.send(&result).await {
            Ok(()) => {
                metrics::counter!("notifications_sent_total", "kind" => kind).increment(1);
            }
            Err(e) => {
                // Best effort: the message is acked anyway.
                tracing::error!(order_id = %result.order_id, error = %e, "notification failed");
            }
        }
        Disposition::Ack
    }
}
