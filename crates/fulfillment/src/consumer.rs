//! Cancellable consumption loop shared by every worker.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{Delivery, Subscription};
use tokio::task::JoinHandle;

use crate::Shutdown;

/// What to tell the broker once a delivery has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished; forget the message.
    Ack,
    /// The message can never be processed; drop it without requeue.
    Discard,
    /// Processing failed transiently; deliver the message again.
    Requeue,
}

/// Handles the body of a single delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message body and decides how it is settled.
    async fn handle(&self, body: &[u8], redelivered: bool) -> Disposition;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, body: &[u8], redelivered: bool) -> Disposition {
        (**self).handle(body, redelivered).await
    }
}

/// Feeds deliveries to `handler` until shutdown or until the broker closes
/// the stream, then closes the consumer.
///
/// Shutdown is checked before every delivery; a delivery already being
/// handled runs to completion and is settled first.
#[tracing::instrument(skip_all, fields(queue = %subscription.queue()))]
pub async fn run_consumer<H>(mut subscription: Subscription, handler: &H, mut shutdown: Shutdown)
where
    H: MessageHandler + ?Sized,
{
    let queue = subscription.queue().to_string();
    tracing::info!("consumer started");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            next = subscription.next() => next,
        };

        match next {
            Some(Ok(delivery)) => settle(&queue, handler, delivery).await,
            Some(Err(e)) => {
                tracing::error!(error = %e, "delivery stream failed");
                break;
            }
            None => {
                tracing::warn!("delivery stream closed by broker");
                break;
            }
        }
    }

    if let Err(e) = subscription.close().await {
        tracing::warn!(error = %e, "failed to close consumer");
    }
    tracing::info!("consumer stopped");
}

/// Runs [`run_consumer`] on its own task.
pub fn spawn_consumer<H>(subscription: Subscription, handler: Arc<H>, shutdown: Shutdown) -> JoinHandle<()>
where
    H: MessageHandler + ?Sized + 'static,
{
    tokio::spawn(async move { run_consumer(subscription, handler.as_ref(), shutdown).await })
}

async fn settle<H>(queue: &str, handler: &H, delivery: Delivery)
where
    H: MessageHandler + ?Sized,
{
    let redelivered = delivery.is_redelivered();
    let disposition = handler.handle(delivery.body(), redelivered).await;

    let result = match disposition {
        Disposition::Ack => delivery.ack().await,
        Disposition::Discard => {
            metrics::counter!("messages_discarded_total", "queue" => queue.to_string())
                .increment(1);
            delivery.nack(false).await
        }
        Disposition::Requeue => {
            metrics::counter!("messages_requeued_total", "queue" => queue.to_string())
                .increment(1);
            delivery.nack(true).await
        }
    };

    if let Err(e) = result {
        tracing::error!(?disposition, error = %e, "failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShutdownTrigger;
    use event_bus::{EventBus, InMemoryEventBus};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records bodies and settles each one as told by its first byte.
    #[derive(Default)]
    struct ScriptedHandler {
        seen: Mutex<Vec<(Vec<u8>, bool)>>,
    }

    #[async_trait]
    impl MessageHandler for ScriptedHandler {
        async fn handle(&self, body: &[u8], redelivered: bool) -> Disposition {
            self.seen.lock().unwrap().push((body.to_vec(), redelivered));
            match body.first() {
                Some(b'd') => Disposition::Discard,
                Some(b'r') if !redelivered => Disposition::Requeue,
                _ => Disposition::Ack,
            }
        }
    }

    async fn bus() -> InMemoryEventBus {
        let bus = InMemoryEventBus::new();
        bus.ensure_exchange("ex").await.unwrap();
        bus.declare_queue("q", "ex", "rk").await.unwrap();
        bus
    }

    async fn wait_until_settled(bus: &InMemoryEventBus) {
        for _ in 0..200 {
            if bus.queue_depth("q").await == 0 && bus.unacked_count("q").await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn test_consumer_settles_by_disposition() {
        let bus = bus().await;
        for body in [&b"ack"[..], b"discard", b"requeue"] {
            bus.publish("ex", "rk", body).await.unwrap();
        }

        let handler = Arc::new(ScriptedHandler::default());
        let (trigger, shutdown) = ShutdownTrigger::new();
        let task = spawn_consumer(bus.consume("q").await.unwrap(), Arc::clone(&handler), shutdown);

        wait_until_settled(&bus).await;
        trigger.trigger();
        task.await.unwrap();

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (b"ack".to_vec(), false),
                (b"discard".to_vec(), false),
                (b"requeue".to_vec(), false),
                (b"requeue".to_vec(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_consumer_stops_on_shutdown_and_leaves_queue() {
        let bus = bus().await;
        let handler = Arc::new(ScriptedHandler::default());
        let (trigger, shutdown) = ShutdownTrigger::new();
        trigger.trigger();

        bus.publish("ex", "rk", b"late").await.unwrap();
        let task = spawn_consumer(bus.consume("q").await.unwrap(), Arc::clone(&handler), shutdown);
        task.await.unwrap();

        assert!(handler.seen.lock().unwrap().is_empty());
        assert_eq!(bus.queue_depth("q").await, 1);
    }
}
