use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::Result;

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Confirms the delivery was processed; the broker forgets the message.
    async fn ack(&self) -> Result<()>;

    /// Rejects the delivery. With `requeue` the broker delivers it again,
    /// otherwise it is discarded.
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message handed to a consumer.
///
/// Settling consumes the delivery, so a message is acked or nacked at most
/// once.
pub struct Delivery {
    body: Vec<u8>,
    routing_key: String,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a delivery settled through `acker`.
    pub fn new(
        body: Vec<u8>,
        routing_key: impl Into<String>,
        redelivered: bool,
        acker: impl Acknowledger + 'static,
    ) -> Self {
        Self {
            body,
            routing_key: routing_key.into(),
            redelivered,
            acker: Box::new(acker),
        }
    }

    /// Returns the raw message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Returns true if the broker delivered this message before.
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledges the delivery.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledges the delivery.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// A stream of deliveries.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Broker-side teardown of a consumer.
#[async_trait]
pub trait ConsumerControl: Send + Sync {
    /// Stops the consumer and releases its channel. Unsettled deliveries go
    /// back to the queue.
    async fn close(&self) -> Result<()>;
}

/// An active consumer on one queue.
pub struct Subscription {
    queue: String,
    deliveries: DeliveryStream,
    control: Option<Box<dyn ConsumerControl>>,
}

impl Subscription {
    /// Creates a subscription over a delivery stream.
    pub fn new(queue: impl Into<String>, deliveries: DeliveryStream) -> Self {
        Self {
            queue: queue.into(),
            deliveries,
            control: None,
        }
    }

    /// Attaches the handle used to close the consumer on the broker.
    pub fn with_control(mut self, control: impl ConsumerControl + 'static) -> Self {
        self.control = Some(Box::new(control));
        self
    }

    /// Returns the queue this subscription reads from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery. Returns None once the broker closed the
    /// stream.
    ///
    /// Cancel-safe: dropping the future never loses a delivery.
    pub async fn next(&mut self) -> Option<Result<Delivery>> {
        self.deliveries.next().await
    }

    /// Closes the consumer.
    pub async fn close(self) -> Result<()> {
        drop(self.deliveries);
        match self.control {
            Some(control) => control.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Core trait for broker gateways.
///
/// Declarations are idempotent. No method retries on its own: every broker
/// error is returned to the caller.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Declares a durable direct exchange if it does not exist yet.
    async fn ensure_exchange(&self, name: &str) -> Result<()>;

    /// Declares a durable quorum queue and binds it to `exchange` under
    /// `routing_key`.
    ///
    /// Returns the queue name.
    async fn declare_queue(&self, name: &str, exchange: &str, routing_key: &str)
    -> Result<String>;

    /// Publishes a message without waiting for a publisher confirm.
    ///
    /// Publishes are serialized: at most one is on the wire at a time.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()>;

    /// Starts consuming a queue with manual acknowledgement.
    async fn consume(&self, queue: &str) -> Result<Subscription>;
}

#[async_trait]
impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    async fn ensure_exchange(&self, name: &str) -> Result<()> {
        (**self).ensure_exchange(name).await
    }

    async fn declare_queue(
        &self,
        name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<String> {
        (**self).declare_queue(name, exchange, routing_key).await
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        (**self).publish(exchange, routing_key, body).await
    }

    async fn consume(&self, queue: &str) -> Result<Subscription> {
        (**self).consume(queue).await
    }
}
