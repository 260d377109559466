use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::{
    EventBusError, Result,
    bus::{Acknowledger, Delivery, EventBus, Subscription},
};

#[derive(Debug, Clone)]
struct Message {
    body: Vec<u8>,
    routing_key: String,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: std::sync::Mutex<VecDeque<Message>>,
    unacked: AtomicUsize,
    notify: Notify,
}

impl QueueState {
    fn push_back(&self, message: Message) {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: Message) {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_front(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn depth(&self) -> usize {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Default)]
struct Broker {
    exchanges: HashSet<String>,
    bindings: HashMap<(String, String), Vec<String>>,
    queues: HashMap<String, Arc<QueueState>>,
}

/// In-memory event bus for testing.
///
/// Behaves like a single RabbitMQ node for the parts the pipeline uses:
/// direct-exchange routing, FIFO queues shared by competing consumers,
/// manual ack, and nack with or without requeue. A delivery that is dropped
/// without being settled goes back to the head of its queue flagged as
/// redelivered, the same way the broker requeues unacked messages when a
/// consumer's channel closes.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    broker: Arc<RwLock<Broker>>,
    publish_lock: Arc<Mutex<()>>,
    fail_on_publish: Arc<AtomicBool>,
    published: Arc<AtomicUsize>,
}

impl InMemoryEventBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail until switched off again.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of messages accepted by `publish`.
    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// Returns the number of messages waiting in a queue.
    pub async fn queue_depth(&self, queue: &str) -> usize {
        self.queue(queue).await.map_or(0, |q| q.depth())
    }

    /// Returns the number of messages handed to consumers and not yet settled.
    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.queue(queue)
            .await
            .map_or(0, |q| q.unacked.load(Ordering::SeqCst))
    }

    /// Removes and returns the bodies waiting in a queue.
    pub async fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        let Some(state) = self.queue(queue).await else {
            return Vec::new();
        };
        std::iter::from_fn(|| state.pop())
            .map(|message| message.body)
            .collect()
    }

    async fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.broker.read().await.queues.get(name).cloned()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn ensure_exchange(&self, name: &str) -> Result<()> {
        self.broker.write().await.exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<String> {
        let mut broker = self.broker.write().await;
        if !broker.exchanges.contains(exchange) {
            return Err(EventBusError::ExchangeNotFound(exchange.to_string()));
        }

        broker.queues.entry(name.to_string()).or_default();
        let bound = broker
            .bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default();
        if !bound.iter().any(|q| q == name) {
            bound.push(name.to_string());
        }
        Ok(name.to_string())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let _writer = self.publish_lock.lock().await;

        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(EventBusError::Publish("broker rejected publish".to_string()));
        }

        let broker = self.broker.read().await;
        if !broker.exchanges.contains(exchange) {
            return Err(EventBusError::ExchangeNotFound(exchange.to_string()));
        }

        // Unroutable messages are dropped, as with a non-mandatory publish.
        let key = (exchange.to_string(), routing_key.to_string());
        for queue in broker.bindings.get(&key).into_iter().flatten() {
            if let Some(state) = broker.queues.get(queue) {
                state.push_back(Message {
                    body: body.to_vec(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                });
            }
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Subscription> {
        let state = self
            .queue(queue)
            .await
            .ok_or_else(|| EventBusError::QueueNotFound(queue.to_string()))?;

        let deliveries = stream::unfold(state, |state| async move {
            loop {
                if let Some(message) = state.pop() {
                    state.unacked.fetch_add(1, Ordering::SeqCst);
                    let delivery = Delivery::new(
                        message.body.clone(),
                        message.routing_key.clone(),
                        message.redelivered,
                        MemoryAcker {
                            queue: Arc::clone(&state),
                            message,
                            settled: AtomicBool::new(false),
                        },
                    );
                    return Some((Ok(delivery), state));
                }
                state.notify.notified().await;
            }
        });

        Ok(Subscription::new(queue, Box::pin(deliveries)))
    }
}

struct MemoryAcker {
    queue: Arc<QueueState>,
    message: Message,
    settled: AtomicBool,
}

impl MemoryAcker {
    /// Settles the delivery once; later calls do nothing.
    fn finish(&self, requeue: bool) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        if requeue {
            let mut message = self.message.clone();
            message.redelivered = true;
            self.queue.push_front(message);
        }
        self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.finish(false);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.finish(requeue);
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        self.finish(true);
    }
}
