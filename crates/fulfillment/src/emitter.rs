//! Detached publishing of events after a commit.

use std::sync::Arc;

use event_bus::EventBus;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{FulfillmentError, Result};

/// Handle to a publish running in the background.
///
/// Awaiting it yields the publish outcome. Dropping it detaches the task;
/// the publish still runs and any failure is logged.
pub type PublishHandle = JoinHandle<Result<()>>;

/// Publishes events to one exchange on tasks detached from the caller.
///
/// There is no retry and no outbox: an event whose publish fails is lost
/// after being logged and counted.
pub struct EventEmitter<B: EventBus> {
    bus: Arc<B>,
    exchange: String,
}

impl<B: EventBus> Clone for EventEmitter<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            exchange: self.exchange.clone(),
        }
    }
}

impl<B: EventBus + 'static> EventEmitter<B> {
    /// Creates an emitter publishing to `exchange`.
    pub fn new(bus: Arc<B>, exchange: impl Into<String>) -> Self {
        Self {
            bus,
            exchange: exchange.into(),
        }
    }

    /// Returns the exchange events are published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Serializes `event` now and publishes it under `routing_key` on a new
    /// task.
    pub fn emit<E>(&self, routing_key: &str, event: &E) -> PublishHandle
    where
        E: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(event);
        let bus = Arc::clone(&self.bus);
        let exchange = self.exchange.clone();
        let routing_key = routing_key.to_string();

        tokio::spawn(async move {
            let result = match body {
                Ok(body) => bus
                    .publish(&exchange, &routing_key, &body)
                    .await
                    .map_err(FulfillmentError::from),
                Err(e) => Err(e.into()),
            };
            match &result {
                Ok(()) => {
                    metrics::counter!("events_published_total", "routing_key" => routing_key.clone())
                        .increment(1);
                    tracing::debug!(%exchange, %routing_key, "event published");
                }
                Err(e) => {
                    metrics::counter!("events_publish_failed_total", "routing_key" => routing_key.clone())
                        .increment(1);
                    tracing::error!(%exchange, %routing_key, error = %e, "failed to publish event");
                }
            }
            result
        })
    }
}
