//! Exchange, routing key and queue names used by the pipeline.

use crate::{EventBus, Result};

/// Broker topology: one direct exchange and one queue per event kind.
///
/// Reads from environment variables:
/// - `RABBITMQ_EXCHANGE` (default: `"orders_direct"`)
/// - `RABBITMQ_ROUTING_KEY` / `RABBITMQ_QUEUE` (default: `"order.placed"` / `"order_placed_queue"`)
/// - `RABBITMQ_CONFIRM_ROUTING_KEY` / `RABBITMQ_CONFIRM_QUEUE` (default: `"order.confirmed"` / `"order_confirmed_queue"`)
/// - `RABBITMQ_FAILED_ROUTING_KEY` / `RABBITMQ_FAILED_QUEUE` (default: `"order.failed"` / `"order_failed_queue"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub placed_routing_key: String,
    pub placed_queue: String,
    pub confirmed_routing_key: String,
    pub confirmed_queue: String,
    pub failed_routing_key: String,
    pub failed_queue: String,
}

impl Topology {
    /// Loads the topology from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the topology from an arbitrary key lookup. Blank values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str, default: String| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
        };

        Self {
            exchange: get("RABBITMQ_EXCHANGE", defaults.exchange),
            placed_routing_key: get("RABBITMQ_ROUTING_KEY", defaults.placed_routing_key),
            placed_queue: get("RABBITMQ_QUEUE", defaults.placed_queue),
            confirmed_routing_key: get(
                "RABBITMQ_CONFIRM_ROUTING_KEY",
                defaults.confirmed_routing_key,
            ),
            confirmed_queue: get("RABBITMQ_CONFIRM_QUEUE", defaults.confirmed_queue),
            failed_routing_key: get("RABBITMQ_FAILED_ROUTING_KEY", defaults.failed_routing_key),
            failed_queue: get("RABBITMQ_FAILED_QUEUE", defaults.failed_queue),
        }
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: "orders_direct".to_string(),
            placed_routing_key: "order.placed".to_string(),
            placed_queue: "order_placed_queue".to_string(),
            confirmed_routing_key: "order.confirmed".to_string(),
            confirmed_queue: "order_confirmed_queue".to_string(),
            failed_routing_key: "order.failed".to_string(),
            failed_queue: "order_failed_queue".to_string(),
        }
    }
}

/// Declares the exchange and all three bound queues.
#[tracing::instrument(skip_all, fields(exchange = %topology.exchange))]
pub async fn declare_topology<B: EventBus + ?Sized>(bus: &B, topology: &Topology) -> Result<()> {
    bus.ensure_exchange(&topology.exchange).await?;
    for (queue, routing_key) in [
        (&topology.placed_queue, &topology.placed_routing_key),
        (&topology.confirmed_queue, &topology.confirmed_routing_key),
        (&topology.failed_queue, &topology.failed_routing_key),
    ] {
        bus.declare_queue(queue, &topology.exchange, routing_key)
            .await?;
    }
    tracing::info!("topology declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryEventBus;
    use std::collections::HashMap;

    #[test]
    fn test_default_values() {
        let topology = Topology::default();
        assert_eq!(topology.exchange, "orders_direct");
        assert_eq!(topology.placed_routing_key, "order.placed");
        assert_eq!(topology.placed_queue, "order_placed_queue");
        assert_eq!(topology.confirmed_routing_key, "order.confirmed");
        assert_eq!(topology.confirmed_queue, "order_confirmed_queue");
        assert_eq!(topology.failed_routing_key, "order.failed");
        assert_eq!(topology.failed_queue, "order_failed_queue");
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let env: HashMap<&str, &str> = [
            ("RABBITMQ_EXCHANGE", "shop"),
            ("RABBITMQ_FAILED_QUEUE", "failed_q"),
            ("RABBITMQ_QUEUE", ""),
        ]
        .into_iter()
        .collect();

        let topology = Topology::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(topology.exchange, "shop");
        assert_eq!(topology.failed_queue, "failed_q");
        assert_eq!(topology.placed_queue, "order_placed_queue");
    }

    #[tokio::test]
    async fn test_declare_topology_binds_every_queue() {
        let bus = InMemoryEventBus::new();
        let topology = Topology::default();

        declare_topology(&bus, &topology).await.unwrap();
        // Declaring twice is harmless.
        declare_topology(&bus, &topology).await.unwrap();

        for (routing_key, queue) in [
            ("order.placed", "order_placed_queue"),
            ("order.confirmed", "order_confirmed_queue"),
            ("order.failed", "order_failed_queue"),
        ] {
            bus.publish("orders_direct", routing_key, b"{}")
                .await
                .unwrap();
            assert_eq!(bus.queue_depth(queue).await, 1);
        }
    }
}
