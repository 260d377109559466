//! Event bus gateway.
//!
//! Idempotent topology setup (durable direct exchange, durable quorum
//! queues) and delivery primitives (publish, consume, ack/nack) behind the
//! [`EventBus`] trait, with a RabbitMQ implementation and an in-memory one
//! for tests.

pub mod amqp;
pub mod bus;
pub mod error;
pub mod memory;
pub mod topology;

pub use amqp::AmqpEventBus;
pub use bus::{Acknowledger, ConsumerControl, Delivery, DeliveryStream, EventBus, Subscription};
pub use error::{EventBusError, Result};
pub use memory::InMemoryEventBus;
pub use topology::{Topology, declare_topology};
