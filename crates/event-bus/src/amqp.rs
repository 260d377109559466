use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::sync::Mutex;

use crate::{
    EventBusError, Result,
    bus::{Acknowledger, ConsumerControl, Delivery, EventBus, Subscription},
};

const CONTENT_TYPE: &str = "application/json";
const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ implementation of the event bus.
///
/// Holds one connection, one channel shared by all publishers and opens a
/// dedicated channel for every consumer.
pub struct AmqpEventBus {
    connection: Connection,
    publish_channel: Mutex<Channel>,
}

impl AmqpEventBus {
    /// Connects to the broker and opens the publish channel.
    ///
    /// Fails if the broker is unreachable; callers treat that as fatal at
    /// startup.
    #[tracing::instrument(skip(uri))]
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(EventBusError::Connection)?;
        let publish_channel = connection
            .create_channel()
            .await
            .map_err(EventBusError::Connection)?;

        tracing::info!("connected to broker");
        Ok(Self {
            connection,
            publish_channel: Mutex::new(publish_channel),
        })
    }

    /// Returns true while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Closes the connection and every channel on it.
    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "shutting down")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for AmqpEventBus {
    #[tracing::instrument(skip(self))]
    async fn ensure_exchange(&self, name: &str) -> Result<()> {
        let channel = self.publish_channel.lock().await;
        channel
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn declare_queue(
        &self,
        name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<String> {
        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-queue-type".into(),
            AMQPValue::LongString("quorum".into()),
        );

        let channel = self.publish_channel.lock().await;
        let queue = channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await?;
        channel
            .queue_bind(
                queue.name().as_str(),
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(queue.name().to_string())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        let channel = self.publish_channel.lock().await;
        // The returned confirm is dropped: publishes are fire-and-forget.
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_content_type(CONTENT_TYPE.into())
                    .with_delivery_mode(PERSISTENT),
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn consume(&self, queue: &str) -> Result<Subscription> {
        let channel = self.connection.create_channel().await?;
        let consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let deliveries = consumer.map(|delivery| -> Result<Delivery> {
            let delivery = delivery?;
            Ok(Delivery::new(
                delivery.data,
                delivery.routing_key.as_str(),
                delivery.redelivered,
                AmqpAcker(delivery.acker),
            ))
        });

        Ok(Subscription::new(queue, Box::pin(deliveries)).with_control(ChannelControl(channel)))
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await?;
        Ok(())
    }
}

struct ChannelControl(Channel);

#[async_trait]
impl ConsumerControl for ChannelControl {
    async fn close(&self) -> Result<()> {
        self.0.close(REPLY_SUCCESS, "consumer closed").await?;
        Ok(())
    }
}
