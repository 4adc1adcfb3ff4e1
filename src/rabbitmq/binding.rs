use async_trait::async_trait;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    Channel, Connection, ExchangeKind,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::connection::{connect, RetryPolicy};
use super::delivery::{AckMode, DeliveryStream};
use super::errors::{RelayError, Result};
use super::publisher::{Publisher, Publishing, DEAD_LETTER_EXCHANGE, TOPIC_EXCHANGE};
use crate::env::BrokerConfig;

/// Names fixed at startup for one (service, routing key) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_exchange: String,
}

impl Topology {
    pub fn for_service(service_name: &str, routing_key: &str) -> Self {
        Self {
            exchange: TOPIC_EXCHANGE.to_string(),
            queue: service_name.to_string(),
            routing_key: routing_key.to_string(),
            dead_letter_exchange: DEAD_LETTER_EXCHANGE.to_string(),
        }
    }

    fn queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.dead_letter_exchange.as_str().into()),
        );
        args
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    pub ack_mode: AckMode,
    pub retry: RetryPolicy,
    /// Consumer tags are `<prefix>-<uuid>`; the service name when unset.
    pub consumer_tag_prefix: Option<String>,
}

impl BindOptions {
    fn consumer_tag(&self, service_name: &str) -> String {
        let prefix = self.consumer_tag_prefix.as_deref().unwrap_or(service_name);
        format!("{}-{}", prefix, Uuid::new_v4())
    }
}

/// An established connection plus channel with the service's topology declared.
/// Owned by whoever called [`bind`]; closing it ends any delivery stream it produced.
#[derive(Debug)]
pub struct Binding {
    connection: Connection,
    channel: Channel,
    topology: Topology,
}

impl Binding {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    pub async fn close(self) -> Result<()> {
        info!(queue = %self.topology.queue, "Closing RabbitMQ binding");
        if self.channel.status().connected() {
            self.channel.close(200, "Closing binding").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(200, "Closing binding").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for Binding {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Publishing) -> Result<()> {
        self.channel.publish(exchange, routing_key, message).await
    }
}

async fn declare_topology(channel: &Channel, topology: &Topology) -> Result<()> {
    channel
        .exchange_declare(
            &topology.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                auto_delete: false,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| RelayError::ExchangeDeclare {
            exchange: topology.exchange.clone(),
            source,
        })?;

    let queue = channel
        .queue_declare(
            &topology.queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            topology.queue_arguments(),
        )
        .await
        .map_err(|source| RelayError::QueueDeclare {
            queue: topology.queue.clone(),
            source,
        })?;

    info!(
        queue = %topology.queue,
        messages = queue.message_count(),
        "Queue declared"
    );

    channel
        .queue_bind(
            &topology.queue,
            &topology.exchange,
            &topology.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|source| RelayError::QueueBind {
            queue: topology.queue.clone(),
            exchange: topology.exchange.clone(),
            routing_key: topology.routing_key.clone(),
            source,
        })?;

    Ok(())
}

/// Connects, declares `topic_exchange` and a durable queue named after the
/// service (dead-lettering to `dead-letter-exchange`), binds it under the
/// routing key and, when `start_consuming`, starts a consumer on the
/// configured input queue.
///
/// Every error from here is fatal for the service.
pub async fn bind(
    service_name: &str,
    routing_key: &str,
    start_consuming: bool,
    config: &BrokerConfig,
    options: &BindOptions,
) -> Result<(Binding, Option<DeliveryStream>)> {
    let topology = Topology::for_service(service_name, config.routing_key(routing_key));
    let (connection, channel) = connect(config, &options.retry).await?;

    declare_topology(&channel, &topology).await?;
    info!(
        queue = %topology.queue,
        exchange = %topology.exchange,
        routing_key = %topology.routing_key,
        "Queue bound"
    );

    let binding = Binding {
        connection,
        channel,
        topology,
    };

    if !start_consuming {
        return Ok((binding, None));
    }

    let queue = config
        .input_queue
        .clone()
        .unwrap_or_else(|| binding.topology.queue.clone());
    if queue != binding.topology.queue {
        warn!(
            input_queue = %queue,
            service_queue = %binding.topology.queue,
            "Consuming from a queue other than the service queue"
        );
    }

    let consumer = binding
        .channel
        .basic_consume(
            &queue,
            &options.consumer_tag(service_name),
            BasicConsumeOptions {
                no_ack: options.ack_mode == AckMode::Auto,
                exclusive: false,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|source| RelayError::Consume {
            queue: queue.clone(),
            source,
        })?;

    info!(queue = %queue, ack_mode = ?options.ack_mode, "Registered consumer");
    let stream = DeliveryStream::new(consumer, queue, options.ack_mode);
    Ok((binding, Some(stream)))
}
