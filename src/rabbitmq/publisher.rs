use async_trait::async_trait;
use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use std::sync::Arc;
use tracing::{debug, error};

use super::errors::{RelayError, Result};

pub const TOPIC_EXCHANGE: &str = "topic_exchange";
pub const DEAD_LETTER_EXCHANGE: &str = "dead-letter-exchange";

/// An outbound message, built fresh for every outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Publishing {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl Publishing {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new(body.into()).with_content_type("text/plain")
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn properties(&self) -> BasicProperties {
        match &self.content_type {
            Some(ct) => BasicProperties::default().with_content_type(ct.as_str().into()),
            None => BasicProperties::default(),
        }
    }
}

/// Anything that can make a single publish attempt.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Publishing) -> Result<()>;
}

#[async_trait]
impl Publisher for Channel {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Publishing) -> Result<()> {
        if !self.status().connected() {
            return Err(RelayError::ChannelClosed);
        }

        let properties = message.properties();
        self.basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            &message.body,
            properties,
        )
        .await?
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<'a, T: Publisher + ?Sized> Publisher for &'a T {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Publishing) -> Result<()> {
        (**self).publish(exchange, routing_key, message).await
    }
}

#[async_trait]
impl<T: Publisher + ?Sized> Publisher for Arc<T> {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Publishing) -> Result<()> {
        (**self).publish(exchange, routing_key, message).await
    }
}

pub(crate) fn effective_exchange(exchange_name: &str) -> &str {
    if exchange_name.is_empty() {
        TOPIC_EXCHANGE
    } else {
        exchange_name
    }
}

/// Publishes once to `exchange_name` (or `topic_exchange` when empty).
/// The broker error is returned as is; nothing is retried or buffered.
pub async fn publish<P>(
    publisher: &P,
    routing_key: &str,
    message: Publishing,
    exchange_name: &str,
) -> Result<()>
where
    P: Publisher + ?Sized,
{
    let exchange = effective_exchange(exchange_name);
    debug!(exchange, routing_key, "Publishing message");

    publisher
        .publish(exchange, routing_key, message)
        .await
        .inspect_err(|e| error!(exchange, routing_key, "Publish failed: {}", e))
}
