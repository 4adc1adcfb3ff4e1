use futures::Stream;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicRejectOptions},
    Consumer,
};
use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, error, info};

use super::errors::Result;

/// Who acknowledges a delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers a delivery acknowledged as soon as it is sent.
    /// A crash mid-handler loses the message (at-most-once).
    #[default]
    Auto,
    /// The message loop acks once the outcome of a delivery has been published.
    Manual,
}

/// One inbound message from the bound queue.
pub struct Delivery {
    pub body: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub content_type: Option<String>,
    acker: Option<Acker>,
}

impl Delivery {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            exchange: String::new(),
            routing_key: String::new(),
            delivery_tag: 0,
            content_type: None,
            acker: None,
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub(crate) fn from_lapin(delivery: lapin::message::Delivery, ack_mode: AckMode) -> Self {
        let content_type = delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_string());

        Self {
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            delivery_tag: delivery.delivery_tag,
            content_type,
            acker: match ack_mode {
                AckMode::Auto => None,
                AckMode::Manual => Some(delivery.acker),
            },
            body: delivery.data,
        }
    }

    /// Whether this delivery still needs an explicit ack or reject.
    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    pub async fn ack(&self) -> Result<()> {
        if let Some(acker) = &self.acker {
            acker.ack(BasicAckOptions::default()).await.map(|_| ())?;
        }
        Ok(())
    }

    /// Rejects without requeue, so the broker routes it to the queue's dead-letter exchange.
    pub async fn reject(&self) -> Result<()> {
        if let Some(acker) = &self.acker {
            acker
                .reject(BasicRejectOptions { requeue: false })
                .await
                .map(|_| ())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("content_type", &self.content_type)
            .field("body", &self.body_str())
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

/// Ordered deliveries from one consumer. Ends for good once the channel or
/// connection goes away; a new binding is needed to consume again.
#[derive(Debug)]
pub struct DeliveryStream {
    consumer: Consumer,
    queue: String,
    ack_mode: AckMode,
    finished: bool,
}

impl DeliveryStream {
    pub(crate) fn new(consumer: Consumer, queue: String, ack_mode: AckMode) -> Self {
        debug!(queue = %queue, tag = %consumer.tag().as_str(), "Delivery stream opened");
        Self {
            consumer,
            queue,
            ack_mode,
            finished: false,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }
}

impl Stream for DeliveryStream {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.consumer).poll_next(cx) {
            Poll::Ready(Some(Ok(delivery))) => {
                let ack_mode = self.ack_mode;
                Poll::Ready(Some(Delivery::from_lapin(delivery, ack_mode)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!(queue = %self.queue, "Error receiving message, closing stream: {}", e);
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                info!(queue = %self.queue, "Consumer closed");
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_ack_delivery_needs_no_ack() {
        let delivery = Delivery::new("ping").with_routing_key("rk");

        assert!(!delivery.requires_ack());
        delivery.ack().await.unwrap();
        delivery.reject().await.unwrap();
        assert_eq!(delivery.body_str(), "ping");
        assert_eq!(delivery.routing_key, "rk");
    }

    #[test]
    fn debug_shows_body_text() {
        let delivery = Delivery::new("ping");
        assert!(format!("{:?}", delivery).contains("\"ping\""));
    }
}
