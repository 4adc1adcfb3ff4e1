//! The consumption loop: one delivery at a time, handler outcome forwarded
//! downstream, failures redirected to the dead-letter exchange.

use async_trait::async_trait;
use futures::Stream;
use futures_lite::StreamExt;
use tracing::{debug, error, info, warn};

use super::delivery::Delivery;
use super::errors::{BoxError, RelayError, Result};
use super::publisher::{effective_exchange, Publisher, Publishing, DEAD_LETTER_EXCHANGE};

/// Turns one delivery into the message to forward, or an error to dead-letter.
#[async_trait]
pub trait ServiceFunc: Send + Sync {
    async fn call(&self, delivery: &Delivery) -> std::result::Result<Publishing, BoxError>;
}

/// Adapter for plain synchronous closures, see [`service_fn`].
pub struct FnService<F>(F);

pub fn service_fn<F>(f: F) -> FnService<F>
where
    F: Fn(&Delivery) -> std::result::Result<Publishing, BoxError> + Send + Sync,
{
    FnService(f)
}

#[async_trait]
impl<F> ServiceFunc for FnService<F>
where
    F: Fn(&Delivery) -> std::result::Result<Publishing, BoxError> + Send + Sync,
{
    async fn call(&self, delivery: &Delivery) -> std::result::Result<Publishing, BoxError> {
        (self.0)(delivery)
    }
}

#[async_trait]
impl<'a, T: ServiceFunc + ?Sized> ServiceFunc for &'a T {
    async fn call(&self, delivery: &Delivery) -> std::result::Result<Publishing, BoxError> {
        (**self).call(delivery).await
    }
}

#[async_trait]
impl<T: ServiceFunc + ?Sized> ServiceFunc for std::sync::Arc<T> {
    async fn call(&self, delivery: &Delivery) -> std::result::Result<Publishing, BoxError> {
        (**self).call(delivery).await
    }
}

/// What the loop does when publishing an outcome fails. Applies the same way
/// to forwarded results and to dead-letter reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// Log, drop the outcome and move on to the next delivery.
    #[default]
    LogAndContinue,
    /// Stop the loop and return the publish error to the caller.
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub processed: u64,
    pub forwarded: u64,
    pub dead_lettered: u64,
    pub publish_failures: u64,
}

pub struct MessageLoop<H, P> {
    handler: H,
    publisher: P,
    routing_key: String,
    exchange: String,
    on_publish_failure: PublishFailurePolicy,
}

impl<H, P> MessageLoop<H, P>
where
    H: ServiceFunc,
    P: Publisher,
{
    pub fn new(handler: H, publisher: P, routing_key: impl Into<String>) -> Self {
        Self {
            handler,
            publisher,
            routing_key: routing_key.into(),
            exchange: effective_exchange("").to_string(),
            on_publish_failure: PublishFailurePolicy::default(),
        }
    }

    /// Exchange for successful results. Empty means `topic_exchange`.
    pub fn exchange(mut self, exchange_name: &str) -> Self {
        self.exchange = effective_exchange(exchange_name).to_string();
        self
    }

    pub fn on_publish_failure(mut self, policy: PublishFailurePolicy) -> Self {
        self.on_publish_failure = policy;
        self
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Drains `source` until it ends. Deliveries are handled strictly in
    /// order, one handler call and one publish attempt each.
    pub async fn run<S>(&self, mut source: S) -> Result<LoopSummary>
    where
        S: Stream<Item = Delivery> + Unpin,
    {
        let mut summary = LoopSummary::default();
        info!(
            routing_key = %self.routing_key,
            exchange = %self.exchange,
            "Starting message loop"
        );

        while let Some(delivery) = source.next().await {
            summary.processed += 1;
            debug!(
                delivery_tag = delivery.delivery_tag,
                body = %delivery.body_str(),
                "Received message"
            );

            let (exchange, message, dead_letter) = match self.handler.call(&delivery).await {
                Ok(message) => (self.exchange.as_str(), message, false),
                Err(e) => {
                    warn!(routing_key = %self.routing_key, "Handler failed: {}", e);
                    let report = Publishing::text(format!("Error executing query: {}", e));
                    (DEAD_LETTER_EXCHANGE, report, true)
                }
            };

            match self
                .publisher
                .publish(exchange, &self.routing_key, message)
                .await
            {
                Ok(()) => {
                    if dead_letter {
                        summary.dead_lettered += 1;
                    } else {
                        summary.forwarded += 1;
                    }
                    if let Err(e) = delivery.ack().await {
                        error!("Failed to acknowledge message: {}", e);
                    }
                }
                Err(e) => {
                    summary.publish_failures += 1;
                    error!(
                        exchange,
                        routing_key = %self.routing_key,
                        "Error publishing message: {}", e
                    );
                    if let Err(e) = delivery.reject().await {
                        error!("Failed to reject message: {}", e);
                    }

                    if self.on_publish_failure == PublishFailurePolicy::Stop {
                        return Err(RelayError::Publish {
                            exchange: exchange.to_string(),
                            routing_key: self.routing_key.clone(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        info!(?summary, "Delivery source closed, message loop finished");
        Ok(summary)
    }
}

/// Runs a message loop with the default publish-failure policy.
pub async fn run_message_loop<H, S, P>(
    handler: H,
    source: S,
    publisher: P,
    routing_key: &str,
    exchange_name: &str,
) -> Result<LoopSummary>
where
    H: ServiceFunc,
    S: Stream<Item = Delivery> + Unpin,
    P: Publisher,
{
    MessageLoop::new(handler, publisher, routing_key)
        .exchange(exchange_name)
        .run(source)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rabbitmq::publisher::testing::RecordingPublisher;
    use crate::rabbitmq::publisher::TOPIC_EXCHANGE;
    use futures::stream;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn deliveries(bodies: &[&str]) -> impl Stream<Item = Delivery> + Unpin {
        let items: Vec<Delivery> = bodies.iter().map(|b| Delivery::new(*b)).collect();
        stream::iter(items)
    }

    /// Echoes the body back upper-cased, fails on bodies starting with "fail".
    fn echo_handler() -> impl ServiceFunc {
        service_fn(|delivery: &Delivery| {
            let body = delivery.body_str();
            if let Some(reason) = body.strip_prefix("fail:") {
                return Err(reason.to_string().into());
            }
            Ok(Publishing::new(body.to_uppercase()))
        })
    }

    #[tokio::test]
    async fn handler_called_once_per_delivery_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let handler = service_fn(move |delivery: &Delivery| {
            recorder.lock().unwrap().push(delivery.body_str().into_owned());
            Ok(Publishing::new(delivery.body.clone()))
        });
        let publisher = RecordingPublisher::default();

        let summary = run_message_loop(handler, deliveries(&["a", "b", "c", "d"]), &publisher, "rk", "")
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.forwarded, 4);
        let bodies: Vec<Vec<u8>> = publisher.sent().into_iter().map(|(_, _, m)| m.body).collect();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[tokio::test]
    async fn success_is_forwarded_to_topic_exchange() {
        let handler = service_fn(|_: &Delivery| Ok(Publishing::new("ok")));
        let publisher = RecordingPublisher::default();

        run_message_loop(handler, deliveries(&["ping", "ping"]), &publisher, "rk", "")
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 2);
        for (exchange, routing_key, message) in sent {
            assert_eq!(exchange, TOPIC_EXCHANGE);
            assert_eq!(routing_key, "rk");
            assert_eq!(message, Publishing::new("ok"));
        }
    }

    #[tokio::test]
    async fn failure_is_reported_to_dead_letter_exchange() {
        let handler = service_fn(|_: &Delivery| Err("boom".into()));
        let publisher = RecordingPublisher::default();

        let summary = run_message_loop(handler, deliveries(&["ping"]), &publisher, "rk", "results")
            .await
            .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, DEAD_LETTER_EXCHANGE);
        assert_eq!(sent[0].1, "rk");
        assert_eq!(sent[0].2.body, b"Error executing query: boom");
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(summary.forwarded, 0);
    }

    #[tokio::test]
    async fn custom_exchange_is_used_for_successes() {
        let publisher = RecordingPublisher::default();

        run_message_loop(echo_handler(), deliveries(&["x"]), &publisher, "rk", "results")
            .await
            .unwrap();

        assert_eq!(publisher.sent()[0].0, "results");
    }

    #[tokio::test]
    async fn mixed_outcomes_keep_delivery_order() {
        let publisher = RecordingPublisher::default();

        let summary = run_message_loop(
            echo_handler(),
            deliveries(&["one", "fail:bad input", "two"]),
            &publisher,
            "rk",
            "",
        )
        .await
        .unwrap();

        let sent = publisher.sent();
        assert_eq!(sent[0], (TOPIC_EXCHANGE.to_string(), "rk".to_string(), Publishing::new("ONE")));
        assert_eq!(sent[1].0, DEAD_LETTER_EXCHANGE);
        assert_eq!(sent[1].2.body, b"Error executing query: bad input");
        assert_eq!(sent[2], (TOPIC_EXCHANGE.to_string(), "rk".to_string(), Publishing::new("TWO")));
        assert_eq!(
            summary,
            LoopSummary {
                processed: 3,
                forwarded: 2,
                dead_lettered: 1,
                publish_failures: 0,
            }
        );
    }

    #[tokio::test]
    async fn publish_failure_is_logged_and_loop_continues() {
        let publisher = RecordingPublisher::script([true, false, false]);

        let summary = run_message_loop(echo_handler(), deliveries(&["a", "b", "c"]), &publisher, "rk", "")
            .await
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.publish_failures, 1);
        assert_eq!(publisher.sent().len(), 2);
    }

    #[tokio::test]
    async fn dead_letter_failure_is_not_special_cased_by_default() {
        let publisher = RecordingPublisher::failing_on(DEAD_LETTER_EXCHANGE);

        let summary = run_message_loop(
            echo_handler(),
            deliveries(&["fail:boom", "ok"]),
            &publisher,
            "rk",
            "",
        )
        .await
        .unwrap();

        assert_eq!(summary.publish_failures, 1);
        assert_eq!(summary.forwarded, 1);
    }

    #[tokio::test]
    async fn stop_policy_returns_dead_letter_publish_error() {
        let publisher = RecordingPublisher::failing_on(DEAD_LETTER_EXCHANGE);
        let message_loop = MessageLoop::new(echo_handler(), &publisher, "rk")
            .on_publish_failure(PublishFailurePolicy::Stop);

        let err = message_loop
            .run(deliveries(&["ok", "fail:boom", "never"]))
            .await
            .unwrap_err();

        match err {
            RelayError::Publish {
                exchange,
                routing_key,
                ..
            } => {
                assert_eq!(exchange, DEAD_LETTER_EXCHANGE);
                assert_eq!(routing_key, "rk");
            }
            other => panic!("unexpected error: {other}"),
        }
        // "never" was not consumed
        assert_eq!(publisher.sent().len(), 1);
    }

    #[tokio::test]
    async fn stop_policy_applies_to_successful_results_too() {
        let publisher = RecordingPublisher::script([true]);
        let message_loop = MessageLoop::new(echo_handler(), &publisher, "rk")
            .on_publish_failure(PublishFailurePolicy::Stop);

        let err = message_loop.run(deliveries(&["a", "b"])).await.unwrap_err();

        assert!(matches!(err, RelayError::Publish { ref exchange, .. } if exchange == TOPIC_EXCHANGE));
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn replaying_the_same_deliveries_gives_the_same_publishes() {
        let bodies = ["x", "fail:nope", "y", "fail:again"];

        let first = RecordingPublisher::default();
        run_message_loop(echo_handler(), deliveries(&bodies), &first, "rk", "")
            .await
            .unwrap();
        let second = RecordingPublisher::default();
        run_message_loop(echo_handler(), deliveries(&bodies), &second, "rk", "")
            .await
            .unwrap();

        assert_eq!(first.sent(), second.sent());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_blocks_without_exiting() {
        let publisher = RecordingPublisher::default();
        let source = stream::pending::<Delivery>();

        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            run_message_loop(echo_handler(), source, &publisher, "rk", ""),
        )
        .await;

        assert!(outcome.is_err(), "loop returned on a source that never ends");
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn ended_source_ends_the_loop() {
        let publisher = RecordingPublisher::default();

        let summary = run_message_loop(echo_handler(), deliveries(&[]), &publisher, "rk", "")
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary::default());
    }
}
