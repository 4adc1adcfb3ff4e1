// Drives the message loop through the public API with an in-memory delivery
// source and publisher; no broker needed.

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use service_link::rabbitmq::{
    LoopSummary, PublishFailurePolicy, RelayError, Result, DEAD_LETTER_EXCHANGE, TOPIC_EXCHANGE,
};
use service_link::{BoxError, Delivery, MessageLoop, Publisher, Publishing, ServiceFunc};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String, Publishing)>>,
    fail_dead_letters: bool,
}

impl Outbox {
    fn sent(&self) -> Vec<(String, String, Publishing)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for Outbox {
    async fn publish(&self, exchange: &str, routing_key: &str, message: Publishing) -> Result<()> {
        if self.fail_dead_letters && exchange == DEAD_LETTER_EXCHANGE {
            return Err(RelayError::ChannelClosed);
        }
        self.sent
            .lock()
            .unwrap()
            .push((exchange.to_string(), routing_key.to_string(), message));
        Ok(())
    }
}

/// Expects `{"query": "..."}` and answers with the upper-cased query.
#[derive(Default)]
struct QueryService {
    calls: AtomicUsize,
}

#[async_trait]
impl ServiceFunc for QueryService {
    async fn call(&self, delivery: &Delivery) -> std::result::Result<Publishing, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let request: Value = serde_json::from_slice(&delivery.body)?;
        let query = request["query"].as_str().ok_or("missing query field")?;
        Ok(Publishing::new(query.to_uppercase()).with_content_type("application/json"))
    }
}

fn deliveries(bodies: &[&str]) -> impl futures::Stream<Item = Delivery> + Unpin {
    let items: Vec<Delivery> = bodies
        .iter()
        .map(|b| Delivery::new(b.as_bytes().to_vec()).with_routing_key("query.in"))
        .collect();
    stream::iter(items)
}

#[tokio::test]
async fn successes_and_failures_keep_delivery_order() {
    let service = QueryService::default();
    let outbox = Outbox::default();
    let message_loop = MessageLoop::new(&service, &outbox, "query.out");

    let summary = message_loop
        .run(deliveries(&[
            r#"{"query": "select 1"}"#,
            "not json",
            r#"{"other": true}"#,
            r#"{"query": "select 2"}"#,
        ]))
        .await
        .unwrap();

    assert_eq!(
        summary,
        LoopSummary {
            processed: 4,
            forwarded: 2,
            dead_lettered: 2,
            publish_failures: 0,
        }
    );
    assert_eq!(service.calls.load(Ordering::SeqCst), 4);

    let sent = outbox.sent();
    let exchanges: Vec<&str> = sent.iter().map(|(e, _, _)| e.as_str()).collect();
    assert_eq!(
        exchanges,
        vec![TOPIC_EXCHANGE, DEAD_LETTER_EXCHANGE, DEAD_LETTER_EXCHANGE, TOPIC_EXCHANGE]
    );
    assert!(sent.iter().all(|(_, rk, _)| rk == "query.out"));
    assert_eq!(sent[0].2.body, b"SELECT 1");
    assert_eq!(sent[3].2.body, b"SELECT 2");

    let report = String::from_utf8(sent[2].2.body.clone()).unwrap();
    assert_eq!(report, "Error executing query: missing query field");
    assert_eq!(sent[2].2.content_type.as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn stop_policy_ends_loop_on_failed_dead_letter() {
    let service = QueryService::default();
    let outbox = Outbox {
        fail_dead_letters: true,
        ..Outbox::default()
    };
    let message_loop = MessageLoop::new(&service, &outbox, "query.out")
        .on_publish_failure(PublishFailurePolicy::Stop);

    let err = message_loop
        .run(deliveries(&[r#"{"query": "a"}"#, "broken", r#"{"query": "b"}"#]))
        .await
        .unwrap_err();

    match err {
        RelayError::Publish { exchange, .. } => assert_eq!(exchange, DEAD_LETTER_EXCHANGE),
        other => panic!("unexpected error: {other}"),
    }
    // The third delivery is never handled.
    assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outbox.sent().len(), 1);
}

#[tokio::test]
async fn closure_services_work_with_the_free_function() {
    let outbox = Outbox::default();
    let handler = service_link::service_fn(|d: &Delivery| {
        if d.body.is_empty() {
            Err("empty body".into())
        } else {
            Ok(Publishing::new(d.body.clone()))
        }
    });

    let summary = service_link::run_message_loop(
        handler,
        deliveries(&["ping", ""]),
        &outbox,
        "ping.out",
        "results",
    )
    .await
    .unwrap();

    assert_eq!(summary.forwarded, 1);
    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(outbox.sent()[0].0, "results");
}
