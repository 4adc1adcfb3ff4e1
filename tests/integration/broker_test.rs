// Needs a RabbitMQ broker on localhost:5672 with user guest/guest.
// Run with: cargo test --test broker_test -- --ignored

use futures::StreamExt;
use std::io::Write;
use std::time::Duration;

use service_link::rabbitmq::{Publisher, RetryPolicy, TOPIC_EXCHANGE};
use service_link::{bind, AckMode, BindOptions, BrokerConfig, Publishing};

fn local_config() -> (BrokerConfig, tempfile::NamedTempFile) {
    let mut password = tempfile::NamedTempFile::new().unwrap();
    writeln!(password, "guest").unwrap();
    let path = password.path().display().to_string();

    let config = BrokerConfig::from_lookup(|name| match name {
        "AMQ_USER" => Some("guest".to_string()),
        "AMQ_PASSWORD_FILE" => Some(path.clone()),
        "AMQ_HOST" => Some("localhost".to_string()),
        _ => None,
    })
    .unwrap();
    (config, password)
}

#[tokio::test]
#[ignore] // Requires a running RabbitMQ instance
async fn bound_queue_receives_published_message() {
    let (config, _password) = local_config();
    let options = BindOptions {
        ack_mode: AckMode::Manual,
        retry: RetryPolicy::immediate(1),
        ..BindOptions::default()
    };

    let (binding, stream) = bind("service_link_it", "service_link.it", true, &config, &options)
        .await
        .unwrap();
    let mut stream = stream.unwrap();
    assert!(binding.is_connected());

    binding
        .publish(TOPIC_EXCHANGE, "service_link.it", Publishing::text("hello"))
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.body_str(), "hello");
    assert!(delivery.requires_ack());
    delivery.ack().await.unwrap();

    binding.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires nothing listening on the port
async fn unreachable_broker_is_fatal() {
    let (mut config, _password) = local_config();
    config.port = 1;

    let err = bind("service_link_it", "rk", false, &config, &BindOptions {
        retry: RetryPolicy::immediate(2),
        ..BindOptions::default()
    })
    .await
    .unwrap_err();
    assert!(err.is_fatal());
}
