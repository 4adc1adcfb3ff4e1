// src/rabbitmq/mod.rs
// Broker side: binding, delivery source, publisher and the message loop

pub mod binding;
pub mod connection;
pub mod delivery;
pub mod errors;
pub mod message_loop;
pub mod publisher;

// Re-export specific items to simplify imports elsewhere
pub use binding::{bind, BindOptions, Binding, Topology};
pub use connection::{connect, retry_with_policy, Backoff, RetryExhausted, RetryPolicy};
pub use delivery::{AckMode, Delivery, DeliveryStream};
pub use errors::{BoxError, RelayError, Result};
pub use message_loop::{
    run_message_loop, service_fn, FnService, LoopSummary, MessageLoop, PublishFailurePolicy,
    ServiceFunc,
};
pub use publisher::{publish, Publisher, Publishing, DEAD_LETTER_EXCHANGE, TOPIC_EXCHANGE};
