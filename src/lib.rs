//! Helpers shared by the microservices of a broker-driven pipeline.
//!
//! The heart of the crate is [`rabbitmq::MessageLoop`]: it drains a service's
//! queue in order, hands every delivery to the service's handler and forwards
//! the result downstream, or to the dead-letter exchange when the handler
//! fails. Around it sit the environment config, logging setup, the
//! configuration store helpers and the orchestration helpers.

pub mod env;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod rabbitmq;
pub mod store;
pub mod util;

pub use env::{BrokerConfig, DatabaseConfig};
pub use logging::{init_logging, LogSettings, LoggingError};
pub use rabbitmq::{
    bind, run_message_loop, service_fn, AckMode, BindOptions, Binding, BoxError, Delivery,
    DeliveryStream, MessageLoop, Publisher, Publishing, RelayError, RetryPolicy, ServiceFunc,
};
