// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use std::path::PathBuf;
use thiserror::Error;

/// Error returned by a `ServiceFunc` for a single delivery.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Failed to read password file {path}: {source}")]
    PasswordFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to RabbitMQ after {attempts} attempts: {source}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: LapinError,
    },

    #[error("Failed to declare exchange '{exchange}': {source}")]
    ExchangeDeclare {
        exchange: String,
        #[source]
        source: LapinError,
    },

    #[error("Failed to declare queue '{queue}': {source}")]
    QueueDeclare {
        queue: String,
        #[source]
        source: LapinError,
    },

    #[error("Failed to bind queue '{queue}' to '{exchange}' with key '{routing_key}': {source}")]
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: LapinError,
    },

    #[error("Failed to register consumer on queue '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: LapinError,
    },

    #[error("Failed to publish to '{exchange}' with key '{routing_key}': {source}")]
    Publish {
        exchange: String,
        routing_key: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("RabbitMQ error: {0}")]
    Broker(#[from] LapinError),
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Startup-class failures: the service cannot serve traffic and should exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::MissingEnv(_)
                | RelayError::InvalidEnv { .. }
                | RelayError::PasswordFile { .. }
                | RelayError::ConnectExhausted { .. }
                | RelayError::ExchangeDeclare { .. }
                | RelayError::QueueDeclare { .. }
                | RelayError::QueueBind { .. }
                | RelayError::Consume { .. }
                | RelayError::Publish { .. }
        )
    }
}
