use lapin::{Channel, Connection, ConnectionProperties};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::errors::{RelayError, Result};
use crate::env::BrokerConfig;

/// Delay between two connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `initial` up to `max`, with +/- `jitter` (fraction) noise.
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: f64,
    },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                jitter,
            } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let base = initial.saturating_mul(factor).min(*max);
                if *jitter <= 0.0 {
                    return base;
                }
                let noise = (rand::random::<f64>() * 2.0 - 1.0) * jitter;
                base.mul_f64((1.0 + noise).max(0.0))
            }
        }
    }
}

/// How often and how patiently to dial the broker at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            backoff: Backoff::Fixed(Duration::from_secs(10)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Backoff::Fixed(Duration::ZERO))
    }
}

/// The last error seen once a retry policy has run out of attempts.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have failed.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> std::result::Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts,
                    "{} failed: {}", what, err
                );
                if attempt >= max_attempts {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = policy.backoff.delay_for(attempt);
                if !delay.is_zero() {
                    info!("Waiting {:?} before next attempt", delay);
                    sleep(delay).await;
                }
            }
        }
    }
}

async fn open(uri: &str) -> std::result::Result<(Connection, Channel), lapin::Error> {
    let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    Ok((connection, channel))
}

/// Dials the broker and opens one channel, retrying per `policy`.
pub async fn connect(config: &BrokerConfig, policy: &RetryPolicy) -> Result<(Connection, Channel)> {
    let uri = config.uri()?;
    info!(host = %config.host, port = config.port, "Connecting to RabbitMQ");

    match retry_with_policy(policy, "Connecting to RabbitMQ", || open(&uri)).await {
        Ok(handles) => {
            info!(host = %config.host, "Successfully connected to RabbitMQ");
            Ok(handles)
        }
        Err(exhausted) => {
            error!(
                attempts = exhausted.attempts,
                "Max connection attempts reached. Giving up."
            );
            Err(RelayError::ConnectExhausted {
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })
        }
    }
}
