use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{KeyValueStore, LeaseId, StoreError};

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LeaseOptions {
    pub ttl: Duration,
    /// How often the keepalive fires; a third of the TTL when unset.
    pub refresh_interval: Option<Duration>,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LEASE_TTL,
            refresh_interval: None,
        }
    }
}

impl LeaseOptions {
    pub fn lease_time(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    pub fn refresh_every(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    fn refresh(&self) -> Duration {
        self.refresh_interval
            .unwrap_or(self.ttl / 3)
            .max(Duration::from_millis(1))
    }
}

/// A leased key and the task keeping it alive.
#[derive(Debug)]
pub struct LeaseHandle {
    lease: LeaseId,
    key: String,
    task: JoinHandle<()>,
}

impl LeaseHandle {
    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the keepalive task; it only ends once cancelled or once the
    /// lease is gone.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// Writes `key` under a fresh lease and keeps that lease alive until `cancel`
/// fires. After cancellation the key expires with the lease.
pub async fn create_lease_object<S>(
    store: Arc<S>,
    key: &str,
    value: &str,
    options: &LeaseOptions,
    cancel: CancellationToken,
) -> Result<LeaseHandle, StoreError>
where
    S: KeyValueStore + ?Sized + 'static,
{
    let lease = store.grant_lease(options.ttl).await?;
    store.put(key, value, Some(lease)).await?;
    info!(key, lease = %lease, ttl = ?options.ttl, "Leased key created");

    let refresh = options.refresh();
    let task_key = key.to_string();
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + refresh, refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %task_key, lease = %lease, "Keepalive cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    match store.keep_alive(lease).await {
                        Ok(()) => {}
                        Err(StoreError::LeaseNotFound(_)) => {
                            warn!(key = %task_key, lease = %lease, "Lease is gone, stopping keepalive");
                            break;
                        }
                        Err(e) => warn!(key = %task_key, error = %e, "Keepalive failed"),
                    }
                }
            }
        }
    });

    Ok(LeaseHandle {
        lease,
        key: key.to_string(),
        task,
    })
}
