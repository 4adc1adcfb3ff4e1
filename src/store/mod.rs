//! Key/value configuration store helpers.
//!
//! The store itself (etcd in production) sits behind [`KeyValueStore`]. Keys
//! are hierarchical paths such as `/microservices/<name>` and `/agents/<name>`
//! holding JSON descriptors; agent keys are leased and vanish unless kept
//! alive.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

pub mod lease;
pub mod memory;
pub mod registry;

pub use lease::{create_lease_object, LeaseHandle, LeaseOptions};
pub use memory::MemoryStore;
pub use registry::{
    get_available_agents, get_microservice_data, load_collection, load_stack_file,
    register_agent, register_archetypes, register_collection, set_microservices, Named,
    AGENTS_PREFIX, ARCHETYPES_PREFIX, MICROSERVICES_PREFIX,
};

/// Reads give up after this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Config store error: {0}")]
    Backend(String),

    #[error("{op} on '{key}' timed out after {after:?}")]
    Timeout {
        op: &'static str,
        key: String,
        after: Duration,
    },

    #[error("Key {0} not found")]
    KeyNotFound(String),

    #[error("Lease {0} not found or expired")]
    LeaseNotFound(LeaseId),

    #[error("Failed to decode value of {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The operations the helpers need from a key/value store with leases.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Every pair whose key starts with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Resets the lease's time-to-live once.
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        (**self).get_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
        (**self).put(key, value, lease).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        (**self).grant_lease(ttl).await
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        (**self).keep_alive(lease).await
    }
}

async fn with_read_timeout<T, F>(op: &'static str, key: &str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    timeout(READ_TIMEOUT, fut)
        .await
        .map_err(|_| StoreError::Timeout {
            op,
            key: key.to_string(),
            after: READ_TIMEOUT,
        })?
}

/// The value at `key`; a missing key is an error.
pub async fn get_value<S>(store: &S, key: &str) -> Result<String, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    with_read_timeout("get", key, store.get(key))
        .await?
        .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
}

/// All pairs under `prefix`, keyed by their full path.
pub async fn get_key_value_map<S>(
    store: &S,
    prefix: &str,
) -> Result<std::collections::BTreeMap<String, String>, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    let pairs = with_read_timeout("get_prefix", prefix, store.get_prefix(prefix)).await?;
    if pairs.is_empty() {
        tracing::warn!(prefix, "No keys found under prefix");
    }
    Ok(pairs.into_iter().collect())
}
