use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::lease::{create_lease_object, LeaseHandle, LeaseOptions};
use super::{get_key_value_map, KeyValueStore, StoreError};
use crate::models::{AgentDetails, ArcheTypes, MicroServiceData, MicroServiceDetails};

pub const MICROSERVICES_PREFIX: &str = "/microservices/";
pub const AGENTS_PREFIX: &str = "/agents/";
pub const ARCHETYPES_PREFIX: &str = "/archetypes/";

/// Items stored one per key, under `<prefix><name>`.
pub trait Named {
    fn name(&self) -> &str;
}

fn encode<T: Serialize>(key: &str, value: &T) -> std::result::Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

/// Stores every item as JSON and returns how many were written.
pub async fn register_collection<S, T>(
    store: &S,
    prefix: &str,
    items: &[T],
) -> std::result::Result<usize, StoreError>
where
    S: KeyValueStore + ?Sized,
    T: Named + Serialize,
{
    for item in items {
        let key = format!("{prefix}{}", item.name());
        store.put(&key, &encode(&key, item)?, None).await?;
        debug!(key = %key, "Stored collection item");
    }
    Ok(items.len())
}

/// Decodes every value under `prefix`, keyed by the key with the prefix
/// trimmed off.
pub async fn load_collection<T, S>(
    store: &S,
    prefix: &str,
) -> std::result::Result<BTreeMap<String, T>, StoreError>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    let mut out = BTreeMap::new();
    for (key, value) in get_key_value_map(store, prefix).await? {
        let item = serde_json::from_str(&value).map_err(|source| StoreError::Decode {
            key: key.clone(),
            source,
        })?;
        let name = key.strip_prefix(prefix).unwrap_or(&key).to_string();
        out.insert(name, item);
    }
    Ok(out)
}

pub async fn get_microservice_data<S>(
    store: &S,
) -> std::result::Result<BTreeMap<String, MicroServiceDetails>, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    load_collection(store, MICROSERVICES_PREFIX).await
}

pub async fn get_available_agents<S>(
    store: &S,
) -> std::result::Result<BTreeMap<String, AgentDetails>, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    load_collection(store, AGENTS_PREFIX).await
}

/// Parses a compose-style stack file.
pub fn load_stack_file(path: impl AsRef<Path>) -> Result<MicroServiceData> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read stack file at {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse stack file at {}", path.display()))
}

/// Stores every service of a stack file under `/microservices/<name>`, with
/// the image tag split out (default `latest`).
pub async fn set_microservices<S>(
    store: &S,
    stack_file: impl AsRef<Path>,
) -> Result<BTreeMap<String, MicroServiceDetails>>
where
    S: KeyValueStore + ?Sized,
{
    let mut data = load_stack_file(stack_file)?;

    for (name, details) in data.services.iter_mut() {
        details.normalise_image();
        let key = format!("{MICROSERVICES_PREFIX}{name}");
        store
            .put(&key, &encode(&key, details)?, None)
            .await
            .with_context(|| format!("Failed to store microservice {name}"))?;
        info!(service = %name, image = %details.image, tag = %details.tag, "Microservice registered");
    }
    Ok(data.services)
}

/// Publishes the agent under a lease kept alive until `cancel` fires.
pub async fn register_agent<S>(
    store: Arc<S>,
    agent: &AgentDetails,
    options: &LeaseOptions,
    cancel: CancellationToken,
) -> std::result::Result<LeaseHandle, StoreError>
where
    S: KeyValueStore + ?Sized + 'static,
{
    let key = format!("{AGENTS_PREFIX}{}", agent.name());
    let value = encode(&key, agent)?;
    create_lease_object(store, &key, &value, options, cancel).await
}

/// Loads an archetype JSON file and stores each archetype by name.
pub async fn register_archetypes<S>(store: &S, path: impl AsRef<Path>) -> Result<usize>
where
    S: KeyValueStore + ?Sized,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read archetypes file at {}", path.display()))?;
    let archetypes: ArcheTypes = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse archetypes file at {}", path.display()))?;

    let stored = register_collection(store, ARCHETYPES_PREFIX, &archetypes.archetypes).await?;
    info!(count = stored, "Archetypes registered");
    Ok(stored)
}
