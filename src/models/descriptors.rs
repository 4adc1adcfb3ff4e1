use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::Named;

/// A stack file: every service keyed by its name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MicroServiceData {
    #[serde(default)]
    pub services: BTreeMap<String, MicroServiceDetails>,
}

/// How one microservice is run, as stored under `/microservices/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroServiceDetails {
    pub tag: String,
    pub image: String,
    pub ports: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub secrets: Vec<String>,
    pub volumes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Deploy::is_empty")]
    pub deploy: Deploy,
}

impl MicroServiceDetails {
    /// Splits `image:tag` into its parts; a missing tag becomes `latest`.
    pub fn normalise_image(&mut self) {
        if let Some((image, tag)) = self.image.rsplit_once(':') {
            if !tag.contains('/') {
                if self.tag.is_empty() {
                    self.tag = tag.to_string();
                }
                self.image = image.to_string();
            }
        }
        if self.tag.is_empty() {
            self.tag = "latest".to_string();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deploy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    pub placement: Placement,
    pub resources: Resources,
}

impl Deploy {
    pub fn is_empty(&self) -> bool {
        self == &Deploy::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub reservations: Resource,
    pub limits: Resource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Networks, volumes and secrets that exist outside any one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalDockerConfig {
    pub networks: Vec<String>,
    pub volumes: Vec<String>,
    pub secrets: Vec<String>,
}

/// A running agent, as stored (leased) under `/agents/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDetails {
    pub name: String,
    #[serde(rename = "services")]
    pub active_services: Vec<String>,
    pub active_since: Option<DateTime<Utc>>,
    pub config_updated: Option<DateTime<Utc>>,
    pub routing_key_output: String,
    pub routing_key_input: String,
    pub input_queue_name: String,
    pub service_name: String,
}

impl Named for AgentDetails {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcheTypes {
    #[serde(default)]
    pub archetypes: Vec<ArcheType>,
}

/// A request type and the chain of services that answers it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcheType {
    pub name: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub io_config: IoConfig,
}

impl Named for ArcheType {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub service_io: BTreeMap<String, String>,
    pub finish: String,
    pub third_party_name: String,
    pub third_party: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reasoner {
    pub archetype: String,
    #[serde(default, rename = "RequiredServices", alias = "required_services")]
    pub required_services: Vec<RequiredService>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredService {
    pub service_name: String,
}
