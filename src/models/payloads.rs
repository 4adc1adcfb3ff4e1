use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::descriptors::{Deploy, MicroServiceDetails};

/// Request to start a service on the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateServicePayload {
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(alias = "environment")]
    pub env_vars: BTreeMap<String, String>,
    pub networks: Vec<String>,
    pub secrets: Vec<String>,
    pub volumes: BTreeMap<String, String>,
    /// Published port -> target port.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Deploy::is_empty")]
    pub deploy: Deploy,
}

impl CreateServicePayload {
    /// Payload for a stored microservice, attached to the given networks.
    pub fn from_details(details: &MicroServiceDetails, networks: Vec<String>) -> Self {
        Self {
            image: details.image.clone(),
            tag: details.tag.clone(),
            env_vars: details.environment.clone(),
            networks,
            secrets: details.secrets.clone(),
            volumes: details.volumes.clone(),
            ports: details.ports.clone(),
            deploy: details.deploy.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetachAttachServicePayload {
    pub service_name: String,
    pub queue_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KillServicePayload {
    pub service_name: String,
}
