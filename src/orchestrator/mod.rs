//! Turning a service request into a swarm service.
//!
//! The container engine sits behind [`Orchestrator`]; this module only
//! resolves names and builds the declarative [`ServiceSpec`].

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::models::CreateServicePayload;
use crate::util::last_part_after_slash;

pub mod spec;

pub use spec::{
    ContainerSpec, EndpointSpec, Mount, MountType, NetworkAttachment, Placement, PortConfig,
    PortProtocol, ResolutionMode, SecretFileTarget, SecretReference, SecretSummary, ServiceMode,
    ServiceSpec, TaskSpec,
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("This node is not a swarm manager; services can only be created on a manager")]
    NotManager,

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Invalid port mapping {published}->{target}")]
    InvalidPort { published: String, target: String },

    #[error("Orchestrator error: {0}")]
    Backend(String),
}

impl OrchestratorError {
    /// Errors a service cannot recover from by retrying.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OrchestratorError::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Whether this node can manage swarm services.
    async fn swarm_control_available(&self) -> Result<bool>;

    async fn list_secrets(&self) -> Result<Vec<SecretSummary>>;

    /// Submits the spec and returns the new service's id.
    async fn create_service(&self, spec: &ServiceSpec) -> Result<String>;
}

pub async fn ensure_manager<O: Orchestrator + ?Sized>(orch: &O) -> Result<()> {
    if orch.swarm_control_available().await? {
        Ok(())
    } else {
        error!("Node is not a swarm manager");
        Err(OrchestratorError::NotManager)
    }
}

fn find_secret_id(known: &[SecretSummary], name: &str) -> Result<String> {
    known
        .iter()
        .find(|secret| secret.name == name)
        .map(|secret| secret.id.clone())
        .ok_or_else(|| OrchestratorError::SecretNotFound(name.to_string()))
}

pub async fn secret_id_by_name<O: Orchestrator + ?Sized>(orch: &O, name: &str) -> Result<String> {
    find_secret_id(&orch.list_secrets().await?, name)
}

fn port_configs(payload: &CreateServicePayload) -> Result<Vec<PortConfig>> {
    payload
        .ports
        .iter()
        .map(|(published, target)| {
            let invalid = || OrchestratorError::InvalidPort {
                published: published.clone(),
                target: target.clone(),
            };
            Ok(PortConfig {
                protocol: PortProtocol::Tcp,
                published_port: published.parse().map_err(|_| invalid())?,
                target_port: target.parse().map_err(|_| invalid())?,
            })
        })
        .collect()
}

/// Builds the service spec for a request, resolving every secret name to its
/// id. Unknown secrets fail the whole build.
pub async fn build_service_spec<O: Orchestrator + ?Sized>(
    orch: &O,
    payload: &CreateServicePayload,
) -> Result<ServiceSpec> {
    let tag = if payload.tag.is_empty() {
        "latest"
    } else {
        payload.tag.as_str()
    };
    let service_name = last_part_after_slash(&payload.image).to_string();

    let mut secrets = Vec::with_capacity(payload.secrets.len());
    if !payload.secrets.is_empty() {
        let known = orch.list_secrets().await?;
        for name in &payload.secrets {
            secrets.push(SecretReference {
                file: SecretFileTarget::for_secret(name),
                secret_id: find_secret_id(&known, name)?,
                secret_name: name.clone(),
            });
        }
    }

    let networks = payload
        .networks
        .iter()
        .map(|network| NetworkAttachment {
            target: network.clone(),
            aliases: vec![service_name.clone()],
        })
        .collect();

    let mounts = payload
        .volumes
        .iter()
        .map(|(source, target)| Mount {
            kind: MountType::Bind,
            source: source.clone(),
            target: target.clone(),
        })
        .collect();

    let constraints = &payload.deploy.placement.constraints;
    let placement = (!constraints.is_empty()).then(|| Placement {
        constraints: constraints.clone(),
    });

    Ok(ServiceSpec {
        name: service_name,
        task_template: TaskSpec {
            container_spec: ContainerSpec {
                image: format!("{}:{}", payload.image, tag),
                env: spec::env_list(&payload.env_vars),
                secrets,
                mounts,
            },
            networks,
            placement,
        },
        mode: payload.deploy.replicas.map(|replicas| ServiceMode::Replicated {
            replicas: u64::from(replicas),
        }),
        endpoint_spec: EndpointSpec {
            mode: ResolutionMode::Vip,
            ports: port_configs(payload)?,
        },
    })
}

/// Checks the node can manage services, builds the spec and submits it.
pub async fn deploy_service<O: Orchestrator + ?Sized>(
    orch: &O,
    payload: &CreateServicePayload,
) -> Result<String> {
    ensure_manager(orch).await?;
    let spec = build_service_spec(orch, payload).await?;
    let id = orch.create_service(&spec).await?;
    info!(service = %spec.name, image = %spec.task_template.container_spec.image, id = %id, "Service created");
    Ok(id)
}
