//! Container runtime capability
//!
//! [`ContainerRuntime`] is the slice of the Docker Engine API the provisioning
//! engine needs. [`BollardRuntime`] implements it against a real daemon; tests
//! substitute an in-memory runtime or a mock.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, Ipam, IpamConfig};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::Docker;
use futures::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use super::naming::ROLE_LABEL;
use crate::crd::NodeRole;
use crate::{Error, Result};

/// Selects runtime objects by exact name or by `key=value` label
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceFilter {
    /// Exact object name
    Name(String),
    /// Label selector in `key=value` form
    Label(String),
}

/// A network as reported by the runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Runtime-assigned ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Labels on the network
    pub labels: HashMap<String, String>,
}

/// Parameters for a new bridge network
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name
    pub name: String,
    /// Subnet in CIDR form
    pub cidr: String,
    /// Gateway address inside the subnet
    pub gateway: String,
    /// Enable IPv6 on the network
    pub enable_ipv6: bool,
    /// Labels to attach
    pub labels: HashMap<String, String>,
}

/// A container as reported by the runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Runtime-assigned ID
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Labels on the container
    pub labels: HashMap<String, String>,
    /// Whether the container is currently running
    pub running: bool,
}

impl ContainerInfo {
    /// Node role from the `role` label, if present and recognised
    pub fn role(&self) -> Option<NodeRole> {
        self.labels.get(ROLE_LABEL).and_then(|r| r.parse().ok())
    }
}

/// Parameters for a new node container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Hostname inside the container
    pub hostname: String,
    /// Image reference
    pub image: String,
    /// Labels to attach
    pub labels: HashMap<String, String>,
    /// Run privileged (required for nested containers)
    pub privileged: bool,
    /// Memory limit in bytes (0 = unlimited)
    pub memory_bytes: i64,
    /// CFS quota in microseconds
    pub cpu_quota: i64,
    /// CFS period in microseconds
    pub cpu_period: i64,
    /// Network to attach to, by name
    pub network: String,
    /// TCP ports to expose
    pub exposed_ports: Vec<u16>,
    /// DNS servers for the container
    pub dns: Vec<String>,
}

/// Container runtime operations used by the provisioning engine
///
/// Name filters must match exactly; the engine relies on
/// `cluster-dev-worker-1` never matching `cluster-dev-worker-10`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable
    async fn ping(&self) -> Result<()>;

    /// List networks matching the filter
    async fn list_networks(&self, filter: &ResourceFilter) -> Result<Vec<NetworkInfo>>;

    /// Create a bridge network, returning its ID
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String>;

    /// Remove a network by ID
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// List containers (running or not) matching the filter
    async fn list_containers(&self, filter: &ResourceFilter) -> Result<Vec<ContainerInfo>>;

    /// Pull an image by reference
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container, returning its ID
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a container; starting a running container is not an error
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, waiting up to `grace` before killing it; stopping a
    /// stopped container is not an error
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Force-remove a container, optionally with its anonymous volumes
    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()>;
}

/// Docker Engine implementation of [`ContainerRuntime`]
#[derive(Clone, Debug)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket)
    ///
    /// Every API call is bounded by `timeout`.
    pub fn connect(timeout: Duration) -> Result<Self> {
        let docker = Docker::connect_with_defaults()
            .map_err(|e| Error::ProviderNotReady(format!("cannot connect to docker: {e}")))?
            .with_timeout(timeout);
        Ok(Self { docker })
    }

    fn filters(filter: &ResourceFilter) -> HashMap<String, Vec<String>> {
        match filter {
            // Docker matches names as a regex; anchor for an exact match
            ResourceFilter::Name(name) => {
                HashMap::from([("name".to_string(), vec![format!("^/?{name}$")])])
            }
            ResourceFilter::Label(selector) => {
                HashMap::from([("label".to_string(), vec![selector.clone()])])
            }
        }
    }
}

/// Status code of a daemon error response, if the error is one
fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// ID from a network create response; an empty or missing ID is an error
fn network_id(id: Option<String>) -> Result<String> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| Error::runtime("create network", "daemon returned no network id"))
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::ProviderNotReady(format!("docker daemon unreachable: {e}")))
    }

    async fn list_networks(&self, filter: &ResourceFilter) -> Result<Vec<NetworkInfo>> {
        let options = ListNetworksOptions {
            filters: Self::filters(filter),
        };
        let networks = self
            .docker
            .list_networks(Some(options))
            .await
            .map_err(|e| Error::runtime("list networks", e))?;

        Ok(networks
            .into_iter()
            .filter_map(|n| {
                Some(NetworkInfo {
                    id: n.id?,
                    name: n.name.unwrap_or_default(),
                    labels: n.labels.unwrap_or_default(),
                })
            })
            .filter(|n| match filter {
                ResourceFilter::Name(name) => &n.name == name,
                ResourceFilter::Label(_) => true,
            })
            .collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let options = CreateNetworkOptions {
            name: spec.name.clone(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            enable_ipv6: spec.enable_ipv6,
            ipam: Ipam {
                driver: Some("default".to_string()),
                config: Some(vec![IpamConfig {
                    subnet: Some(spec.cidr.clone()),
                    gateway: Some(spec.gateway.clone()),
                    ..Default::default()
                }]),
                options: None,
            },
            labels: spec.labels.clone(),
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| Error::runtime("create network", e))?;
        let id = network_id(response.id)?;
        debug!(network = %spec.name, id = %id, "created network");
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        match self.docker.remove_network(id).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(Error::runtime("remove network", e)),
        }
    }

    async fn list_containers(&self, filter: &ResourceFilter) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: Self::filters(filter),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::runtime("list containers", e))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(ContainerInfo {
                    id: c.id?,
                    name,
                    labels: c.labels.unwrap_or_default(),
                    running: c.state.as_deref() == Some("running"),
                })
            })
            .filter(|c| match filter {
                ResourceFilter::Name(name) => &c.name == name,
                ResourceFilter::Label(_) => true,
            })
            .collect())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::runtime(format!("pull image {image}"), e))?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|p| (format!("{p}/tcp"), HashMap::new()))
            .collect();
        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                memory: Some(spec.memory_bytes),
                cpu_quota: Some(spec.cpu_quota),
                cpu_period: Some(spec.cpu_period),
                dns: Some(spec.dns.clone()),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: HashMap::from([(
                    spec.network.clone(),
                    EndpointSettings::default(),
                )]),
            }),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::runtime(format!("create container {}", spec.name), e))?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(Error::runtime(format!("start container {id}"), e)),
        }
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(Error::runtime(format!("stop container {id}"), e)),
        }
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            v: remove_volumes,
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(Error::runtime(format!("remove container {id}"), e)),
        }
    }
}
