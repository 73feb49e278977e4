//! Docker provisioning engine
//!
//! This module implements the [`Provider`] trait on a container runtime.
//! Every cluster gets:
//!
//! 1. **Network** - a bridge network `cluster-<name>-net` labeled with the
//!    cluster name, using the configured CIDR and gateway
//! 2. **Control-plane nodes** - privileged `kindest/node` containers named
//!    `cluster-<name>-control-plane-<i>`
//! 3. **Worker nodes** - the same image, named `cluster-<name>-worker-<i>`
//!
//! All operations find their resources again by name and label, so each one
//! is safe to re-run after a partial failure.
//!
//! # Example
//!
//! ```ignore
//! use kindle::provider::{DockerProvider, DockerProviderConfig, Provider};
//!
//! let provider = DockerProvider::connect(DockerProviderConfig::default(), timeout).await?;
//! provider.create_cluster(&cluster).await?;
//! let health = provider.get_cluster_status(&cluster).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::config::DockerProviderConfig;
use super::naming::{self, cluster_selector};
use super::resources::{cpu_limits, parse_memory, parse_memory_or_zero};
use super::runtime::{
    BollardRuntime, ContainerInfo, ContainerRuntime, ContainerSpec, NetworkSpec, ResourceFilter,
};
use super::status::ClusterHealth;
use super::Provider;
use crate::crd::{Cluster, MachineConfig, NodeRole};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Grace period for node containers stopped during cluster deletion
pub const DELETE_STOP_GRACE: Duration = Duration::from_secs(30);

/// Grace period for worker containers stopped during scale-down
pub const SCALE_DOWN_STOP_GRACE: Duration = Duration::from_secs(60);

/// Docker provisioning engine
///
/// Holds the runtime handle and the operator-wide provider configuration;
/// all cluster state lives in the runtime itself.
#[derive(Clone)]
pub struct DockerProvider {
    runtime: Arc<dyn ContainerRuntime>,
    config: DockerProviderConfig,
    pull_retry: RetryConfig,
}

impl std::fmt::Debug for DockerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerProvider")
            .field("config", &self.config)
            .field("pull_retry", &self.pull_retry)
            .finish_non_exhaustive()
    }
}

impl DockerProvider {
    /// Create an engine on top of an existing runtime
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        mut config: DockerProviderConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pull_retry = RetryConfig::with_max_attempts(config.image_pull_attempts());
        Ok(Self {
            runtime,
            config,
            pull_retry,
        })
    }

    /// Connect to the local Docker daemon and verify it answers
    pub async fn connect(config: DockerProviderConfig, timeout: Duration) -> Result<Self> {
        let runtime = BollardRuntime::connect(timeout)?;
        Self::from_runtime(Arc::new(runtime), config).await
    }

    /// Create an engine after checking that the runtime is reachable
    pub async fn from_runtime(
        runtime: Arc<dyn ContainerRuntime>,
        config: DockerProviderConfig,
    ) -> Result<Self> {
        runtime.ping().await.map_err(|e| match e {
            Error::ProviderNotReady(msg) => Error::ProviderNotReady(msg),
            other => Error::ProviderNotReady(other.to_string()),
        })?;
        Self::new(runtime, config)
    }

    /// Override the backoff used for image pulls
    pub fn with_pull_retry(mut self, retry: RetryConfig) -> Self {
        self.pull_retry = retry;
        self
    }

    /// The active provider configuration
    pub fn config(&self) -> &DockerProviderConfig {
        &self.config
    }

    /// Get the cluster name, or fail with a configuration error
    fn cluster_name(cluster: &Cluster) -> Result<&str> {
        cluster
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid_config("cluster must have a name"))
    }

    /// Memory limit in bytes, honoring the strictness setting
    fn memory_bytes(&self, machine: &MachineConfig) -> Result<i64> {
        if self.config.strict_quantities() {
            parse_memory(&machine.memory)
        } else {
            Ok(parse_memory_or_zero(&machine.memory))
        }
    }

    /// Check that a node pool can be turned into containers
    fn validate_pool(&self, pool: &str, machine: &MachineConfig) -> Result<()> {
        self.memory_bytes(machine)?;
        if let Some(limits) = &self.config.resource_limits {
            limits.check(pool, machine)?;
        }
        Ok(())
    }

    /// Preconditions for creating a cluster
    fn validate_cluster(&self, cluster: &Cluster) -> Result<()> {
        Self::cluster_name(cluster)?;
        cluster.spec.validate().map_err(|e| match e {
            Error::Validation(msg) => Error::InvalidConfig(msg),
            other => other,
        })?;
        self.validate_pool("controlPlane", &cluster.spec.control_plane.machine_config)?;
        self.validate_pool("workers", &cluster.spec.workers.machine_config)?;
        Ok(())
    }

    async fn cluster_containers(&self, cluster_name: &str) -> Result<Vec<ContainerInfo>> {
        self.runtime
            .list_containers(&ResourceFilter::Label(cluster_selector(cluster_name)))
            .await
    }

    /// Reuse the cluster network if it exists, otherwise create it
    async fn ensure_network(&self, cluster_name: &str) -> Result<String> {
        let name = naming::network_name(cluster_name);
        let existing = self
            .runtime
            .list_networks(&ResourceFilter::Name(name.clone()))
            .await?;
        if let Some(network) = existing.into_iter().next() {
            debug!(network = %name, id = %network.id, "reusing network");
            return Ok(name);
        }

        let network = &self.config.network;
        let gateway = naming::gateway_for(&network.cidr)?;
        let spec = NetworkSpec {
            name: name.clone(),
            cidr: network.cidr.clone(),
            gateway: gateway.to_string(),
            enable_ipv6: network.enable_ipv6,
            labels: naming::network_labels(cluster_name),
        };
        let id = self.runtime.create_network(&spec).await?;
        info!(network = %name, id = %id, cidr = %network.cidr, "created network");
        Ok(name)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let op = format!("pull {image}");
        let runtime = &self.runtime;
        retry_with_backoff(&self.pull_retry, &op, || async move {
            runtime.pull_image(image).await
        })
        .await
    }

    fn container_spec(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        role: NodeRole,
        index: u32,
        network: &str,
    ) -> Result<ContainerSpec> {
        let machine = match role {
            NodeRole::ControlPlane => &cluster.spec.control_plane.machine_config,
            NodeRole::Worker => &cluster.spec.workers.machine_config,
        };
        let name = naming::node_name(cluster_name, role, index);
        let (cpu_quota, cpu_period) = cpu_limits(machine.cpu_count);
        Ok(ContainerSpec {
            hostname: name.clone(),
            name,
            image: naming::node_image(
                self.config.image_family(),
                &cluster.spec.kubernetes_version,
            ),
            labels: naming::node_labels(cluster_name, role),
            privileged: true,
            memory_bytes: self.memory_bytes(machine)?,
            cpu_quota,
            cpu_period,
            network: network.to_string(),
            exposed_ports: self.config.network.exposed_ports.clone(),
            dns: vec![self.config.network.dns_nameserver.clone()],
        })
    }

    /// Pull, create and start one node container
    async fn create_node(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        role: NodeRole,
        index: u32,
        network: &str,
    ) -> Result<()> {
        let spec = self.container_spec(cluster, cluster_name, role, index, network)?;
        self.pull_image(&spec.image).await?;
        let id = self.runtime.create_container(&spec).await?;
        self.runtime.start_container(&id).await?;
        info!(cluster = %cluster_name, node = %spec.name, "started node");
        Ok(())
    }

    /// Start a node that already exists under its deterministic name, or
    /// create it
    async fn start_or_create_node(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        role: NodeRole,
        index: u32,
        network: &str,
    ) -> Result<()> {
        let name = naming::node_name(cluster_name, role, index);
        let existing = self
            .runtime
            .list_containers(&ResourceFilter::Name(name.clone()))
            .await?;
        match existing.into_iter().next() {
            Some(container) => {
                self.runtime.start_container(&container.id).await?;
                info!(cluster = %cluster_name, node = %name, "started existing node");
                Ok(())
            }
            None => {
                self.create_node(cluster, cluster_name, role, index, network)
                    .await
            }
        }
    }

    async fn create_nodes(
        &self,
        cluster: &Cluster,
        cluster_name: &str,
        network: &str,
    ) -> Result<()> {
        let pools = [
            (NodeRole::ControlPlane, cluster.spec.control_plane.count),
            (NodeRole::Worker, cluster.spec.workers.count),
        ];
        for (role, count) in pools {
            for index in 0..count {
                if let Err(e) = self
                    .create_node(cluster, cluster_name, role, index, network)
                    .await
                {
                    let node = naming::node_name(cluster_name, role, index);
                    return Err(Error::provider(format!(
                        "failed to create {role} node {node}: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Tear down everything after a failed create, folding any cleanup
    /// failure into the original error
    async fn rollback(&self, cluster: &Cluster, cluster_name: &str, err: Error) -> Error {
        warn!(cluster = %cluster_name, error = %err, "cluster creation failed, rolling back");
        match self.delete_cluster(cluster).await {
            Ok(()) => err,
            Err(rollback_err) => {
                warn!(cluster = %cluster_name, error = %rollback_err, "rollback failed");
                Error::provider(format!("{err} (rollback failed: {rollback_err})"))
            }
        }
    }

    async fn remove_node(
        &self,
        container: &ContainerInfo,
        grace: Duration,
        volumes: bool,
    ) -> Result<()> {
        self.runtime.stop_container(&container.id, grace).await?;
        self.runtime
            .remove_container(&container.id, volumes)
            .await?;
        debug!(node = %container.name, "removed node");
        Ok(())
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn create_cluster(&self, cluster: &Cluster) -> Result<()> {
        self.validate_cluster(cluster)?;
        let name = Self::cluster_name(cluster)?;

        if !self.cluster_containers(name).await?.is_empty() {
            return Err(Error::ClusterExists(name.to_string()));
        }

        let network = self.ensure_network(name).await?;

        if let Err(e) = self.create_nodes(cluster, name, &network).await {
            return Err(self.rollback(cluster, name, e).await);
        }

        info!(
            cluster = %name,
            control_plane = cluster.spec.control_plane.count,
            workers = cluster.spec.workers.count,
            "cluster created"
        );
        Ok(())
    }

    async fn delete_cluster(&self, cluster: &Cluster) -> Result<()> {
        let name = cluster.name_any();

        for container in self.cluster_containers(&name).await? {
            self.remove_node(&container, DELETE_STOP_GRACE, true).await?;
        }

        let mut networks = self
            .runtime
            .list_networks(&ResourceFilter::Label(cluster_selector(&name)))
            .await?;
        // Networks from older releases carry no labels; match those by name
        for network in self
            .runtime
            .list_networks(&ResourceFilter::Name(naming::network_name(&name)))
            .await?
        {
            if !networks.iter().any(|n| n.id == network.id) {
                networks.push(network);
            }
        }
        for network in networks {
            self.runtime.remove_network(&network.id).await?;
            debug!(cluster = %name, network = %network.name, "removed network");
        }

        info!(cluster = %name, "cluster deleted");
        Ok(())
    }

    async fn get_cluster_status(&self, cluster: &Cluster) -> Result<ClusterHealth> {
        let name = cluster.name_any();
        let containers = self.cluster_containers(&name).await?;
        Ok(ClusterHealth::from_containers(&cluster.spec, &containers))
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<()> {
        let name = cluster.name_any();
        let containers = self.cluster_containers(&name).await?;
        if containers.is_empty() {
            return Err(Error::ClusterNotFound(name));
        }

        let desired = cluster.spec.workers.count;
        let declared: HashSet<String> = (0..cluster.spec.control_plane.count)
            .map(|i| naming::node_name(&name, NodeRole::ControlPlane, i))
            .chain((0..desired).map(|i| naming::node_name(&name, NodeRole::Worker, i)))
            .collect();

        // Declared nodes that crashed or were stopped come back first
        for container in containers
            .iter()
            .filter(|c| !c.running && declared.contains(&c.name))
        {
            self.runtime.start_container(&container.id).await?;
            info!(cluster = %name, node = %container.name, "restarted stopped node");
        }

        let existing: HashSet<&str> = containers.iter().map(|c| c.name.as_str()).collect();
        let missing: Vec<u32> = (0..desired)
            .filter(|&i| !existing.contains(naming::node_name(&name, NodeRole::Worker, i).as_str()))
            .collect();

        if !missing.is_empty() {
            self.validate_pool("workers", &cluster.spec.workers.machine_config)?;
            let network_name = naming::network_name(&name);
            let networks = self
                .runtime
                .list_networks(&ResourceFilter::Name(network_name.clone()))
                .await?;
            if networks.is_empty() {
                return Err(Error::ClusterNotFound(format!(
                    "{name}: network {network_name} is missing"
                )));
            }

            info!(cluster = %name, to = desired, adding = missing.len(), "scaling workers up");
            for index in missing {
                self.start_or_create_node(cluster, &name, NodeRole::Worker, index, &network_name)
                    .await
                    .map_err(|e| {
                        let node = naming::node_name(&name, NodeRole::Worker, index);
                        Error::provider(format!("failed to create worker node {node}: {e}"))
                    })?;
            }
        }

        let mut surplus: Vec<&ContainerInfo> = containers
            .iter()
            .filter(|c| c.role() == Some(NodeRole::Worker) && !declared.contains(&c.name))
            .collect();
        if !surplus.is_empty() {
            info!(cluster = %name, to = desired, removing = surplus.len(), "scaling workers down");
            // Highest index first
            surplus.sort_by_key(|c| std::cmp::Reverse(naming::node_index(&c.name)));
            for container in surplus {
                self.remove_node(container, SCALE_DOWN_STOP_GRACE, false)
                    .await?;
            }
        }

        Ok(())
    }
}
