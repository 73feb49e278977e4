//! Infrastructure provider abstraction layer
//!
//! This module turns a [`Cluster`] spec into running infrastructure. The
//! reconciler only sees the [`Provider`] trait; [`DockerProvider`] implements
//! it on top of a [`ContainerRuntime`].
//!
//! # Submodules
//!
//! - [`naming`] - deterministic names, labels and gateway addresses
//! - [`resources`] - memory and CPU translation into runtime units
//! - [`runtime`] - the container runtime capability and its Docker client
//! - [`status`] - classification of live containers into a [`ClusterHealth`]
//! - [`config`] - operator-wide provider configuration
//!
//! # Example
//!
//! ```text
//! let provider = DockerProvider::connect(config, timeout).await?;
//! provider.create_cluster(&cluster).await?;
//! ```

pub mod config;
mod docker;
pub mod naming;
pub mod resources;
pub mod runtime;
pub mod status;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{DockerProviderConfig, NetworkConfig, ResourceLimit, ResourceLimitsConfig};
pub use docker::{DockerProvider, DELETE_STOP_GRACE, SCALE_DOWN_STOP_GRACE};
pub use runtime::{BollardRuntime, ContainerRuntime};
pub use status::{ClusterHealth, ObservedPhase};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::crd::Cluster;
use crate::Result;

/// Provisioning capability consumed by the cluster controller
///
/// Every operation must tolerate partially-applied prior state: the
/// controller re-invokes them after crashes and transient failures.
///
/// # Errors
///
/// - `create_cluster` returns [`Error::ClusterExists`](crate::Error::ClusterExists)
///   if any node container is already labeled with the cluster, and
///   [`Error::InvalidConfig`](crate::Error::InvalidConfig) for specs that
///   cannot be provisioned
/// - `update_cluster` returns [`Error::ClusterNotFound`](crate::Error::ClusterNotFound)
///   when the cluster has no node containers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create the network and every node container, rolling back on failure
    async fn create_cluster(&self, cluster: &Cluster) -> Result<()>;

    /// Remove every node container and network belonging to the cluster
    ///
    /// Deleting a cluster with no resources succeeds.
    async fn delete_cluster(&self, cluster: &Cluster) -> Result<()>;

    /// Observe the cluster's node containers
    async fn get_cluster_status(&self, cluster: &Cluster) -> Result<ClusterHealth>;

    /// Converge the worker count to the spec
    async fn update_cluster(&self, cluster: &Cluster) -> Result<()>;
}
