//! Cluster controller implementation
//!
//! This module implements the reconciliation logic for Cluster resources.
//! Each pass reads the cluster's phase, takes one step through the
//! provisioning engine, and persists the resulting status:
//!
//! ```text
//! (unset) -> Pending -> Provisioning -> Running <-> Updating
//!                            |
//!                            v
//!                          Failed
//! ```
//!
//! Deletion is gated by a finalizer: the object is only released once the
//! engine confirms every container and network is gone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    Cluster, ClusterPhase, ClusterStatus, Condition, ConditionStatus, CLUSTER_FINALIZER,
};
use crate::provider::{ClusterHealth, ObservedPhase, Provider};
use crate::{
    Error, DEFAULT_ERROR_REQUEUE_SECS, DEFAULT_FAILED_REQUEUE_SECS, DEFAULT_RUNNING_REQUEUE_SECS,
    FIELD_MANAGER,
};

/// Condition type reporting whether every declared node is running
const READY_CONDITION: &str = "Ready";

/// Trait abstracting Kubernetes client operations for Cluster
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Replace the status of a Cluster
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a Cluster (no-op if present)
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a Cluster
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Cluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<(), Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        self.api(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;

        Ok(())
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = self.api(namespace).get(name).await?;
        let mut finalizers = cluster.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }

        finalizers.push(finalizer.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = self.api(namespace).get(name).await?;
        let finalizers: Vec<String> = cluster
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        self.patch_finalizers(namespace, name, finalizers).await
    }
}

/// Requeue intervals and remediation policy for the reconciler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Requeue after a Pending write (zero = immediately)
    pub pending_requeue: Duration,
    /// Status refresh interval for Running and Updating clusters
    pub running_requeue: Duration,
    /// Requeue interval for Failed clusters
    pub failed_requeue: Duration,
    /// Requeue interval after a retryable reconcile error
    pub error_requeue: Duration,
    /// Move Failed clusters back to Pending once `failed_requeue` has passed
    pub retry_failed: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pending_requeue: Duration::ZERO,
            running_requeue: Duration::from_secs(DEFAULT_RUNNING_REQUEUE_SECS),
            failed_requeue: Duration::from_secs(DEFAULT_FAILED_REQUEUE_SECS),
            error_requeue: Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS),
            retry_failed: false,
        }
    }
}

/// Controller context containing shared state and clients
///
/// Use [`Context::builder`] for flexible construction:
///
/// ```ignore
/// let ctx = Context::builder(client, provider)
///     .config(ReconcileConfig { retry_failed: true, ..Default::default() })
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Provisioning engine
    pub provider: Arc<dyn Provider>,
    /// Requeue intervals and remediation policy
    pub config: ReconcileConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, provider: Arc<dyn Provider>) -> ContextBuilder {
        ContextBuilder::new(client, provider)
    }

    /// Create a new controller context with default settings
    pub fn new(client: Client, provider: Arc<dyn Provider>) -> Self {
        Self::builder(client, provider).build()
    }

    /// Create a context for testing with custom mock clients
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        provider: Arc<dyn Provider>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            kube,
            provider,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    provider: Arc<dyn Provider>,
    kube: Option<Arc<dyn KubeClient>>,
    config: ReconcileConfig,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client and provider
    fn new(client: Client, provider: Arc<dyn Provider>) -> Self {
        Self {
            client,
            provider,
            kube: None,
            config: ReconcileConfig::default(),
        }
    }

    /// Set requeue intervals and remediation policy
    pub fn config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            provider: self.provider,
            config: self.config,
        }
    }
}

/// Reconcile a Cluster resource
///
/// Deletion is handled first and exclusively. Otherwise an unset phase is
/// initialized to Pending, the finalizer is ensured, and the current phase
/// decides the single step taken in this pass.
///
/// # Returns
///
/// Returns an `Action` indicating when to requeue the resource, or an error
/// if reconciliation failed. Errors leave the phase unchanged except for a
/// failed create, which records Failed before returning.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    debug!("reconciling cluster");

    if cluster.is_deleting() {
        return handle_deletion(&cluster, &ctx).await;
    }

    let Some(phase) = cluster.phase() else {
        info!("new cluster, setting phase to Pending");
        update_status_pending(&cluster, &ctx).await?;
        return Ok(Action::requeue(ctx.config.pending_requeue));
    };

    if !cluster.has_finalizer() {
        info!("adding finalizer");
        add_finalizer(&cluster, &ctx).await?;
    }

    debug!(%phase, "current cluster phase");

    match phase {
        ClusterPhase::Pending => {
            update_status_provisioning(&cluster, &ctx).await?;
            Ok(Action::requeue(ctx.config.pending_requeue))
        }
        ClusterPhase::Provisioning => reconcile_provisioning(&cluster, &ctx).await,
        ClusterPhase::Running => reconcile_running(&cluster, &ctx).await,
        ClusterPhase::Updating => reconcile_updating(&cluster, &ctx).await,
        ClusterPhase::Failed => reconcile_failed(&cluster, &ctx).await,
        ClusterPhase::Deleting => {
            // Deletion was observed but the marker is gone; nothing to drive
            debug!("cluster in Deleting phase without deletion timestamp");
            Ok(Action::requeue(ctx.config.failed_requeue))
        }
    }
}

async fn reconcile_provisioning(cluster: &Cluster, ctx: &Context) -> Result<Action, Error> {
    info!(
        control_plane = cluster.spec.control_plane.count,
        workers = cluster.spec.workers.count,
        "provisioning cluster"
    );

    match ctx.provider.create_cluster(cluster).await {
        Ok(()) => {
            update_status_created(cluster, ctx).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            let message = format!("failed to create cluster: {e}");
            update_status_failed(cluster, ctx, &message).await?;
            Err(e)
        }
    }
}

async fn reconcile_running(cluster: &Cluster, ctx: &Context) -> Result<Action, Error> {
    let health = ctx.provider.get_cluster_status(cluster).await?;

    let phase = match health.phase {
        ObservedPhase::Running => ClusterPhase::Running,
        ObservedPhase::Pending | ObservedPhase::Starting => ClusterPhase::Updating,
        ObservedPhase::NotFound => ClusterPhase::Provisioning,
    };
    if phase != ClusterPhase::Running {
        info!(observed = %health.phase, next = %phase, "cluster drifted from spec");
    }

    update_status_observed(cluster, ctx, phase, &health).await?;
    Ok(Action::requeue(ctx.config.running_requeue))
}

async fn reconcile_updating(cluster: &Cluster, ctx: &Context) -> Result<Action, Error> {
    match ctx.provider.update_cluster(cluster).await {
        Ok(()) => {}
        Err(Error::ClusterNotFound(msg)) => {
            // Every node is gone; creation is safe to run again
            warn!(reason = %msg, "cluster resources missing, re-provisioning");
            update_status_provisioning(cluster, ctx).await?;
            return Ok(Action::requeue(ctx.config.pending_requeue));
        }
        Err(e) => return Err(e),
    }

    let health = ctx.provider.get_cluster_status(cluster).await?;
    let phase = if health.phase == ObservedPhase::Running {
        info!("cluster converged");
        ClusterPhase::Running
    } else {
        ClusterPhase::Updating
    };

    update_status_observed(cluster, ctx, phase, &health).await?;
    Ok(Action::requeue(ctx.config.running_requeue))
}

async fn reconcile_failed(cluster: &Cluster, ctx: &Context) -> Result<Action, Error> {
    if !ctx.config.retry_failed {
        return Ok(Action::requeue(ctx.config.failed_requeue));
    }

    let waited = failed_since(cluster)
        .and_then(|since| (Utc::now() - since).to_std().ok())
        .unwrap_or(ctx.config.failed_requeue);
    if waited < ctx.config.failed_requeue {
        return Ok(Action::requeue(ctx.config.failed_requeue - waited));
    }

    info!("retrying failed cluster");
    update_status_pending(cluster, ctx).await?;
    Ok(Action::requeue(ctx.config.pending_requeue))
}

/// When the cluster last became not-Ready
fn failed_since(cluster: &Cluster) -> Option<chrono::DateTime<Utc>> {
    cluster
        .status
        .as_ref()?
        .conditions
        .iter()
        .find(|c| c.type_ == READY_CONDITION && c.status == ConditionStatus::False)
        .map(|c| c.last_transition_time)
}

/// Handle cluster deletion
///
/// Without the finalizer there is nothing to clean up. With it, the engine
/// must confirm teardown before the finalizer is released.
async fn handle_deletion(cluster: &Cluster, ctx: &Context) -> Result<Action, Error> {
    if !cluster.has_finalizer() {
        debug!("no finalizer, allowing deletion");
        return Ok(Action::await_change());
    }

    if cluster.phase() != Some(ClusterPhase::Deleting) {
        update_status_deleting(cluster, ctx, "Deleting cluster resources").await?;
    }

    if let Err(e) = ctx.provider.delete_cluster(cluster).await {
        warn!(error = %e, "cluster teardown failed, keeping finalizer");
        update_status_deleting(cluster, ctx, &format!("failed to delete cluster: {e}")).await?;
        return Err(e);
    }

    info!("cluster resources removed, releasing finalizer");
    remove_finalizer(cluster, ctx).await?;
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Infrastructure errors are retried after a short delay; spec and state
/// conflicts wait until the object changes.
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.error_requeue)
    } else {
        Action::await_change()
    }
}

fn namespace(cluster: &Cluster) -> String {
    cluster.namespace().unwrap_or_else(|| "default".to_string())
}

/// Keep the transition time of conditions whose status and reason did not
/// change
fn carry_transition_times(
    previous: Option<&ClusterStatus>,
    mut status: ClusterStatus,
) -> ClusterStatus {
    let Some(previous) = previous else {
        return status;
    };
    for condition in &mut status.conditions {
        if let Some(old) = previous.conditions.iter().find(|c| {
            c.type_ == condition.type_
                && c.status == condition.status
                && c.reason == condition.reason
        }) {
            condition.last_transition_time = old.last_transition_time;
        }
    }
    status
}

/// Persist a status, skipping the write when nothing changed
///
/// Every status write produces a watch event that re-runs reconcile, so an
/// unchanged status must not be written.
async fn patch_status(
    cluster: &Cluster,
    ctx: &Context,
    status: ClusterStatus,
) -> Result<bool, Error> {
    let status = carry_transition_times(cluster.status.as_ref(), status);
    if cluster.status.as_ref() == Some(&status) {
        debug!("status unchanged, skipping write");
        return Ok(false);
    }
    ctx.kube
        .patch_status(&namespace(cluster), &cluster.name_any(), &status)
        .await?;
    Ok(true)
}

async fn add_finalizer(cluster: &Cluster, ctx: &Context) -> Result<(), Error> {
    ctx.kube
        .add_finalizer(&namespace(cluster), &cluster.name_any(), CLUSTER_FINALIZER)
        .await
}

async fn remove_finalizer(cluster: &Cluster, ctx: &Context) -> Result<(), Error> {
    ctx.kube
        .remove_finalizer(&namespace(cluster), &cluster.name_any(), CLUSTER_FINALIZER)
        .await
}

/// Update cluster status to Pending phase
async fn update_status_pending(cluster: &Cluster, ctx: &Context) -> Result<(), Error> {
    let condition = Condition::new(
        READY_CONDITION,
        ConditionStatus::Unknown,
        "Pending",
        "Waiting to provision cluster",
    );

    let status = ClusterStatus::with_phase(ClusterPhase::Pending)
        .message("Waiting to provision cluster")
        .condition(condition);

    if patch_status(cluster, ctx, status).await? {
        info!("updated status to Pending");
    }
    Ok(())
}

/// Update cluster status to Provisioning phase
async fn update_status_provisioning(cluster: &Cluster, ctx: &Context) -> Result<(), Error> {
    let condition = Condition::new(
        READY_CONDITION,
        ConditionStatus::False,
        "Provisioning",
        "Creating cluster network and nodes",
    );

    let status = ClusterStatus::with_phase(ClusterPhase::Provisioning)
        .message("Provisioning cluster nodes")
        .condition(condition);

    if patch_status(cluster, ctx, status).await? {
        info!("updated status to Provisioning");
    }
    Ok(())
}

/// Update cluster status to Running after a successful create
async fn update_status_created(cluster: &Cluster, ctx: &Context) -> Result<(), Error> {
    let condition = Condition::new(
        READY_CONDITION,
        ConditionStatus::True,
        "ClusterCreated",
        "All nodes started",
    );

    let status = ClusterStatus::with_phase(ClusterPhase::Running)
        .message("Cluster created")
        .readiness(true, cluster.spec.workers.count)
        .condition(condition);

    if patch_status(cluster, ctx, status).await? {
        info!("updated status to Running");
    }
    Ok(())
}

/// Record an observation from the engine under the given phase
async fn update_status_observed(
    cluster: &Cluster,
    ctx: &Context,
    phase: ClusterPhase,
    health: &ClusterHealth,
) -> Result<(), Error> {
    let condition = if health.phase == ObservedPhase::Running {
        Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            "NodesRunning",
            &health.message,
        )
    } else {
        Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            format!("Nodes{}", health.phase),
            &health.message,
        )
    };

    let status = ClusterStatus::with_phase(phase)
        .message(health.message.clone())
        .readiness(health.control_plane_ready, health.workers_ready)
        .condition(condition);

    patch_status(cluster, ctx, status).await?;
    Ok(())
}

/// Update cluster status to Failed phase
async fn update_status_failed(
    cluster: &Cluster,
    ctx: &Context,
    message: &str,
) -> Result<(), Error> {
    let condition = Condition::new(
        READY_CONDITION,
        ConditionStatus::False,
        "ProvisioningFailed",
        message,
    );

    let status = ClusterStatus::with_phase(ClusterPhase::Failed)
        .message(message.to_string())
        .condition(condition);

    if patch_status(cluster, ctx, status).await? {
        warn!(reason = message, "updated status to Failed");
    }
    Ok(())
}

/// Update cluster status to Deleting phase
async fn update_status_deleting(
    cluster: &Cluster,
    ctx: &Context,
    message: &str,
) -> Result<(), Error> {
    let condition = Condition::new(
        READY_CONDITION,
        ConditionStatus::False,
        "Deleting",
        message,
    );

    let status = cluster
        .status
        .clone()
        .unwrap_or_default()
        .phase(ClusterPhase::Deleting)
        .message(message.to_string())
        .condition(condition);

    patch_status(cluster, ctx, status).await?;
    Ok(())
}
