//! Cluster Custom Resource Definition
//!
//! The Cluster CRD declares a Kubernetes-in-Docker cluster: a control-plane
//! node pool and a worker node pool, each backed by one container per node.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterPhase, Condition, NodePoolSpec};

/// Finalizer that gates deletion until the cluster's containers are gone
pub const CLUSTER_FINALIZER: &str = "kindle.dev/finalizer";

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kindle.dev",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    shortname = "kc",
    status = "ClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"K8s","type":"string","jsonPath":".spec.kubernetesVersion"}"#,
    printcolumn = r#"{"name":"Workers","type":"integer","jsonPath":".status.workersReady"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Kubernetes version to deploy; also the node image tag
    pub kubernetes_version: String,

    /// Control-plane node pool (at least one node)
    pub control_plane: NodePoolSpec,

    /// Worker node pool (may be empty)
    pub workers: NodePoolSpec,
}

impl ClusterSpec {
    /// Returns the total number of nodes
    pub fn total_nodes(&self) -> u32 {
        self.control_plane.count.saturating_add(self.workers.count)
    }

    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.kubernetes_version.trim().is_empty() {
            return Err(crate::Error::validation("kubernetes version is required"));
        }
        if self.control_plane.count == 0 {
            return Err(crate::Error::validation(
                "at least one control plane node is required",
            ));
        }
        self.control_plane.machine_config.validate("controlPlane")?;
        self.workers.machine_config.validate("workers")?;
        Ok(())
    }
}

/// Status for a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Current phase of the cluster lifecycle; absent until first observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ClusterPhase>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the cluster state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Whether every declared control-plane node is running
    #[serde(default)]
    pub control_plane_ready: bool,

    /// Number of running worker nodes
    #[serde(default)]
    pub workers_ready: u32,
}

impl ClusterStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: ClusterPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    /// Set the phase and return self for chaining
    pub fn phase(mut self, phase: ClusterPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the readiness counters and return self for chaining
    pub fn readiness(mut self, control_plane_ready: bool, workers_ready: u32) -> Self {
        self.control_plane_ready = control_plane_ready;
        self.workers_ready = workers_ready;
        self
    }

    /// Add a condition and return self for chaining
    pub fn condition(mut self, condition: Condition) -> Self {
        // Remove existing condition of the same type
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
        self
    }
}

impl Cluster {
    /// Current phase, or `None` when the status has never been written
    pub fn phase(&self) -> Option<ClusterPhase> {
        self.status.as_ref().and_then(|s| s.phase.clone())
    }

    /// Returns true once a deletion has been requested for this object
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if the teardown finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == CLUSTER_FINALIZER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::{ConditionStatus, MachineConfig};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    fn pool(count: u32, memory: &str) -> NodePoolSpec {
        NodePoolSpec {
            count,
            machine_config: MachineConfig {
                memory: memory.to_string(),
                cpu_count: 2,
            },
        }
    }

    fn sample_spec() -> ClusterSpec {
        ClusterSpec {
            kubernetes_version: "v1.31.0".to_string(),
            control_plane: pool(1, "2Gi"),
            workers: pool(2, "4Gi"),
        }
    }

    // =========================================================================
    // Validation Stories
    // =========================================================================

    /// Story: A typical single control-plane cluster passes validation
    #[test]
    fn story_valid_spec_passes_validation() {
        let spec = sample_spec();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.total_nodes(), 3);
    }

    /// Story: A cluster with no control plane is rejected before provisioning
    #[test]
    fn story_zero_control_plane_is_rejected() {
        let mut spec = sample_spec();
        spec.control_plane.count = 0;
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("at least one control plane"));
    }

    /// Story: Worker-less clusters are allowed
    #[test]
    fn story_zero_workers_is_allowed() {
        let mut spec = sample_spec();
        spec.workers.count = 0;
        assert!(spec.validate().is_ok());
    }

    /// Story: The Kubernetes version doubles as the node image tag, so it
    /// must be present
    #[test]
    fn story_missing_version_is_rejected() {
        let mut spec = sample_spec();
        spec.kubernetes_version = String::new();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("kubernetes version is required"));
    }

    // =========================================================================
    // Serialization Stories
    // =========================================================================

    /// Story: The persisted object uses the camelCase field names users write
    #[test]
    fn story_spec_parses_from_yaml() {
        let yaml = r#"
apiVersion: kindle.dev/v1alpha1
kind: Cluster
metadata:
  name: dev
  namespace: default
spec:
  kubernetesVersion: v1.31.0
  controlPlane:
    count: 1
    machineConfig:
      memory: 2Gi
      cpuCount: 2
  workers:
    count: 2
    machineConfig:
      memory: 4Gi
      cpuCount: 2
"#;
        let cluster: Cluster = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cluster.name_any(), "dev");
        assert_eq!(cluster.spec.workers.count, 2);
        assert_eq!(cluster.spec.control_plane.machine_config.memory, "2Gi");
        assert!(cluster.status.is_none());
        assert_eq!(cluster.phase(), None);
    }

    /// Story: An empty status serializes without a phase so the phase stays
    /// "unset" until the controller first writes it
    #[test]
    fn story_default_status_omits_phase() {
        let json = serde_json::to_value(ClusterStatus::default()).unwrap();
        assert!(json.get("phase").is_none());
        assert_eq!(json["controlPlaneReady"], false);
        assert_eq!(json["workersReady"], 0);
    }

    // =========================================================================
    // Status Builder Stories
    // =========================================================================

    #[test]
    fn story_status_builder_chains() {
        let status = ClusterStatus::with_phase(ClusterPhase::Running)
            .message("all nodes running")
            .readiness(true, 2);
        assert_eq!(status.phase, Some(ClusterPhase::Running));
        assert_eq!(status.message.as_deref(), Some("all nodes running"));
        assert!(status.control_plane_ready);
        assert_eq!(status.workers_ready, 2);
    }

    /// Story: Re-adding a condition replaces the old one instead of
    /// accumulating stale entries
    #[test]
    fn story_condition_replaces_same_type() {
        let status = ClusterStatus::default()
            .condition(Condition::new(
                "Ready",
                ConditionStatus::False,
                "Provisioning",
                "creating nodes",
            ))
            .condition(Condition::new(
                "Ready",
                ConditionStatus::True,
                "NodesRunning",
                "all nodes running",
            ));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    // =========================================================================
    // Object Helper Stories
    // =========================================================================

    #[test]
    fn story_finalizer_and_deletion_helpers() {
        let mut cluster = Cluster::new("dev", sample_spec());
        assert!(!cluster.has_finalizer());
        assert!(!cluster.is_deleting());

        cluster.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        cluster.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(cluster.has_finalizer());
        assert!(cluster.is_deleting());
    }
}
