//! Classification of live node containers into an observed cluster state

use std::fmt;

use super::runtime::ContainerInfo;
use crate::crd::{ClusterSpec, NodeRole};

/// What the runtime shows for a cluster, independent of its lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservedPhase {
    /// No node containers exist
    NotFound,
    /// At least one node container exists but is not running
    Starting,
    /// Every container runs and the counts match the spec
    Running,
    /// Every container runs but the counts differ from the spec
    Pending,
}

impl fmt::Display for ObservedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NotFound"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Pending => write!(f, "Pending"),
        }
    }
}

/// Result of a cluster status query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterHealth {
    /// Observed phase
    pub phase: ObservedPhase,
    /// Running control-plane containers equal the declared count
    pub control_plane_ready: bool,
    /// Running control-plane containers
    pub control_plane_running: u32,
    /// Running worker containers
    pub workers_ready: u32,
    /// Human-readable summary
    pub message: String,
}

impl ClusterHealth {
    /// Classify the containers labeled with a cluster against its spec
    pub fn from_containers(spec: &ClusterSpec, containers: &[ContainerInfo]) -> Self {
        let mut control_plane_running = 0u32;
        let mut workers_ready = 0u32;
        let mut all_running = true;

        for container in containers {
            if !container.running {
                all_running = false;
                continue;
            }
            match container.role() {
                Some(NodeRole::ControlPlane) => control_plane_running += 1,
                Some(NodeRole::Worker) => workers_ready += 1,
                None => {}
            }
        }

        let control_plane_ready = control_plane_running == spec.control_plane.count;
        let phase = if containers.is_empty() {
            ObservedPhase::NotFound
        } else if !all_running {
            ObservedPhase::Starting
        } else if control_plane_ready && workers_ready == spec.workers.count {
            ObservedPhase::Running
        } else {
            ObservedPhase::Pending
        };

        let message = match phase {
            ObservedPhase::NotFound => "no node containers found".to_string(),
            _ => format!(
                "{}/{} control plane and {}/{} worker nodes running",
                control_plane_running,
                spec.control_plane.count,
                workers_ready,
                spec.workers.count
            ),
        };

        Self {
            phase,
            control_plane_ready,
            control_plane_running,
            workers_ready,
            message,
        }
    }
}
