//! Custom Resource Definitions for kindle
//!
//! This module contains the Cluster CRD and its supporting types.

mod cluster;
mod types;

pub use cluster::{Cluster, ClusterSpec, ClusterStatus, CLUSTER_FINALIZER};
pub use types::{
    ClusterPhase, Condition, ConditionStatus, MachineConfig, NodePoolSpec, NodeRole,
};
