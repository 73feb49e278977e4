//! Controller implementations for kindle CRDs
//!
//! This module contains the reconciliation logic for the Cluster resource.
//! The controller follows the Kubernetes observe-diff-act loop and delegates
//! every infrastructure change to a [`Provider`](crate::provider::Provider).

mod cluster;

pub use cluster::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl, ReconcileConfig,
};
