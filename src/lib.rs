//! Kindle - CRD-driven operator for Kubernetes-in-Docker clusters
//!
//! Kindle watches `Cluster` resources and actuates them on a local container
//! runtime: one bridge network per cluster and one privileged `kindest/node`
//! container per declared node.
//!
//! # Architecture
//!
//! - The [`controller`] drives each cluster through its lifecycle phases
//!   (Pending, Provisioning, Running, Updating, Failed, Deleting) and owns the
//!   deletion finalizer.
//! - The [`provider`] turns a cluster spec into idempotent
//!   create/update/delete/status operations against the container runtime.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Cluster)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`provider`] - Docker provisioning engine and runtime abstraction
//! - [`retry`] - Exponential backoff for flaky runtime calls
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod provider;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Field manager name used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "kindle-controller";

/// Default requeue interval while a cluster is Running or Updating (seconds)
pub const DEFAULT_RUNNING_REQUEUE_SECS: u64 = 30;

/// Default requeue interval for Failed (and orphaned Deleting) clusters (seconds)
pub const DEFAULT_FAILED_REQUEUE_SECS: u64 = 300;

/// Default requeue interval after a retryable reconcile error (seconds)
pub const DEFAULT_ERROR_REQUEUE_SECS: u64 = 5;

/// Default timeout applied to each container runtime API call (seconds)
pub const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 120;
