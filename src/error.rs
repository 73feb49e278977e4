//! Error types for the kindle operator

use thiserror::Error;

/// Main error type for kindle operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// A cluster with this name already has node containers
    #[error("cluster already exists: {0}")]
    ClusterExists(String),

    /// The cluster has no node containers (or no network) in the runtime
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// Cluster or provider configuration cannot be acted on
    #[error("invalid cluster configuration: {0}")]
    InvalidConfig(String),

    /// A memory or CPU quantity could not be parsed
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// The provider cannot serve requests (e.g. runtime unreachable)
    #[error("provider not ready: {0}")]
    ProviderNotReady(String),

    /// Infrastructure provider error, wrapping a lower-level failure with context
    #[error("provider error: {0}")]
    Provider(String),

    /// A container runtime API call failed
    #[error("runtime error during {operation}: {message}")]
    Runtime {
        /// The runtime operation that failed (e.g. "list containers")
        operation: String,
        /// The underlying error message
        message: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a provider error with the given message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create an invalid configuration error with the given message
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid quantity error with the given message
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    /// Create a runtime error for the named operation
    pub fn runtime(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Whether another reconcile attempt could succeed without a spec change
    ///
    /// Precondition and state-conflict errors need a change to the object (or
    /// an operator) before retrying makes sense; infrastructure errors may
    /// clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_)
            | Self::Provider(_)
            | Self::Runtime { .. }
            | Self::ProviderNotReady(_) => true,
            Self::Validation(_)
            | Self::ClusterExists(_)
            | Self::ClusterNotFound(_)
            | Self::InvalidConfig(_)
            | Self::InvalidQuantity(_) => false,
        }
    }
}
