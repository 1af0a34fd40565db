//! KVM operator error abstractions.

use thiserror::Error;

/// Reconciliation error variants.
///
/// `InvalidConfiguration` and `WrongType` indicate that the declarative input must be fixed
/// before a reconciliation pass can succeed, and as such should not be retried. `Upstream`
/// errors are transient from the perspective of the reconcilers and are retried by the
/// controller loop.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An expected object is absent from the K8s API.
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    /// A field of the cluster spec or of the runtime config is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A value arrived in an unexpected representation.
    #[error("wrong type: {0}")]
    WrongType(String),
    /// A K8s API call failed for a reason other than absence.
    #[error("upstream failure: {0:#}")]
    Upstream(anyhow::Error),
}

impl ReconcileError {
    /// Build an `InvalidConfiguration` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Check if this error should be retried by the controller loop.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::NotFound { .. })
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        Self::Upstream(err)
    }
}
