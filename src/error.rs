//! Error types for the PDB controller

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid or incomplete configuration, fatal at startup
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The namespace selector expression could not be parsed
    #[error("Invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Object is missing metadata: {0}")]
    MissingObjectMetadata(String),

    /// A cluster API call did not complete within the configured bound
    #[error("Cluster API call timed out after {0:?}")]
    Timeout(Duration),

    /// Optimistic-concurrency conflict reported by the cluster
    #[error("Conflict writing {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Transient failure reported by the cluster
    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    /// Short label used for error metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::InvalidSelector { .. } => "selector",
            Error::MissingObjectMetadata(_) => "metadata",
            Error::Timeout(_) => "timeout",
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::Unavailable(_) => "unavailable",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
