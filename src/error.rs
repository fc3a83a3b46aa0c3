//! Error types for netdiag

use std::time::Duration;

use thiserror::Error;

/// Main error type for diagnostic runs
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be read or resolved
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// A bounded wait on cluster state ran out of time
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// Command execution inside a pod failed to complete
    #[error("exec error: {0}")]
    Exec(String),

    /// Invalid registry, group or settings configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The run could not be set up (namespace unreachable or uncreatable)
    #[error("setup failed: {0}")]
    Setup(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a setup error with the given message
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Create an exec error with the given message
    pub fn exec(msg: impl Into<String>) -> Self {
        Self::Exec(msg.into())
    }

    /// Create a timeout error for the named resource
    pub fn timeout(what: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            elapsed,
        }
    }

    /// True when the kube API answered with the given HTTP status
    pub fn is_api_status(&self, code: u16) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == code)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
