//! Test namespace lifecycle
//!
//! Owns creation of the shared test namespace before a run and its optional
//! removal afterwards.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::k8s::resources::namespace_labels;
use crate::k8s::{ClusterOps, NamespaceOutcome};

/// Whether the namespace is removed at the end of a run
///
/// Only full runs clean up by default; selective runs keep their fixtures
/// for the next iteration unless `force` is given. `keep_namespace` always
/// wins.
pub fn should_cleanup(test_all: bool, keep_namespace: bool, force: bool) -> bool {
    !keep_namespace && (test_all || force)
}

/// Creates and tears down the shared test namespace
#[derive(Clone)]
pub struct LifecycleManager {
    cluster: Arc<dyn ClusterOps>,
    namespace: String,
}

impl LifecycleManager {
    pub fn new(cluster: Arc<dyn ClusterOps>, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Ensure the test namespace exists
    ///
    /// An existing namespace is reused as is. Any other failure is fatal to
    /// the run and is returned as [`Error::Setup`].
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn ensure_namespace(&self) -> Result<NamespaceOutcome> {
        let outcome = self
            .cluster
            .create_namespace(&self.namespace, namespace_labels())
            .await
            .map_err(|e| {
                Error::setup(format!("cannot create namespace {}: {}", self.namespace, e))
            })?;

        match outcome {
            NamespaceOutcome::Created => info!("Test namespace created"),
            NamespaceOutcome::AlreadyExists => info!("Reusing existing test namespace"),
        }
        Ok(outcome)
    }

    /// Request deletion of the test namespace
    ///
    /// Returns a warning message instead of failing; the cluster finishes
    /// terminating the namespace on its own after the request is accepted.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn cleanup(&self) -> Option<String> {
        match self.cluster.delete_namespace(&self.namespace).await {
            Ok(()) => {
                info!("Test namespace deletion requested");
                None
            }
            Err(e) => {
                let msg = format!("failed to delete namespace {}: {}", self.namespace, e);
                warn!(error = %e, "Namespace cleanup failed");
                Some(msg)
            }
        }
    }
}
