//! Kubernetes client wrapper for netdiag

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, AttachParams, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};

/// Outcome of a namespace create request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceOutcome {
    Created,
    AlreadyExists,
}

/// Captured output of a command run inside a pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// The exec status channel reported `Success`
    pub success: bool,
}

/// Cluster operations used by the lifecycle manager and the checks
///
/// This trait allows mocking the Kubernetes API in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// API server git version
    async fn server_version(&self) -> Result<String>;

    /// Create a namespace; an existing namespace is reported, not an error
    async fn create_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<NamespaceOutcome>;

    /// Request namespace deletion without waiting for termination
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Run a command in the first container of a pod and collect its output
    async fn exec(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<ExecOutput>;
}

/// Wrapper around kube::Client implementing [`ClusterOps`]
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    exec_timeout: Duration,
}

/// Upper bound on one exec session unless overridden
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// An explicit kubeconfig path, with blank values meaning "infer"
pub fn kubeconfig_path(kubeconfig: Option<&str>) -> Option<&str> {
    kubeconfig.map(str::trim).filter(|p| !p.is_empty())
}

impl K8sClient {
    /// Create a client from an explicit kubeconfig path, or infer one
    /// (KUBECONFIG, default context, in-cluster) when no path is given
    #[instrument(skip_all)]
    pub async fn new(kubeconfig: Option<&str>) -> Result<Self> {
        let config = match kubeconfig_path(kubeconfig) {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::Kubeconfig(format!("{path}: {e}")))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::Kubeconfig(format!("{path}: {e}")))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::Kubeconfig(e.to_string()))?,
        };
        let client = Client::try_from(config)?;

        info!("Kubernetes client configured");

        Ok(Self {
            client,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        })
    }

    /// Bound every exec session, including a stalled attach stream
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterOps for K8sClient {
    async fn server_version(&self) -> Result<String> {
        let version = self.client.apiserver_version().await?;
        debug!(version = %version.git_version, "API server reachable");
        Ok(version.git_version)
    }

    #[instrument(skip(self, labels))]
    async fn create_namespace(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<NamespaceOutcome> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = %name, "Created namespace");
                Ok(NamespaceOutcome::Created)
            }
            Err(e) => {
                let e = Error::from(e);
                if e.is_api_status(409) {
                    info!(namespace = %name, "Namespace already exists");
                    Ok(NamespaceOutcome::AlreadyExists)
                } else {
                    Err(e)
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                info!(namespace = %name, "Namespace deletion requested");
                Ok(())
            }
            Err(e) => {
                let e = Error::from(e);
                if e.is_api_status(404) {
                    debug!(namespace = %name, "Namespace already gone");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    #[instrument(skip(self, pod), fields(pod_name = %pod.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let created = self.pods(namespace).create(&PostParams::default(), pod).await?;
        info!("Created pod");
        Ok(created)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        Ok(self.pods(namespace).get(name).await?)
    }

    #[instrument(skip(self))]
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        info!(name, "Deleted pod");
        Ok(())
    }

    #[instrument(skip(self, service), fields(service_name = %service.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let created = self
            .services(namespace)
            .create(&PostParams::default(), service)
            .await?;
        info!("Created service");
        Ok(created)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        Ok(self.services(namespace).get(name).await?)
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints> {
        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        Ok(endpoints.get(name).await?)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }

    #[instrument(skip(self, command))]
    async fn exec(&self, namespace: &str, pod: &str, command: Vec<String>) -> Result<ExecOutput> {
        let what = format!("exec in pod {namespace}/{pod}");
        bounded(&what, self.exec_timeout, self.exec_session(namespace, pod, command)).await
    }
}

impl K8sClient {
    async fn exec_session(
        &self,
        namespace: &str,
        pod: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput> {
        let ap = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self.pods(namespace).exec(pod, command, &ap).await?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::try_join!(read_all(stdout), read_all(stderr))
            .map_err(|e| Error::exec(format!("reading output from {pod}: {e}")))?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| Error::exec(format!("exec session in {pod}: {e}")))?;

        let success = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .map(|s| s == "Success")
            .unwrap_or(false);

        debug!(pod, success, "Exec finished");

        Ok(ExecOutput {
            stdout,
            stderr,
            success,
        })
    }
}

/// Run `fut` to completion or fail with a timeout naming `what`
async fn bounded<T>(what: &str, timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(what, timeout)),
    }
}

async fn read_all<R>(reader: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}
