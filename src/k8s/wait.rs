//! Bounded waits on eventually-consistent cluster state
//!
//! Every wait polls through [`ClusterOps`] until the condition holds or the
//! timeout elapses. Transient API errors while polling are logged and retried
//! within the same deadline.

use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Service};
use tokio::time::Instant;
use tracing::debug;

use super::client::ClusterOps;
use super::resources::{pod_ip, pod_is_ready, pod_phase, ready_endpoint_count, service_lb_ingress};
use crate::error::{Error, Result};

/// Poll settings shared by all waits
#[derive(Debug, Clone, Copy)]
pub struct WaitParams {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitParams {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Result of a single poll attempt
pub(crate) enum Step<T> {
    Ready(T),
    Pending,
    /// The condition can no longer be met
    Abort(Error),
}

/// Poll `probe` until it is ready, or fail with a timeout naming `what`
pub(crate) async fn poll_until<T, F, Fut>(what: &str, params: WaitParams, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Step<T>>>,
{
    let start = Instant::now();
    loop {
        match probe().await {
            Ok(Step::Ready(value)) => return Ok(value),
            Ok(Step::Pending) => {}
            Ok(Step::Abort(e)) => return Err(e),
            Err(e) => debug!(what, error = %e, "Poll attempt failed"),
        }

        let elapsed = start.elapsed();
        if elapsed >= params.timeout {
            return Err(Error::timeout(what, elapsed));
        }
        let remaining = params.timeout - elapsed;
        tokio::time::sleep(params.interval.min(remaining)).await;
    }
}

/// Wait until a pod is ready and has an IP
///
/// A pod that reaches `Failed` or `Succeeded` will never become ready, so
/// the wait stops early with an error.
pub async fn wait_for_pod_ready(
    cluster: &dyn ClusterOps,
    namespace: &str,
    name: &str,
    params: WaitParams,
) -> Result<Pod> {
    let what = format!("pod {namespace}/{name} to become ready");
    poll_until(&what, params, move || async move {
        let pod = cluster.get_pod(namespace, name).await?;
        let phase = pod_phase(&pod).map(str::to_string);
        Ok(match phase.as_deref() {
            Some(phase @ ("Failed" | "Succeeded")) => Step::Abort(Error::exec(format!(
                "pod {namespace}/{name} terminated with phase {phase}"
            ))),
            _ if pod_is_ready(&pod) && pod_ip(&pod).is_some() => Step::Ready(pod),
            _ => Step::Pending,
        })
    })
    .await
}

/// Wait until a service has at least one ready endpoint address
pub async fn wait_for_endpoints(
    cluster: &dyn ClusterOps,
    namespace: &str,
    service: &str,
    params: WaitParams,
) -> Result<usize> {
    let what = format!("endpoints of service {namespace}/{service}");
    poll_until(&what, params, move || async move {
        let endpoints = cluster.get_endpoints(namespace, service).await?;
        let ready = ready_endpoint_count(&endpoints);
        Ok(if ready > 0 { Step::Ready(ready) } else { Step::Pending })
    })
    .await
}

/// Wait until a LoadBalancer service is assigned an ingress address
pub async fn wait_for_load_balancer(
    cluster: &dyn ClusterOps,
    namespace: &str,
    service: &str,
    params: WaitParams,
) -> Result<(Service, String)> {
    let what = format!("load balancer ingress for service {namespace}/{service}");
    poll_until(&what, params, move || async move {
        let svc = cluster.get_service(namespace, service).await?;
        Ok(match service_lb_ingress(&svc) {
            Some(ingress) => Step::Ready((svc, ingress)),
            None => Step::Pending,
        })
    })
    .await
}
