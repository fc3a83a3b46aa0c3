//! Shared fixture plumbing for the checks: deploy a pod, expose it, probe it.

use std::time::Instant;

use k8s_openapi::api::core::v1::Node;
use tracing::debug;

use super::CheckContext;
use crate::error::{Error, Result};
use crate::k8s::resources::{
    self, client_pod, fixture_labels, fixture_name, fixture_selector, node_is_ready,
    node_is_schedulable, pod_ip, pod_node, server_pod, ServiceKind, SERVER_RESPONSE,
};
use crate::k8s::wait::{wait_for_endpoints, wait_for_pod_ready};

/// A running fixture pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PodFixture {
    pub name: String,
    pub ip: String,
    pub node: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Role {
    Server,
    Client,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

/// Create a pod and wait until it is ready
pub(crate) async fn deploy_pod(
    ctx: &CheckContext,
    check_id: &str,
    role: Role,
    node: Option<&str>,
    details: &mut Vec<String>,
) -> Result<PodFixture> {
    let name = fixture_name(check_id, role.as_str());
    let labels = fixture_labels(check_id, &ctx.run_id, &name);
    let image = &ctx.settings.image;
    let pod = match role {
        Role::Server => server_pod(&name, labels, image, node),
        Role::Client => client_pod(&name, labels, image, node),
    };

    ctx.cluster.create_pod(&ctx.namespace, &pod).await?;
    let ready =
        wait_for_pod_ready(ctx.cluster.as_ref(), &ctx.namespace, &name, ctx.settings.pod_ready)
            .await?;

    let fixture = PodFixture {
        ip: pod_ip(&ready).unwrap_or_default().to_string(),
        node: pod_node(&ready).map(str::to_string),
        name,
    };
    details.push(format!(
        "{} pod {} ready at {} on node {}",
        role.as_str(),
        fixture.name,
        fixture.ip,
        fixture.node.as_deref().unwrap_or("unknown")
    ));
    Ok(fixture)
}

/// A created service fronting one server fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceFixture {
    pub name: String,
    pub cluster_ip: Option<String>,
    pub node_port: Option<i32>,
}

/// Create a service of `kind` selecting exactly the given server pod and
/// wait until it has a ready endpoint
pub(crate) async fn expose(
    ctx: &CheckContext,
    check_id: &str,
    server: &PodFixture,
    kind: ServiceKind,
    details: &mut Vec<String>,
) -> Result<ServiceFixture> {
    let name = fixture_name(check_id, "svc");
    let labels = fixture_labels(check_id, &ctx.run_id, &name);
    let svc = resources::service(&name, labels, Some(fixture_selector(&server.name)), kind);

    let created = ctx.cluster.create_service(&ctx.namespace, &svc).await?;
    let fixture = ServiceFixture {
        cluster_ip: resources::service_cluster_ip(&created).map(str::to_string),
        node_port: resources::service_node_port(&created),
        name,
    };
    details.push(format!(
        "service {} ({:?}) cluster IP {}",
        fixture.name,
        kind,
        fixture.cluster_ip.as_deref().unwrap_or("none")
    ));

    let ready = wait_for_endpoints(
        ctx.cluster.as_ref(),
        &ctx.namespace,
        &fixture.name,
        ctx.settings.pod_ready,
    )
    .await?;
    details.push(format!(
        "service {} has {} ready endpoint(s)",
        fixture.name, ready
    ));
    Ok(fixture)
}

/// In-cluster DNS name of a service in the test namespace
pub(crate) fn service_fqdn(ctx: &CheckContext, service: &str) -> String {
    format!(
        "{}.{}.svc.{}",
        service, ctx.namespace, ctx.settings.cluster_domain
    )
}

/// Ready nodes that accept ordinary workloads, in API order
pub(crate) async fn schedulable_nodes(ctx: &CheckContext) -> Result<Vec<Node>> {
    Ok(ctx
        .cluster
        .list_nodes()
        .await?
        .into_iter()
        .filter(|n| node_is_ready(n) && node_is_schedulable(n))
        .collect())
}

/// Outcome of an HTTP probe run from inside a client pod
#[derive(Debug, Clone)]
pub(crate) struct ProbeOutcome {
    pub reachable: bool,
    pub detail: String,
}

/// Fetch `url` from `client_pod` and expect the server fixture's body
pub(crate) async fn http_probe(
    ctx: &CheckContext,
    client_pod: &str,
    url: &str,
) -> Result<ProbeOutcome> {
    let timeout = ctx.settings.probe_timeout.as_secs().max(1).to_string();
    let command = vec![
        "wget".to_string(),
        "-q".to_string(),
        "-O".to_string(),
        "-".to_string(),
        "-T".to_string(),
        timeout,
        url.to_string(),
    ];

    let start = Instant::now();
    let output = ctx.cluster.exec(&ctx.namespace, client_pod, command).await?;
    let elapsed = start.elapsed();

    let reachable = output.success && output.stdout.contains(SERVER_RESPONSE);
    let detail = if reachable {
        format!("GET {url} from {client_pod}: ok in {}ms", elapsed.as_millis())
    } else {
        let reason = match output.stderr.trim() {
            "" => "no response",
            err => err,
        };
        format!("GET {url} from {client_pod}: failed ({reason})")
    };
    debug!(url, client_pod, reachable, "HTTP probe finished");

    Ok(ProbeOutcome { reachable, detail })
}

/// Probe and record the detail line
pub(crate) async fn probe_into(
    ctx: &CheckContext,
    client_pod: &str,
    url: &str,
    details: &mut Vec<String>,
) -> Result<bool> {
    let outcome = http_probe(ctx, client_pod, url).await?;
    details.push(outcome.detail);
    Ok(outcome.reachable)
}

pub(crate) fn pod_url(ip: &str) -> String {
    if ip.contains(':') {
        format!("http://[{}]:{}/", ip, resources::SERVER_PORT)
    } else {
        format!("http://{}:{}/", ip, resources::SERVER_PORT)
    }
}

pub(crate) fn host_url(host: &str, port: i32) -> String {
    if host.contains(':') {
        format!("http://[{host}]:{port}/")
    } else {
        format!("http://{host}:{port}/")
    }
}

/// Fail fast with a clear message when a fixture came back without an IP
pub(crate) fn require_ip(fixture: &PodFixture) -> Result<&str> {
    if fixture.ip.is_empty() {
        Err(Error::exec(format!("pod {} has no IP", fixture.name)))
    } else {
        Ok(&fixture.ip)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{context, ready_pod};
    use super::*;
    use crate::k8s::{ExecOutput, MockClusterOps};

    #[test]
    fn test_urls() {
        assert_eq!(pod_url("10.0.0.5"), "http://10.0.0.5:8080/");
        assert_eq!(pod_url("fd00::5"), "http://[fd00::5]:8080/");
        assert_eq!(host_url("192.168.1.2", 30080), "http://192.168.1.2:30080/");
    }

    #[tokio::test]
    async fn test_deploy_pod_records_placement() {
        let mut mock = MockClusterOps::new();
        mock.expect_create_pod().returning(|_, pod| Ok(pod.clone()));
        mock.expect_get_pod()
            .returning(|_, name| Ok(ready_pod(name, "10.0.0.5", "worker-1")));

        let ctx = context(mock);
        let mut details = Vec::new();
        let fixture = deploy_pod(&ctx, "pod-to-pod", Role::Server, None, &mut details)
            .await
            .unwrap();

        assert!(fixture.name.starts_with("nd-pod-to-pod-server-"));
        assert_eq!(fixture.ip, "10.0.0.5");
        assert_eq!(fixture.node.as_deref(), Some("worker-1"));
        assert_eq!(details.len(), 1);
        assert!(details[0].contains("worker-1"));
    }

    #[tokio::test]
    async fn test_probe_requires_server_body() {
        let mut mock = MockClusterOps::new();
        mock.expect_exec()
            .withf(|_, pod, cmd| pod == "client" && cmd[0] == "wget")
            .returning(|_, _, _| {
                Ok(ExecOutput {
                    stdout: "some other server\n".to_string(),
                    stderr: String::new(),
                    success: true,
                })
            });

        let ctx = context(mock);
        let outcome = http_probe(&ctx, "client", "http://10.0.0.5:8080/")
            .await
            .unwrap();
        assert!(!outcome.reachable);
        assert!(outcome.detail.contains("failed (no response)"));
    }

    #[tokio::test]
    async fn test_probe_success() {
        let mut mock = MockClusterOps::new();
        mock.expect_exec().returning(|_, _, _| {
            Ok(ExecOutput {
                stdout: format!("{SERVER_RESPONSE}\n"),
                stderr: String::new(),
                success: true,
            })
        });

        let ctx = context(mock);
        let mut details = Vec::new();
        assert!(probe_into(&ctx, "client", "http://10.0.0.5:8080/", &mut details)
            .await
            .unwrap());
        assert!(details[0].contains(": ok in "));
    }
}
