//! Service-path checks: ClusterIP, cross-node, NodePort and LoadBalancer

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::fixtures::{
    deploy_pod, expose, host_url, pod_url, probe_into, require_ip, schedulable_nodes,
    service_fqdn, Role,
};
use super::{Check, CheckContext, TestConfig, TestResult, Verdict};
use crate::error::{Error, Result};
use crate::k8s::resources::{
    node_internal_ip, node_name, service_node_port, ServiceKind, SERVER_RESPONSE, SERVICE_PORT,
};
use crate::k8s::wait::wait_for_load_balancer;

/// Nodes probed by the NodePort check
const MAX_NODEPORT_TARGETS: usize = 3;

/// Probe a ClusterIP service by DNS name and by cluster IP
pub struct ServiceToPodCheck;

#[async_trait]
impl Check for ServiceToPodCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let mut details = Vec::new();
        let outcome = service_to_pod(ctx, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn service_to_pod(ctx: &CheckContext, details: &mut Vec<String>) -> Result<Verdict> {
    const ID: &str = "service-to-pod";

    let server = deploy_pod(ctx, ID, Role::Server, None, details).await?;
    let svc = expose(ctx, ID, &server, ServiceKind::ClusterIp, details).await?;
    let client = deploy_pod(ctx, ID, Role::Client, None, details).await?;

    let mut failures = Vec::new();

    let by_name = host_url(&service_fqdn(ctx, &svc.name), SERVICE_PORT);
    if !probe_into(ctx, &client.name, &by_name, details).await? {
        failures.push("service DNS name");
    }

    match svc.cluster_ip.as_deref() {
        Some(ip) => {
            if !probe_into(ctx, &client.name, &host_url(ip, SERVICE_PORT), details).await? {
                failures.push("cluster IP");
            }
        }
        None => failures.push("cluster IP (not assigned)"),
    }

    if failures.is_empty() {
        Ok(Verdict::pass(format!(
            "service {} routes to its backing pod",
            svc.name
        )))
    } else {
        Ok(Verdict::fail(format!(
            "service {} unreachable via {}",
            svc.name,
            failures.join(", ")
        )))
    }
}

/// Pods pinned to two distinct nodes reach each other by pod IP in both
/// directions, and by service VIP across nodes
pub struct CrossNodeCheck;

#[async_trait]
impl Check for CrossNodeCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let mut details = Vec::new();
        let outcome = cross_node(ctx, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn cross_node(ctx: &CheckContext, details: &mut Vec<String>) -> Result<Verdict> {
    const ID: &str = "cross-node";

    let nodes = schedulable_nodes(ctx).await?;
    details.push(format!("{} ready schedulable node(s)", nodes.len()));
    let (first, second) = match nodes.as_slice() {
        [first, second, ..] => (node_name(first), node_name(second)),
        _ => {
            return Ok(Verdict::fail(format!(
                "requires at least 2 ready schedulable nodes, found {}",
                nodes.len()
            )))
        }
    };

    let a = deploy_pod(ctx, ID, Role::Server, Some(first), details).await?;
    let b = deploy_pod(ctx, ID, Role::Server, Some(second), details).await?;
    let svc_b = expose(ctx, ID, &b, ServiceKind::ClusterIp, details).await?;

    let mut failures = Vec::new();

    if !probe_into(ctx, &a.name, &pod_url(require_ip(&b)?), details).await? {
        failures.push(format!("{first} -> {second}"));
    }
    if !probe_into(ctx, &b.name, &pod_url(require_ip(&a)?), details).await? {
        failures.push(format!("{second} -> {first}"));
    }
    match svc_b.cluster_ip.as_deref() {
        Some(ip) => {
            if !probe_into(ctx, &a.name, &host_url(ip, SERVICE_PORT), details).await? {
                failures.push(format!("{first} -> service on {second}"));
            }
        }
        None => failures.push("service cluster IP not assigned".to_string()),
    }

    if failures.is_empty() {
        Ok(Verdict::pass(format!(
            "traffic flows between {first} and {second}"
        )))
    } else {
        Ok(Verdict::fail(format!(
            "cross-node paths failed: {}",
            failures.join(", ")
        )))
    }
}

/// NodePort service reached through node InternalIPs
pub struct NodePortCheck;

#[async_trait]
impl Check for NodePortCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let mut details = Vec::new();
        let outcome = node_port(ctx, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn node_port(ctx: &CheckContext, details: &mut Vec<String>) -> Result<Verdict> {
    const ID: &str = "nodeport";

    let server = deploy_pod(ctx, ID, Role::Server, None, details).await?;
    let svc = expose(ctx, ID, &server, ServiceKind::NodePort, details).await?;
    let port = match svc.node_port {
        Some(port) => port,
        None => {
            let fetched = ctx.cluster.get_service(&ctx.namespace, &svc.name).await?;
            service_node_port(&fetched).ok_or_else(|| {
                Error::exec(format!("service {} has no node port assigned", svc.name))
            })?
        }
    };
    details.push(format!("node port {port}"));

    let nodes = schedulable_nodes(ctx).await?;
    let targets: Vec<(String, String)> = nodes
        .iter()
        .filter_map(|n| node_internal_ip(n).map(|ip| (node_name(n).to_string(), ip.to_string())))
        .take(MAX_NODEPORT_TARGETS)
        .collect();
    if targets.is_empty() {
        return Ok(Verdict::fail("no ready node with an InternalIP address"));
    }

    let client = deploy_pod(ctx, ID, Role::Client, None, details).await?;

    let mut failures = Vec::new();
    for (name, ip) in &targets {
        if !probe_into(ctx, &client.name, &host_url(ip, port), details).await? {
            failures.push(name.as_str());
        }
    }

    if failures.is_empty() {
        Ok(Verdict::pass(format!(
            "node port {port} reachable on {} node(s)",
            targets.len()
        )))
    } else {
        Ok(Verdict::fail(format!(
            "node port {port} unreachable on {}",
            failures.join(", ")
        )))
    }
}

/// LoadBalancer service reached through its ingress address
pub struct LoadBalancerCheck;

#[async_trait]
impl Check for LoadBalancerCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let mut details = Vec::new();
        let outcome = load_balancer(ctx, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn load_balancer(ctx: &CheckContext, details: &mut Vec<String>) -> Result<Verdict> {
    const ID: &str = "loadbalancer";

    let server = deploy_pod(ctx, ID, Role::Server, None, details).await?;
    let svc = expose(ctx, ID, &server, ServiceKind::LoadBalancer, details).await?;

    let ingress = match wait_for_load_balancer(
        ctx.cluster.as_ref(),
        &ctx.namespace,
        &svc.name,
        ctx.settings.load_balancer,
    )
    .await
    {
        Ok((_, ingress)) => ingress,
        Err(Error::Timeout { elapsed, .. }) => {
            details.push(format!(
                "no ingress address on service {} after {}s",
                svc.name,
                elapsed.as_secs()
            ));
            return Ok(Verdict::fail(
                "load balancer ingress was never assigned; is a load balancer controller installed?",
            ));
        }
        Err(e) => return Err(e),
    };
    details.push(format!("load balancer ingress {ingress}"));

    let url = host_url(&ingress, SERVICE_PORT);
    let client = deploy_pod(ctx, ID, Role::Client, None, details).await?;
    let mut failures = Vec::new();
    if !probe_into(ctx, &client.name, &url, details).await? {
        failures.push("in-cluster");
    }

    if ctx.settings.external_probe {
        match external_probe(&url, ctx.settings.probe_timeout).await {
            Ok(true) => details.push(format!("GET {url} from runner host: ok")),
            Ok(false) => {
                details.push(format!("GET {url} from runner host: unexpected body"));
                failures.push("runner host");
            }
            Err(e) => {
                warn!(error = %e, url, "External load balancer probe failed");
                details.push(format!("GET {url} from runner host: failed ({e})"));
                failures.push("runner host");
            }
        }
    }

    info!(%ingress, failed = failures.len(), "Load balancer probes finished");

    if failures.is_empty() {
        Ok(Verdict::pass(format!("load balancer {ingress} serves traffic")))
    } else {
        Ok(Verdict::fail(format!(
            "load balancer {ingress} unreachable from {}",
            failures.join(", ")
        )))
    }
}

async fn external_probe(url: &str, timeout: Duration) -> std::result::Result<bool, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body.contains(SERVER_RESPONSE))
}
