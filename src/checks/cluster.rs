//! Control-plane and node health checks

use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::{Check, CheckContext, TestConfig, TestResult, Verdict};
use crate::error::Result;
use crate::k8s::resources::{node_is_ready, node_is_schedulable, node_name};

/// The API server answers a version request
pub struct ApiServerCheck;

#[async_trait]
impl Check for ApiServerCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let started = Instant::now();
        match ctx.cluster.server_version().await {
            Ok(version) => {
                let elapsed = started.elapsed().as_millis();
                TestResult::pass(
                    format!("API server {version} reachable"),
                    vec![format!("version request answered in {elapsed}ms")],
                )
            }
            Err(e) => TestResult::fail(format!("API server unreachable: {e}"), vec![]),
        }
    }
}

/// Every registered node reports `Ready`
pub struct NodeReadinessCheck;

#[async_trait]
impl Check for NodeReadinessCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let mut details = Vec::new();
        let outcome = inspect_nodes(ctx, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn inspect_nodes(ctx: &CheckContext, details: &mut Vec<String>) -> Result<Verdict> {
    let nodes = ctx.cluster.list_nodes().await?;
    if nodes.is_empty() {
        return Ok(Verdict::fail("no nodes registered"));
    }

    let mut not_ready = Vec::new();
    for node in &nodes {
        let name = node_name(node);
        let ready = node_is_ready(node);
        let mut line = format!("{name}: {}", if ready { "Ready" } else { "NotReady" });
        if !node_is_schedulable(node) {
            line.push_str(" (unschedulable)");
        }
        details.push(line);
        if !ready {
            not_ready.push(name);
        }
    }

    info!(nodes = nodes.len(), not_ready = not_ready.len(), "Inspected nodes");

    if not_ready.is_empty() {
        Ok(Verdict::pass(format!("all {} nodes Ready", nodes.len())))
    } else {
        Ok(Verdict::fail(format!(
            "{} of {} nodes not Ready: {}",
            not_ready.len(),
            nodes.len(),
            not_ready.join(", ")
        )))
    }
}
