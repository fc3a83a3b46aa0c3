//! In-cluster DNS resolution

use async_trait::async_trait;

use super::fixtures::{deploy_pod, service_fqdn, Role};
use super::{Check, CheckContext, TestConfig, TestResult, Verdict};
use crate::error::{Error, Result};
use crate::k8s::resources::{fixture_labels, fixture_name, service, ServiceKind};
use crate::k8s::wait::{poll_until, Step};

const ID: &str = "dns";

/// Resolve the API server service and a freshly created service from a pod
///
/// New service records take a moment to appear, so each name is retried
/// until it resolves or the DNS timeout elapses.
pub struct DnsCheck;

#[async_trait]
impl Check for DnsCheck {
    async fn run(&self, ctx: &CheckContext, _config: Option<&TestConfig>) -> TestResult {
        let mut details = Vec::new();
        let outcome = exercise(ctx, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn exercise(ctx: &CheckContext, details: &mut Vec<String>) -> Result<Verdict> {
    // Selector-less service: gets a cluster IP and a DNS record, no backends needed
    let probe_name = fixture_name(ID, "probe");
    let probe = service(
        &probe_name,
        fixture_labels(ID, &ctx.run_id, &probe_name),
        None,
        ServiceKind::ClusterIp,
    );
    ctx.cluster.create_service(&ctx.namespace, &probe).await?;
    details.push(format!("created probe service {probe_name}"));

    let client = deploy_pod(ctx, ID, Role::Client, None, details).await?;

    let targets = [
        format!("kubernetes.default.svc.{}", ctx.settings.cluster_domain),
        service_fqdn(ctx, &probe_name),
    ];

    let mut unresolved = Vec::new();
    for target in &targets {
        match resolve(ctx, &client.name, target).await {
            Ok(addrs) => details.push(format!("{target} -> {}", addrs.join(", "))),
            Err(Error::Timeout { elapsed, .. }) => {
                details.push(format!(
                    "{target} unresolved after {}s",
                    elapsed.as_secs()
                ));
                unresolved.push(target.as_str());
            }
            Err(e) => return Err(e),
        }
    }

    if unresolved.is_empty() {
        Ok(Verdict::pass(format!("resolved {} names", targets.len())))
    } else {
        Ok(Verdict::fail(format!(
            "DNS query unresolved: {}",
            unresolved.join(", ")
        )))
    }
}

async fn resolve(ctx: &CheckContext, client: &str, target: &str) -> Result<Vec<String>> {
    let what = format!("DNS answer for {target}");
    poll_until(&what, ctx.settings.dns, move || async move {
        let output = ctx
            .cluster
            .exec(
                &ctx.namespace,
                client,
                vec!["nslookup".to_string(), target.to_string()],
            )
            .await?;
        let addrs = parse_nslookup(&output.stdout);
        Ok(if output.success && !addrs.is_empty() {
            Step::Ready(addrs)
        } else {
            Step::Pending
        })
    })
    .await
}

/// Extract the answer addresses from `nslookup` output
///
/// Lines before the first `Name:` describe the resolver itself and are
/// skipped. Handles both the `Address: <ip>` and the older busybox
/// `Address 1: <ip> <name>` forms.
pub fn parse_nslookup(output: &str) -> Vec<String> {
    let mut in_answer = false;
    let mut addrs = Vec::new();

    for line in output.lines().map(str::trim) {
        if line.starts_with("Name:") {
            in_answer = true;
            continue;
        }
        if !in_answer || !line.starts_with("Address") {
            continue;
        }
        if let Some(addr) = line
            .split_once(':')
            .and_then(|(_, rest)| rest.split_whitespace().next())
        {
            addrs.push(addr.to_string());
        }
    }

    addrs
}
