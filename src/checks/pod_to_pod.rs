//! Pod-to-pod connectivity over pod IPs, with configurable placement

use async_trait::async_trait;
use tracing::info;

use super::fixtures::{deploy_pod, pod_url, probe_into, require_ip, schedulable_nodes, Role};
use super::{Check, CheckContext, Placement, TestConfig, TestResult, Verdict};
use crate::error::Result;
use crate::k8s::resources::node_name;

const ID: &str = "pod-to-pod";

/// HTTP from a client pod to a server pod IP
///
/// `same-node` pins the client to the server's node, `cross-node` to any
/// other ready node; `both` runs the two probes and needs both to pass.
pub struct PodToPodCheck;

#[async_trait]
impl Check for PodToPodCheck {
    fn accepts_config(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &CheckContext, config: Option<&TestConfig>) -> TestResult {
        let placement = config.map(|c| c.placement).unwrap_or_default();
        let mut details = vec![format!("placement: {placement}")];
        let outcome = exercise(ctx, placement, &mut details).await;
        TestResult::from_outcome(outcome, details)
    }
}

async fn exercise(
    ctx: &CheckContext,
    placement: Placement,
    details: &mut Vec<String>,
) -> Result<Verdict> {
    let server = deploy_pod(ctx, ID, Role::Server, None, details).await?;
    let server_ip = require_ip(&server)?;
    let url = pod_url(server_ip);
    let mut failures: Vec<&str> = Vec::new();

    if matches!(placement, Placement::SameNode | Placement::Both) {
        let client = deploy_pod(ctx, ID, Role::Client, server.node.as_deref(), details).await?;
        if !probe_into(ctx, &client.name, &url, details).await? {
            failures.push("same-node");
        }
    }

    if matches!(placement, Placement::CrossNode | Placement::Both) {
        let nodes = schedulable_nodes(ctx).await?;
        let other = nodes
            .iter()
            .map(node_name)
            .find(|n| Some(*n) != server.node.as_deref());

        match other {
            Some(other) => {
                let client = deploy_pod(ctx, ID, Role::Client, Some(other), details).await?;
                if !probe_into(ctx, &client.name, &url, details).await? {
                    failures.push("cross-node");
                }
            }
            None => {
                details.push("cross-node: no second ready schedulable node".to_string());
                failures.push("cross-node (needs at least 2 ready nodes)");
            }
        }
    }

    info!(%placement, failed = failures.len(), "Pod-to-pod probes finished");

    if failures.is_empty() {
        Ok(Verdict::pass(format!(
            "server pod {server_ip} reachable ({placement})"
        )))
    } else {
        Ok(Verdict::fail(format!(
            "server pod {server_ip} unreachable: {}",
            failures.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::fixtures::testing::{context, ready_node, ready_pod};
    use crate::k8s::resources::SERVER_RESPONSE;
    use crate::k8s::{ExecOutput, MockClusterOps};
    use std::sync::{Arc, Mutex};

    fn ok_exec() -> ExecOutput {
        ExecOutput {
            stdout: SERVER_RESPONSE.to_string(),
            stderr: String::new(),
            success: true,
        }
    }

    fn mock_with_nodes(nodes: Vec<&'static str>, pinned: Arc<Mutex<Vec<Option<String>>>>) -> MockClusterOps {
        let mut mock = MockClusterOps::new();
        mock.expect_create_pod().returning(move |_, pod| {
            let node = pod.spec.as_ref().and_then(|s| s.node_name.clone());
            pinned.lock().unwrap().push(node);
            Ok(pod.clone())
        });
        mock.expect_get_pod()
            .returning(|_, name| Ok(ready_pod(name, "10.0.0.5", "worker-1")));
        mock.expect_list_nodes().returning(move || {
            Ok(nodes
                .iter()
                .enumerate()
                .map(|(i, n)| ready_node(n, &format!("192.168.0.{}", i + 1)))
                .collect())
        });
        mock
    }

    #[tokio::test]
    async fn test_both_placements_pass() {
        let pinned = Arc::new(Mutex::new(Vec::new()));
        let mut mock = mock_with_nodes(vec!["worker-1", "worker-2"], pinned.clone());
        mock.expect_exec().times(2).returning(|_, _, _| Ok(ok_exec()));

        let ctx = context(mock);
        let config = TestConfig {
            placement: Placement::Both,
        };
        let result = PodToPodCheck.run(&ctx, Some(&config)).await;

        assert!(result.success, "{:?}", result);
        let pinned = pinned.lock().unwrap();
        // server unpinned, same-node client on worker-1, cross-node client on worker-2
        assert_eq!(
            *pinned,
            vec![
                None,
                Some("worker-1".to_string()),
                Some("worker-2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_cross_node_needs_second_node() {
        let pinned = Arc::new(Mutex::new(Vec::new()));
        let mut mock = mock_with_nodes(vec!["worker-1"], pinned);
        mock.expect_exec().never();

        let ctx = context(mock);
        let config = TestConfig {
            placement: Placement::CrossNode,
        };
        let result = PodToPodCheck.run(&ctx, Some(&config)).await;

        assert!(!result.success);
        assert!(result.message.contains("needs at least 2 ready nodes"));
        assert_eq!(result.details[0], "placement: cross-node");
    }

    #[tokio::test]
    async fn test_same_node_unreachable() {
        let pinned = Arc::new(Mutex::new(Vec::new()));
        let mut mock = mock_with_nodes(vec!["worker-1"], pinned);
        mock.expect_exec().returning(|_, _, _| {
            Ok(ExecOutput {
                stdout: String::new(),
                stderr: "wget: download timed out".to_string(),
                success: false,
            })
        });

        let ctx = context(mock);
        let config = TestConfig {
            placement: Placement::SameNode,
        };
        let result = PodToPodCheck.run(&ctx, Some(&config)).await;

        assert!(!result.success);
        assert!(result.message.contains("same-node"));
        assert!(result
            .details
            .iter()
            .any(|d| d.contains("download timed out")));
    }

    #[tokio::test]
    async fn test_cluster_error_becomes_failed_result() {
        let mut mock = MockClusterOps::new();
        mock.expect_create_pod()
            .returning(|_, _| Err(crate::error::Error::exec("admission webhook denied")));

        let ctx = context(mock);
        let result = PodToPodCheck.run(&ctx, None).await;

        assert!(!result.success);
        assert!(result.message.starts_with("check error:"));
        assert_eq!(result.details, vec!["placement: both".to_string()]);
    }
}
