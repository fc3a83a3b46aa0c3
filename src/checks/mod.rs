//! Connectivity checks
//!
//! Each check exercises one network path inside the cluster and reports a
//! [`TestResult`]. Checks never return errors: a cluster failure while
//! exercising the path becomes a failed result with a descriptive message.

mod cluster;
mod dns;
pub(crate) mod fixtures;
mod pod_to_pod;
mod services;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::k8s::wait::WaitParams;
use crate::k8s::ClusterOps;

pub use cluster::{ApiServerCheck, NodeReadinessCheck};
pub use dns::{parse_nslookup, DnsCheck};
pub use pod_to_pod::PodToPodCheck;
pub use services::{CrossNodeCheck, LoadBalancerCheck, NodePortCheck, ServiceToPodCheck};

/// Outcome of one check invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    pub details: Vec<String>,
}

impl TestResult {
    pub fn pass(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details,
        }
    }

    pub fn fail(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details,
        }
    }

    /// Fold the outcome of a check body into a result
    ///
    /// An `Err` means the check could not complete; it is still a failed
    /// result and keeps the details gathered before the error.
    pub fn from_outcome(outcome: Result<Verdict>, details: Vec<String>) -> Self {
        match outcome {
            Ok(v) => Self {
                success: v.success,
                message: v.message,
                details,
            },
            Err(e) => Self::fail(format!("check error: {e}"), details),
        }
    }
}

/// Pass/fail decision of a check body that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub success: bool,
    pub message: String,
}

impl Verdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Where paired workloads are scheduled for the pod-to-pod check
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Placement {
    SameNode,
    CrossNode,
    #[default]
    Both,
}

/// Parameters for checks that accept configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestConfig {
    pub placement: Placement,
}

/// Timeouts and images the checks run with
#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub image: String,
    pub cluster_domain: String,
    pub pod_ready: WaitParams,
    pub probe_timeout: Duration,
    pub dns: WaitParams,
    pub load_balancer: WaitParams,
    pub external_probe: bool,
}

impl From<&Config> for CheckSettings {
    fn from(config: &Config) -> Self {
        let interval = config.poll_interval();
        Self {
            image: config.test_image.clone(),
            cluster_domain: config.cluster_domain.clone(),
            pod_ready: WaitParams::new(config.pod_ready_timeout(), interval),
            probe_timeout: config.probe_timeout(),
            dns: WaitParams::new(config.dns_timeout(), interval),
            load_balancer: WaitParams::new(config.lb_timeout(), interval),
            external_probe: config.external_probe,
        }
    }
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Everything a check needs to reach the cluster for one run
#[derive(Clone)]
pub struct CheckContext {
    pub cluster: Arc<dyn ClusterOps>,
    pub namespace: String,
    /// Identifier shared by all fixtures of one run
    pub run_id: String,
    pub settings: CheckSettings,
    pub cancel: CancellationToken,
}

/// A runnable connectivity check
#[async_trait]
pub trait Check: Send + Sync {
    /// Whether `run` reads the [`TestConfig`]; others are always given `None`
    fn accepts_config(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &CheckContext, config: Option<&TestConfig>) -> TestResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::str::FromStr;

    #[test]
    fn test_placement_names() {
        assert_eq!(Placement::SameNode.to_string(), "same-node");
        assert_eq!(Placement::CrossNode.to_string(), "cross-node");
        assert_eq!(Placement::Both.to_string(), "both");
        assert_eq!(Placement::from_str("cross-node").unwrap(), Placement::CrossNode);
        assert!(Placement::from_str("elsewhere").is_err());
        assert_eq!(Placement::default(), Placement::Both);
    }

    #[test]
    fn test_outcome_error_keeps_details() {
        let details = vec!["server pod nd-x scheduled".to_string()];
        let result = TestResult::from_outcome(Err(Error::exec("stream closed")), details.clone());
        assert!(!result.success);
        assert_eq!(result.message, "check error: exec error: stream closed");
        assert_eq!(result.details, details);
    }

    #[test]
    fn test_outcome_verdict() {
        let result = TestResult::from_outcome(Ok(Verdict::fail("no route")), vec![]);
        assert!(!result.success);
        assert_eq!(result.message, "no route");

        let result = TestResult::from_outcome(Ok(Verdict::pass("reachable")), vec![]);
        assert!(result.success);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = CheckSettings::from(&Config::default());
        assert_eq!(settings.pod_ready.timeout, Duration::from_secs(120));
        assert_eq!(settings.dns.interval, Duration::from_millis(2000));
        assert_eq!(settings.image, "busybox:1.36");
    }
}
