use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Runtime tunables, read from `NETDIAG_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default = "default_test_image")]
    pub test_image: String,

    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    #[serde(default = "default_pod_ready_timeout_secs")]
    pub pod_ready_timeout_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_dns_timeout_secs")]
    pub dns_timeout_secs: u64,

    #[serde(default = "default_lb_timeout_secs")]
    pub lb_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Also probe LoadBalancer ingress from the machine running netdiag
    #[serde(default)]
    pub external_probe: bool,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("test_results")
}

fn default_test_image() -> String {
    "busybox:1.36".to_string()
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

fn default_pod_ready_timeout_secs() -> u64 {
    120
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_dns_timeout_secs() -> u64 {
    60
}

fn default_lb_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("NETDIAG").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn pod_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_ready_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Client-side bound on one exec session: the in-pod probe timeout plus
    /// room for the attach handshake
    pub fn exec_timeout(&self) -> Duration {
        self.probe_timeout() + Duration::from_secs(10)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn lb_timeout(&self) -> Duration {
        Duration::from_secs(self.lb_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            test_image: default_test_image(),
            cluster_domain: default_cluster_domain(),
            pod_ready_timeout_secs: default_pod_ready_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            dns_timeout_secs: default_dns_timeout_secs(),
            lb_timeout_secs: default_lb_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            external_probe: false,
            log_format: default_log_format(),
        }
    }
}
