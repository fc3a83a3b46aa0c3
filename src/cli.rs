//! Command line interface

use std::path::PathBuf;

use clap::Parser;

use crate::checks::Placement;
use crate::k8s::kubeconfig_path;
use crate::orchestrator::RunOptions;
use crate::registry::Selection;

/// netdiag - Kubernetes connectivity diagnostics
///
/// Creates short-lived pods and services in a test namespace, exercises the
/// cluster's network paths and writes a JSON report of the results.
#[derive(Parser, Debug, Clone)]
#[command(name = "netdiag", version, about, long_about = None)]
pub struct Cli {
    /// Namespace for all test fixtures
    #[arg(short = 'n', long, default_value = "diagnostic-test")]
    pub namespace: String,

    /// Path to a kubeconfig file (default: KUBECONFIG or in-cluster config)
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Where the pod-to-pod check schedules its client pods
    #[arg(long, value_enum, default_value_t = Placement::Both)]
    pub placement: Placement,

    /// Run every registered test; overrides --test-list and --test-group
    #[arg(long)]
    pub test_all: bool,

    /// Comma-separated test ids, or `all`
    #[arg(long, value_delimiter = ',')]
    pub test_list: Vec<String>,

    /// Named test group (takes precedence over --test-list)
    #[arg(long)]
    pub test_group: Option<String>,

    /// Never delete the namespace after the run
    #[arg(long)]
    pub keep_namespace: bool,

    /// Delete the namespace after a selective run as well
    #[arg(long, conflicts_with = "keep_namespace")]
    pub cleanup: bool,

    /// Exit with status 2 when any test fails
    #[arg(long)]
    pub fail_on_test_failure: bool,

    /// Directory for report files (default: NETDIAG_RESULTS_DIR or test_results)
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Print per-test detail lines
    #[arg(short, long)]
    pub verbose: bool,

    /// List test ids and groups, then exit
    #[arg(long)]
    pub list_tests: bool,
}

impl Cli {
    pub fn selection(&self) -> Selection {
        Selection {
            test_all: self.test_all,
            group: self
                .test_group
                .as_ref()
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty()),
            list: self
                .test_list
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    /// Run options, with `default_results_dir` used unless `--results-dir` was given
    pub fn run_options(&self, default_results_dir: PathBuf) -> RunOptions {
        RunOptions {
            namespace: self.namespace.clone(),
            kubeconfig: kubeconfig_path(self.kubeconfig.as_deref()).map(str::to_string),
            placement: self.placement,
            selection: self.selection(),
            keep_namespace: self.keep_namespace,
            force_cleanup: self.cleanup,
            verbose: self.verbose,
            results_dir: self.results_dir.clone().unwrap_or(default_results_dir),
        }
    }
}
