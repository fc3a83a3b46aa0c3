//! Drives one diagnostic run
//!
//! A run resolves the selected checks, makes sure the test namespace exists,
//! executes the checks one at a time in resolution order, aggregates the
//! results, optionally removes the namespace and persists the report.
//! Only namespace setup can abort a run. Individual check failures are
//! recorded and the sequence continues; cancellation stops it before the
//! next check starts.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::checks::{CheckContext, CheckSettings, Placement, TestConfig};
use crate::error::Result;
use crate::executor::{execute, TimedTestResult};
use crate::k8s::ClusterOps;
use crate::lifecycle::{should_cleanup, LifecycleManager};
use crate::registry::{Selection, TestRegistry};
use crate::report::{Report, RunMetadata};

/// Exit code for a cancelled run
pub const EXIT_CANCELLED: i32 = 130;
/// Exit code when `--fail-on-test-failure` is set and a test failed
pub const EXIT_TEST_FAILURE: i32 = 2;
/// Exit code for setup or configuration failures
pub const EXIT_SETUP_FAILURE: i32 = 1;

/// Everything the operator chose for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub namespace: String,
    pub kubeconfig: Option<String>,
    pub placement: Placement,
    pub selection: Selection,
    pub keep_namespace: bool,
    pub force_cleanup: bool,
    pub verbose: bool,
    pub results_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            namespace: "diagnostic-test".to_string(),
            kubeconfig: None,
            placement: Placement::default(),
            selection: Selection::default(),
            keep_namespace: false,
            force_cleanup: false,
            verbose: false,
            results_dir: PathBuf::from("test_results"),
        }
    }
}

/// Pass/fail tally of a run, names in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub passed_names: Vec<String>,
    pub failed_names: Vec<String>,
}

impl RunSummary {
    /// Single pass over the index-aligned names and results
    pub fn from_results(names: &[String], results: &[TimedTestResult]) -> Self {
        let mut summary = Self::default();
        for (name, timed) in names.iter().zip(results) {
            summary.total += 1;
            if timed.result.success {
                summary.passed += 1;
                summary.passed_names.push(name.clone());
            } else {
                summary.failed += 1;
                summary.failed_names.push(name.clone());
            }
        }
        summary
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn overall_message(&self) -> String {
        if self.total == 0 {
            "No diagnostic tests were run".to_string()
        } else if self.success() {
            format!("All {} diagnostic tests passed", self.total)
        } else {
            format!(
                "{} of {} diagnostic tests failed",
                self.failed, self.total
            )
        }
    }
}

/// `PASS: <name>: <message>` / `FAIL: ...`, one per test in execution order
pub fn result_lines(names: &[String], results: &[TimedTestResult]) -> Vec<String> {
    names
        .iter()
        .zip(results)
        .map(|(name, timed)| {
            let status = if timed.result.success { "PASS" } else { "FAIL" };
            format!("{status}: {name}: {}", timed.result.message)
        })
        .collect()
}

/// What a completed (or cancelled) run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub summary: RunSummary,
    pub lines: Vec<String>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
    pub cleaned_up: bool,
    /// Set once the report reached disk
    pub report_path: Option<PathBuf>,
}

impl RunOutcome {
    pub fn exit_code(&self, fail_on_test_failure: bool) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if fail_on_test_failure && !self.summary.success() {
            EXIT_TEST_FAILURE
        } else {
            0
        }
    }

    /// Console rendering of the run; details are included when `verbose`
    pub fn render(&self, verbose: bool) -> String {
        let mut out = Vec::new();
        for (line, timed) in self.lines.iter().zip(&self.report.results) {
            out.push(line.clone());
            if verbose {
                out.extend(timed.result.details.iter().map(|d| format!("    {d}")));
            }
        }

        out.push(String::new());
        out.push(format!(
            "Passed: {}, Failed: {}, Total: {}",
            self.summary.passed, self.summary.failed, self.summary.total
        ));
        if !self.summary.failed_names.is_empty() {
            out.push(format!(
                "Failed tests: {}",
                self.summary.failed_names.join(", ")
            ));
        }
        if self.cancelled {
            out.push("Run cancelled before all selected tests ran".to_string());
        }
        let status = if self.summary.success() { "PASS" } else { "FAIL" };
        out.push(format!("Overall: {status} - {}", self.summary.overall_message()));

        match &self.report_path {
            Some(path) => out.push(format!("Report written to {}", path.display())),
            None => out.push(format!(
                "Warning: report could not be written to {}",
                self.report.filename.display()
            )),
        }
        out.join("\n")
    }
}

/// Runs checks from a registry against one cluster
pub struct Orchestrator {
    cluster: Arc<dyn ClusterOps>,
    registry: Arc<TestRegistry>,
    settings: CheckSettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        registry: Arc<TestRegistry>,
        settings: CheckSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            registry,
            settings,
            cancel,
        }
    }

    /// Execute one run
    ///
    /// Returns `Err` only when the namespace cannot be set up, in which case
    /// no check has run.
    #[instrument(skip_all, fields(namespace = %options.namespace))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        let overall_start = Utc::now();
        let resolution = self.registry.resolve(&options.selection);
        let mut warnings = resolution.warnings;

        let lifecycle = LifecycleManager::new(self.cluster.clone(), options.namespace.clone());
        lifecycle.ensure_namespace().await?;

        let run_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let ctx = CheckContext {
            cluster: self.cluster.clone(),
            namespace: options.namespace.clone(),
            run_id: run_id.clone(),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        };
        let config = TestConfig {
            placement: options.placement,
        };

        info!(run_id = %run_id, tests = resolution.ids.len(), "Starting diagnostic run");

        let mut test_names = Vec::with_capacity(resolution.ids.len());
        let mut results = Vec::with_capacity(resolution.ids.len());
        let mut cancelled = false;

        for (i, id) in resolution.ids.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = resolution.ids.len() - i, "Run cancelled, skipping remaining tests");
                cancelled = true;
                break;
            }
            let Some(entry) = self.registry.get(id) else {
                continue;
            };

            info!(
                test = %entry.display_name,
                "Running test {}/{}",
                i + 1,
                resolution.ids.len()
            );
            let timed = execute(entry, &ctx, &config).await;
            test_names.push(entry.display_name.clone());
            results.push(timed);
        }
        // A cancel that lands during the last check still marks the run
        cancelled |= self.cancel.is_cancelled();

        let summary = RunSummary::from_results(&test_names, &results);
        let lines = result_lines(&test_names, &results);

        let test_all = options.selection.test_all;
        let cleaned_up = should_cleanup(test_all, options.keep_namespace, options.force_cleanup);
        if cleaned_up {
            if let Some(warning) = lifecycle.cleanup().await {
                warnings.push(warning);
            }
        } else {
            info!(namespace = %lifecycle.namespace(), "Keeping test namespace");
        }

        let overall_end = Utc::now();
        let report = Report::new(
            RunMetadata::new(
                options.namespace.clone(),
                run_id.clone(),
                options.kubeconfig.as_deref(),
                options.verbose,
            ),
            results,
            test_names,
            overall_start,
            overall_end,
            &options.results_dir,
        )?;

        let report_path = match report.write().await {
            Ok(path) => Some(path.to_path_buf()),
            Err(e) => {
                warn!(error = %e, "Failed to write report");
                warnings.push(format!(
                    "failed to write report {}: {}",
                    report.filename.display(),
                    e
                ));
                None
            }
        };

        info!(
            passed = summary.passed,
            failed = summary.failed,
            total = summary.total,
            cancelled,
            "Diagnostic run finished"
        );

        Ok(RunOutcome {
            report,
            summary,
            lines,
            warnings,
            cancelled,
            cleaned_up,
            report_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{Check, TestResult};
    use crate::error::Error;
    use crate::k8s::{MockClusterOps, NamespaceOutcome};
    use crate::registry::TestEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Passes or fails as told, counting invocations and the config it saw
    struct Scripted {
        pass: bool,
        accepts: bool,
        calls: Arc<AtomicUsize>,
        cancel_after: Option<CancellationToken>,
        seen: Mutex<Vec<Option<TestConfig>>>,
    }

    #[async_trait]
    impl Check for Scripted {
        fn accepts_config(&self) -> bool {
            self.accepts
        }

        async fn run(&self, _ctx: &CheckContext, config: Option<&TestConfig>) -> TestResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(config.cloned());
            if let Some(token) = &self.cancel_after {
                token.cancel();
            }
            if self.pass {
                TestResult::pass("path ok", vec!["probe ok".to_string()])
            } else {
                TestResult::fail("path broken", vec!["probe failed".to_string()])
            }
        }
    }

    struct Harness {
        calls: Arc<AtomicUsize>,
        cancel: CancellationToken,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                cancel: CancellationToken::new(),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        /// Builtin ids, names and groups with scripted checks; `failing` ids fail
        fn registry(&self, failing: &[&str], cancel_after: Option<&str>) -> TestRegistry {
            let builtin = TestRegistry::builtin().unwrap();
            let entries = builtin
                .ids()
                .into_iter()
                .map(|id| {
                    let name = builtin.get(&id).unwrap().display_name.clone();
                    let check = Scripted {
                        pass: !failing.contains(&id.as_str()),
                        accepts: id == "pod-to-pod",
                        calls: self.calls.clone(),
                        cancel_after: (cancel_after == Some(id.as_str()))
                            .then(|| self.cancel.clone()),
                        seen: Mutex::new(Vec::new()),
                    };
                    (id, TestEntry::new(name, Arc::new(check)))
                })
                .collect();
            let groups = builtin
                .group_names()
                .into_iter()
                .map(|g| (g.to_string(), builtin.group(g).unwrap().to_vec()))
                .collect();
            TestRegistry::new(entries, groups, builtin.default_ids().to_vec()).unwrap()
        }

        fn orchestrator(&self, mock: MockClusterOps, registry: TestRegistry) -> Orchestrator {
            Orchestrator::new(
                Arc::new(mock),
                Arc::new(registry),
                CheckSettings::default(),
                self.cancel.clone(),
            )
        }

        fn options(&self, selection: Selection) -> RunOptions {
            RunOptions {
                selection,
                results_dir: self.dir.path().to_path_buf(),
                ..Default::default()
            }
        }
    }

    fn namespace_ok() -> MockClusterOps {
        let mut mock = MockClusterOps::new();
        mock.expect_create_namespace()
            .times(1)
            .returning(|_, _| Ok(NamespaceOutcome::Created));
        mock
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn assert_aligned(outcome: &RunOutcome) {
        let s = &outcome.summary;
        assert_eq!(s.passed + s.failed, s.total);
        assert_eq!(s.total, outcome.report.results.len());
        assert_eq!(s.total, outcome.report.test_names.len());
        for timed in &outcome.report.results {
            assert!(timed.end_time >= timed.start_time);
        }
    }

    #[tokio::test]
    async fn test_networking_group_all_pass() {
        let h = Harness::new();
        let mut mock = namespace_ok();
        mock.expect_delete_namespace().never();
        let orch = h.orchestrator(mock, h.registry(&[], None));

        let outcome = orch
            .run(&h.options(Selection {
                group: Some("networking".to_string()),
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_aligned(&outcome);
        assert_eq!(outcome.summary.total, 6);
        assert_eq!(outcome.summary.failed, 0);
        assert_eq!(outcome.summary.overall_message(), "All 6 diagnostic tests passed");
        assert!(!outcome.cleaned_up);
        assert_eq!(outcome.exit_code(true), 0);

        let path = outcome.report_path.clone().unwrap();
        let persisted = Report::load(&path).await.unwrap();
        assert_eq!(persisted, outcome.report);
    }

    #[tokio::test]
    async fn test_list_with_failing_dns() {
        let h = Harness::new();
        let orch = h.orchestrator(namespace_ok(), h.registry(&["dns"], None));

        let outcome = orch
            .run(&h.options(Selection {
                list: strings(&["dns", "pod-to-pod"]),
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_aligned(&outcome);
        assert_eq!(outcome.summary.total, 2);
        assert_eq!(outcome.summary.passed, 1);
        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.summary.failed_names, strings(&["DNS Resolution"]));
        assert_eq!(
            outcome.report.test_names,
            strings(&["DNS Resolution", "Pod-to-Pod Connectivity"])
        );
        assert_eq!(
            outcome.lines,
            strings(&[
                "FAIL: DNS Resolution: path broken",
                "PASS: Pod-to-Pod Connectivity: path ok",
            ])
        );
        assert_eq!(outcome.summary.overall_message(), "1 of 2 diagnostic tests failed");
        assert_eq!(outcome.exit_code(false), 0);
        assert_eq!(outcome.exit_code(true), EXIT_TEST_FAILURE);
    }

    #[tokio::test]
    async fn test_test_all_keep_namespace_skips_cleanup() {
        let h = Harness::new();
        let mut mock = namespace_ok();
        mock.expect_delete_namespace().never();
        let orch = h.orchestrator(mock, h.registry(&[], None));

        let mut options = h.options(Selection {
            test_all: true,
            ..Default::default()
        });
        options.keep_namespace = true;
        let outcome = orch.run(&options).await.unwrap();

        assert!(!outcome.cleaned_up);
        assert_eq!(outcome.summary.total, 8);
    }

    #[tokio::test]
    async fn test_test_all_cleans_up() {
        let h = Harness::new();
        let mut mock = namespace_ok();
        mock.expect_delete_namespace()
            .withf(|name| name == "diagnostic-test")
            .times(1)
            .returning(|_| Ok(()));
        let orch = h.orchestrator(mock, h.registry(&[], None));

        let outcome = orch
            .run(&h.options(Selection {
                test_all: true,
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(outcome.cleaned_up);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_only_a_warning() {
        let h = Harness::new();
        let mut mock = namespace_ok();
        mock.expect_delete_namespace()
            .returning(|_| Err(Error::exec("forbidden")));
        let orch = h.orchestrator(mock, h.registry(&[], None));

        let mut options = h.options(Selection::default());
        options.force_cleanup = true;
        let outcome = orch.run(&options).await.unwrap();

        assert!(outcome.summary.success());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("forbidden"));
    }

    #[tokio::test]
    async fn test_cancel_after_second_of_five() {
        let h = Harness::new();
        // pod-to-pod, service-to-pod, cross-node, dns, nodeport: cancel fires inside the 2nd
        let orch = h.orchestrator(namespace_ok(), h.registry(&[], Some("service-to-pod")));

        let outcome = orch
            .run(&h.options(Selection {
                list: strings(&["pod-to-pod", "service-to-pod", "cross-node", "dns", "nodeport"]),
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_aligned(&outcome);
        assert!(outcome.cancelled);
        assert_eq!(outcome.report.results.len(), 2);
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert!(outcome.summary.total < 5);
        assert_eq!(outcome.exit_code(false), EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_namespace_failure_runs_nothing() {
        let h = Harness::new();
        let mut mock = MockClusterOps::new();
        mock.expect_create_namespace()
            .returning(|_, _| Err(Error::exec("connection refused")));
        let orch = h.orchestrator(mock, h.registry(&[], None));

        let err = orch.run(&h.options(Selection::default())).await.unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_group_falls_back_with_one_warning() {
        let h = Harness::new();
        let orch = h.orchestrator(namespace_ok(), h.registry(&[], None));

        let outcome = orch
            .run(&h.options(Selection {
                group: Some("bogus".to_string()),
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(
            outcome.report.test_names,
            strings(&[
                "Pod-to-Pod Connectivity",
                "Service-to-Pod Connectivity",
                "DNS Resolution"
            ])
        );
    }

    #[tokio::test]
    async fn test_unknown_list_id_skipped() {
        let h = Harness::new();
        let orch = h.orchestrator(namespace_ok(), h.registry(&[], None));

        let outcome = orch
            .run(&h.options(Selection {
                list: strings(&["ghost", "api-server"]),
                ..Default::default()
            }))
            .await
            .unwrap();

        assert_eq!(outcome.report.test_names, strings(&["API Server Reachability"]));
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_report_write_failure_is_a_warning() {
        let h = Harness::new();
        let blocker = h.dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let orch = h.orchestrator(namespace_ok(), h.registry(&[], None));

        let mut options = h.options(Selection::default());
        options.results_dir = blocker;
        let outcome = orch.run(&options).await.unwrap();

        assert!(outcome.report_path.is_none());
        assert_eq!(outcome.summary.total, 3);
        assert!(outcome.warnings[0].starts_with("failed to write report"));
        assert!(outcome.render(false).contains("Warning: report could not be written"));
    }

    #[test]
    fn test_summary_alignment() {
        let now = Utc::now();
        let results = vec![
            TimedTestResult::new(TestResult::pass("a", vec![]), now, now),
            TimedTestResult::new(TestResult::fail("b", vec![]), now, now),
            TimedTestResult::new(TestResult::pass("c", vec![]), now, now),
        ];
        let names = strings(&["A", "B", "C"]);
        let summary = RunSummary::from_results(&names, &results);
        assert_eq!(summary.passed_names, strings(&["A", "C"]));
        assert_eq!(summary.failed_names, strings(&["B"]));
        assert_eq!(summary.passed + summary.failed, summary.total);
        assert!(!summary.success());
    }

    #[test]
    fn test_empty_summary_message() {
        let summary = RunSummary::default();
        assert!(summary.success());
        assert_eq!(summary.overall_message(), "No diagnostic tests were run");
    }
}
