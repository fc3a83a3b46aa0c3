//! Persisted run report

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::executor::TimedTestResult;

/// Label recorded when no kubeconfig path was given
pub const DEFAULT_KUBECONFIG_SOURCE: &str = "default";

/// Run metadata carried into the report unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub namespace: String,
    pub run_id: String,
    pub kubeconfig_source: String,
    pub verbose: bool,
}

impl RunMetadata {
    pub fn new(
        namespace: impl Into<String>,
        run_id: impl Into<String>,
        kubeconfig: Option<&str>,
        verbose: bool,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            run_id: run_id.into(),
            kubeconfig_source: kubeconfig_source(kubeconfig),
            verbose,
        }
    }
}

/// The label for where cluster credentials came from
pub fn kubeconfig_source(kubeconfig: Option<&str>) -> String {
    match kubeconfig {
        Some(path) if !path.trim().is_empty() => path.to_string(),
        _ => DEFAULT_KUBECONFIG_SOURCE.to_string(),
    }
}

/// Everything one run produced
///
/// `test_names[i]` is the display name of `results[i]`. `filename` is where
/// the report is written, so callers can print it without rebuilding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub namespace: String,
    pub run_id: String,
    pub kubeconfig_source: String,
    pub verbose: bool,
    pub results: Vec<TimedTestResult>,
    pub test_names: Vec<String>,
    pub overall_start: DateTime<Utc>,
    pub overall_end: DateTime<Utc>,
    pub filename: PathBuf,
}

impl Report {
    pub fn new(
        metadata: RunMetadata,
        results: Vec<TimedTestResult>,
        test_names: Vec<String>,
        overall_start: DateTime<Utc>,
        overall_end: DateTime<Utc>,
        results_dir: &Path,
    ) -> Result<Self> {
        if results.len() != test_names.len() {
            return Err(Error::config(format!(
                "{} results but {} test names",
                results.len(),
                test_names.len()
            )));
        }

        let filename = results_dir.join(report_file_name(
            &metadata.namespace,
            overall_start,
            &metadata.run_id,
        ));
        Ok(Self {
            namespace: metadata.namespace,
            run_id: metadata.run_id,
            kubeconfig_source: metadata.kubeconfig_source,
            verbose: metadata.verbose,
            results,
            test_names,
            overall_start,
            overall_end: overall_end.max(overall_start),
            filename,
        })
    }

    /// Write the report as pretty JSON, creating the directory if needed
    #[instrument(skip(self), fields(path = %self.filename.display()))]
    pub async fn write(&self) -> Result<&Path> {
        if let Some(dir) = self.filename.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&self.filename, json).await?;
        info!(tests = self.results.len(), "Report written");
        Ok(&self.filename)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// `netdiag-<namespace>-<YYYYMMDD-HHMMSS>-<run_id>.json`, stamped in UTC
///
/// The run id keeps two runs started in the same second apart.
pub fn report_file_name(namespace: &str, start: DateTime<Utc>, run_id: &str) -> String {
    format!(
        "netdiag-{}-{}-{}.json",
        namespace,
        start.format("%Y%m%d-%H%M%S"),
        run_id
    )
}
