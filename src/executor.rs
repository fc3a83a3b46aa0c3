//! Runs a single check and records its wall-clock window

use std::any::Any;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::checks::{CheckContext, TestConfig, TestResult};
use crate::error::Error;
use crate::registry::TestEntry;

/// A [`TestResult`] with the time it started and finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedTestResult {
    pub result: TestResult,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

impl TimedTestResult {
    /// Wrap a result; an end before the start (clock step) is clamped to the start
    pub fn new(result: TestResult, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        let end_time = end_time.max(start_time);
        Self {
            result,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
        }
    }

    pub fn success(&self) -> bool {
        self.result.success
    }
}

/// Invoke one check
///
/// Checks that accept configuration get `config`; the others get `None`.
/// Never fails: a panic inside the check or a cancellation while it runs
/// becomes a failed result, so the caller can always record it.
#[instrument(skip_all, fields(test = %entry.display_name))]
pub async fn execute(entry: &TestEntry, ctx: &CheckContext, config: &TestConfig) -> TimedTestResult {
    let config = entry.check.accepts_config().then_some(config);
    let start = Utc::now();

    let run = AssertUnwindSafe(entry.check.run(ctx, config)).catch_unwind();
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            TestResult::fail(format!("check {}", Error::Cancelled), vec![])
        }
        outcome = run => match outcome {
            Ok(result) => result,
            Err(panic) => TestResult::fail(
                format!("check panicked: {}", panic_message(panic.as_ref())),
                vec![],
            ),
        },
    };

    let timed = TimedTestResult::new(result, start, Utc::now());
    info!(
        success = timed.result.success,
        duration_ms = timed.duration_ms,
        "Test finished"
    );
    timed
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
