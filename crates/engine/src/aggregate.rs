//! Folding job results into a caller-facing summary.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::types::{JobResult, JobState};

/// One failure surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub id: String,
    pub name: String,
    pub state: JobState,
    pub message: String,
}

/// Totals over a set of job results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duration: Duration,
    pub failures: Vec<FailureRecord>,
    pub success: bool,
}

impl Default for AggregateSummary {
    fn default() -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration: Duration::ZERO,
            failures: Vec::new(),
            success: true,
        }
    }
}

/// Counts a completed job may carry in its JSON output, e.g. a test-suite run.
struct EmbeddedCounts {
    passed: u64,
    failed: u64,
    skipped: u64,
    failures: Vec<String>,
}

fn embedded_counts(output: &Value) -> Option<EmbeddedCounts> {
    let obj = output.as_object()?;
    let count = |key: &str| obj.get(key).and_then(Value::as_u64);
    let (passed, failed, skipped) = (count("passed"), count("failed"), count("skipped"));
    if passed.is_none() && failed.is_none() && skipped.is_none() {
        return None;
    }
    let failures = obj
        .get("failures")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    Some(EmbeddedCounts {
        passed: passed.unwrap_or(0),
        failed: failed.unwrap_or(0),
        skipped: skipped.unwrap_or(0),
        failures,
    })
}

impl AggregateSummary {
    /// Fold a full result set. An empty set is a vacuous success.
    pub fn merge(results: &[JobResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.absorb(result);
        }
        summary
    }

    /// Add one result to the running totals.
    pub fn absorb(&mut self, result: &JobResult) {
        self.duration = self.duration.saturating_add(result.duration);

        match result.state {
            JobState::Completed if result.skipped => self.skipped = self.skipped.saturating_add(1),
            JobState::Completed => match result.output.as_ref().and_then(embedded_counts) {
                Some(counts) => {
                    self.passed = self.passed.saturating_add(counts.passed);
                    self.failed = self.failed.saturating_add(counts.failed);
                    self.skipped = self.skipped.saturating_add(counts.skipped);
                    self.failures.extend(counts.failures.into_iter().map(|message| FailureRecord {
                        id: result.id.clone(),
                        name: result.name.clone(),
                        state: result.state,
                        message,
                    }));
                }
                None => self.passed = self.passed.saturating_add(1),
            },
            // Non-terminal results never reach the aggregator; treat them as failures.
            JobState::Failed | JobState::TimedOut | JobState::Pending | JobState::Running => {
                self.failed = self.failed.saturating_add(1);
            }
        }

        if let Some(message) = &result.error {
            self.failures.push(FailureRecord {
                id: result.id.clone(),
                name: result.name.clone(),
                state: result.state,
                message: message.clone(),
            });
        }

        self.refresh();
    }

    /// Merge two summaries as if their result sets had been concatenated.
    pub fn combine(mut self, other: AggregateSummary) -> Self {
        self.passed = self.passed.saturating_add(other.passed);
        self.failed = self.failed.saturating_add(other.failed);
        self.skipped = self.skipped.saturating_add(other.skipped);
        self.duration = self.duration.saturating_add(other.duration);
        self.failures.extend(other.failures);
        self.refresh();
        self
    }

    fn refresh(&mut self) {
        // Embedded counts are caller data; totals pin at u64::MAX.
        self.total = self.passed.saturating_add(self.failed).saturating_add(self.skipped);
        self.success = self.failed == 0;
    }
}
