//! Step result records for a workflow run.
//!
//! There is no persistence or resume: re-running the workflow is the recovery
//! path, and every step is idempotent. The report only records what happened
//! for the end-of-run summary.

use crate::models::{StepOutcome, StepResult};
use std::time::Duration;

/// Ordered record of every executed step
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    results: Vec<StepResult>,
}

impl WorkflowReport {
    pub fn new() -> Self {
        WorkflowReport::default()
    }

    pub fn record(&mut self, result: StepResult) {
        self.results.push(result);
    }

    /// Append another report's results after this one's.
    pub fn extend(&mut self, other: WorkflowReport) {
        self.results.extend(other.results);
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn failed(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| r.outcome.is_fatal())
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_none()
    }

    pub fn total_elapsed(&self) -> Duration {
        self.results.iter().map(|r| r.elapsed).sum()
    }

    /// One line per step plus a totals line.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .results
            .iter()
            .map(|r| {
                let detail = r
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default();
                format!(
                    "  {} {:<32} {:>6.1}s{}",
                    r.outcome.symbol(),
                    r.name,
                    r.elapsed.as_secs_f64(),
                    detail
                )
            })
            .collect();
        lines.push(format!(
            "  {} succeeded, {} skipped, {} warnings, {} failed in {:.1}s",
            self.count(StepOutcome::Succeeded),
            self.count(StepOutcome::Skipped),
            self.count(StepOutcome::SoftFailed),
            self.count(StepOutcome::Failed),
            self.total_elapsed().as_secs_f64()
        ));
        lines
    }

    pub fn log_summary(&self) {
        log::info!("[Workflow] Summary:");
        for line in self.summary_lines() {
            log::info!("{}", line);
        }
    }
}
