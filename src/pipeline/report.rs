use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final status of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// The retry budget ran out with entities still listed as failed.
    Partial,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "SUCCEEDED"),
            StepStatus::Partial => write!(f, "PARTIAL"),
            StepStatus::Failed => write!(f, "FAILED"),
            StepStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name as configured.
    pub name: String,
    pub status: StepStatus,
    /// Full run plus every retry pass actually taken.
    pub attempts: u32,
    /// Retry budget this step ran with; 0 for steps without a failure list.
    pub max_retries: u32,
    /// Exit code of the last invocation, `None` if it never started.
    pub exit_code: Option<i32>,
    /// Reason the last invocation failed, or why the step was skipped.
    pub message: Option<String>,
    /// Absolute path of the failure list, for retryable steps.
    pub failure_file: Option<PathBuf>,
    /// Entities still listed once the budget ran out.
    pub remaining: Vec<String>,
}

impl StepReport {
    pub fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Skipped,
            attempts: 0,
            max_retries: 0,
            exit_code: None,
            message: Some(reason.to_string()),
            failure_file: None,
            remaining: Vec::new(),
        }
    }

    /// Whether this step stops a guarded pipeline.
    pub fn is_blocking(&self) -> bool {
        matches!(self.status, StepStatus::Failed | StepStatus::Partial)
    }
}

/// Structured record of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Random v4 UUID identifying this run in logs and JSON output.
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// A guarded step stopped the sequence.
    pub halted: bool,
    /// One report per configured step, in pipeline order.
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, steps: Vec<StepReport>, halted: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            completed_at: now,
            duration_ms: (now - started_at).num_milliseconds(),
            halted,
            steps,
        }
    }

    /// Steps whose retry budget ran out with entities still failing.
    pub fn with_remaining(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| !s.remaining.is_empty())
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
