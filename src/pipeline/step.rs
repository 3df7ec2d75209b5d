use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Argument token the sync utilities accept before a worker count.
pub const WORKERS_ARG: &str = "workers";
/// Argument token the sync utilities accept before a failure-list path.
pub const FROM_FILE_ARG: &str = "from-file";

/// A pair of tables exchanged by a swap: `new` replaces `old`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePair {
    pub new: String,
    pub old: String,
}

/// What a step actually does when invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepAction {
    /// Spawn an external sync utility.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Replace each `old` table with its freshly built `new` counterpart.
    SwapTables {
        pairs: Vec<TablePair>,
        #[serde(default)]
        skip_missing: bool,
    },
    /// Find concepts with no row on the latest trade date.
    MissingConcepts {
        #[serde(default)]
        delete: bool,
    },
}

/// Marks a step as retryable against a persisted failure list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// File the step writes its failed entity identifiers to, relative to the workdir.
    pub failure_file: PathBuf,
    /// Retry passes after the initial run; falls back to the global default.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// One named entry of the sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStep {
    pub name: String,
    pub action: StepAction,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Environment variables that must be set before the pipeline starts.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Stop the remaining sequence when this step ends failed or partial.
    #[serde(default)]
    pub halt_on_failure: bool,
}

impl SyncStep {
    /// Convenience constructor for a plain command step.
    pub fn command(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            action: StepAction::Command {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
            workers: None,
            retry: None,
            requires: Vec::new(),
            halt_on_failure: false,
        }
    }

    pub fn with_retry(mut self, failure_file: impl Into<PathBuf>, max_retries: Option<u32>) -> Self {
        self.retry = Some(RetryPolicy {
            failure_file: failure_file.into(),
            max_retries,
        });
        self
    }

    pub fn with_workers(mut self, workers: u32) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn guarded(mut self) -> Self {
        self.halt_on_failure = true;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retry.is_some()
    }

    /// Builds `program args... [workers N] [from-file PATH]` for command steps.
    ///
    /// Returns `None` for built-in steps, which are not spawned.
    pub fn command_line(&self, input: Option<&Path>) -> Option<(String, Vec<String>)> {
        let StepAction::Command { program, args } = &self.action else {
            return None;
        };
        let mut argv = args.clone();
        if let Some(workers) = self.workers {
            argv.push(WORKERS_ARG.to_string());
            argv.push(workers.max(1).to_string());
        }
        if let Some(path) = input {
            argv.push(FROM_FILE_ARG.to_string());
            argv.push(path.display().to_string());
        }
        Some((program.clone(), argv))
    }
}

/// The result of invoking a step once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failed {
        exit_code: Option<i32>,
        reason: String,
    },
}

impl StepOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        StepOutcome::Failed {
            exit_code: None,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StepOutcome::Success => Some(0),
            StepOutcome::Failed { exit_code, .. } => *exit_code,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Success => write!(f, "ok"),
            StepOutcome::Failed {
                exit_code: Some(code),
                reason,
            } => write!(f, "exit {code}: {reason}"),
            StepOutcome::Failed {
                exit_code: None,
                reason,
            } => write!(f, "{reason}"),
        }
    }
}
