use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::pipeline::{
    FailureList, RunReport, StepOutcome, StepReport, StepStatus, SyncStep, remove_if_exists,
    retry_input_path,
};
use crate::runner::StepRunner;

/// Drives the sync steps in order, retrying partially failed steps against
/// their failure lists.
pub struct SyncOrchestrator<R> {
    runner: R,
    /// Directory failure-list paths are resolved against.
    workdir: PathBuf,
    default_max_retries: u32,
    /// CLI override; wins over per-step and default budgets.
    max_retries_override: Option<u32>,
}

impl<R: StepRunner> SyncOrchestrator<R> {
    pub fn new(runner: R, workdir: impl Into<PathBuf>, default_max_retries: u32) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            default_max_retries,
            max_retries_override: None,
        }
    }

    pub fn with_max_retries_override(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries_override = max_retries;
        self
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Retry passes allowed for `step`: CLI override, then the step's own
    /// budget, then the configured default.
    pub fn max_retries_for(&self, step: &SyncStep) -> u32 {
        self.max_retries_override
            .or_else(|| step.retry.as_ref().and_then(|r| r.max_retries))
            .unwrap_or(self.default_max_retries)
    }

    /// Runs every step once, in order. A failing step never stops the
    /// sequence unless it is guarded with `halt_on_failure`.
    pub async fn run(&self, steps: &[SyncStep]) -> RunReport {
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(steps.len());
        let mut halted = false;

        for step in steps {
            if halted {
                reports.push(StepReport::skipped(&step.name, "pipeline halted by a guarded step"));
                continue;
            }

            let report = self.run_step(step).await;
            if step.halt_on_failure && report.is_blocking() {
                error!(step = %step.name, status = %report.status, "guarded step did not succeed; halting");
                halted = true;
            }
            reports.push(report);
        }

        RunReport::new(started_at, reports, halted)
    }

    /// Full run of one step, followed by its retry cycle when retryable.
    pub async fn run_step(&self, step: &SyncStep) -> StepReport {
        info!(step = %step.name, "starting step");

        let Some(retry) = &step.retry else {
            let outcome = self.runner.invoke(step, None).await;
            log_outcome(step, &outcome);
            return self.finish(step, 1, outcome, None, FailureList::default());
        };

        // A list left over from an unrelated run must not drive this run's retries.
        let failure_file = self.workdir.join(&retry.failure_file);
        let input_file = self.workdir.join(retry_input_path(&retry.failure_file));
        for stale in [&failure_file, &input_file] {
            match remove_if_exists(stale) {
                Ok(true) => debug!(path = %stale.display(), "removed stale failure list"),
                Ok(false) => {}
                Err(e) => {
                    return self.io_failure(step, 0, stale, e.into());
                }
            }
        }

        let outcome = self.runner.invoke(step, None).await;
        log_outcome(step, &outcome);
        self.retry_cycle(step, 1, outcome).await
    }

    /// Retry cycle alone, starting from whatever failure list is on disk.
    pub async fn retry_only(&self, step: &SyncStep) -> Result<StepReport, SyncError> {
        if step.retry.is_none() {
            return Err(SyncError::NotRetryable(step.name.clone()));
        }
        Ok(self.retry_cycle(step, 0, StepOutcome::Success).await)
    }

    async fn retry_cycle(&self, step: &SyncStep, attempts: u32, last: StepOutcome) -> StepReport {
        let Some(retry) = &step.retry else {
            return self.finish(step, attempts, last, None, FailureList::default());
        };
        let failure_file = self.workdir.join(&retry.failure_file);
        let input_arg = retry_input_path(&retry.failure_file);
        if let Err(e) = recover_interrupted_pass(step, &failure_file, &self.workdir.join(&input_arg)) {
            return self.io_failure(step, attempts, &failure_file, e.into());
        }

        let mut attempts = attempts;
        let mut last = last;
        match self
            .retry_passes(step, &failure_file, &input_arg, &mut attempts, &mut last)
            .await
        {
            Ok(remaining) => self.finish(step, attempts, last, Some(failure_file), remaining),
            Err(e) => self.io_failure(step, attempts, &failure_file, e),
        }
    }

    async fn retry_passes(
        &self,
        step: &SyncStep,
        failure_file: &Path,
        input_arg: &Path,
        attempts: &mut u32,
        last: &mut StepOutcome,
    ) -> Result<FailureList, SyncError> {
        let max_retries = self.max_retries_for(step);
        let input_file = self.workdir.join(input_arg);

        for pass in 1..=max_retries {
            let current = match FailureList::load(failure_file)? {
                Some(list) if !list.is_empty() => list,
                _ => {
                    debug!(step = %step.name, pass, "failure list empty or absent; no retry needed");
                    return Ok(FailureList::default());
                }
            };

            info!(
                step = %step.name,
                pass,
                max_retries,
                failed = current.len(),
                "retrying failed entities"
            );

            std::fs::rename(failure_file, &input_file)?;
            let outcome = self.runner.invoke(step, Some(input_arg)).await;
            *attempts += 1;
            log_outcome(step, &outcome);

            if !failure_file.exists() && !outcome.is_success() {
                // Nothing recorded by a crashed pass: keep every entity listed.
                warn!(step = %step.name, pass, "pass failed without writing a failure list; restoring it");
                std::fs::rename(&input_file, failure_file)?;
            } else {
                remove_if_exists(&input_file)?;
            }
            *last = outcome;
        }

        Ok(FailureList::load(failure_file)?.unwrap_or_default())
    }

    fn finish(
        &self,
        step: &SyncStep,
        attempts: u32,
        last: StepOutcome,
        failure_file: Option<PathBuf>,
        remaining: FailureList,
    ) -> StepReport {
        let status = if !remaining.is_empty() {
            warn!(
                step = %step.name,
                remaining = remaining.len(),
                "retry budget exhausted; failure list left for follow-up"
            );
            StepStatus::Partial
        } else if last.is_success() {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };

        let message = match &last {
            StepOutcome::Success => None,
            StepOutcome::Failed { .. } => Some(last.to_string()),
        };

        StepReport {
            name: step.name.clone(),
            status,
            attempts,
            max_retries: if step.is_retryable() { self.max_retries_for(step) } else { 0 },
            exit_code: last.exit_code(),
            message,
            failure_file,
            remaining: remaining.ids(),
        }
    }

    fn io_failure(&self, step: &SyncStep, attempts: u32, failure_file: &Path, e: SyncError) -> StepReport {
        error!(step = %step.name, path = %failure_file.display(), error = %e, "failure list unusable");
        StepReport {
            name: step.name.clone(),
            status: StepStatus::Failed,
            attempts,
            max_retries: self.max_retries_for(step),
            exit_code: None,
            message: Some(e.to_string()),
            failure_file: Some(failure_file.to_path_buf()),
            remaining: Vec::new(),
        }
    }
}

/// Puts back a list stranded as `.prev` by a pass that never finished.
fn recover_interrupted_pass(step: &SyncStep, failure_file: &Path, input_file: &Path) -> std::io::Result<()> {
    if !failure_file.exists() && input_file.exists() {
        warn!(
            step = %step.name,
            path = %input_file.display(),
            "previous retry pass was interrupted; restoring its failure list"
        );
        std::fs::rename(input_file, failure_file)?;
    }
    Ok(())
}

fn log_outcome(step: &SyncStep, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Success => info!(step = %step.name, "step invocation succeeded"),
        StepOutcome::Failed { .. } => warn!(step = %step.name, %outcome, "step invocation failed"),
    }
}
