use std::path::{Path, PathBuf};

use sqlx::MySqlPool;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{ConceptTables, MysqlConfig, SyncConfig};
use crate::error::SyncError;
use crate::mysql;
use crate::pipeline::{StepAction, StepOutcome, SyncStep};

/// Executes a single invocation of a step.
///
/// `input` is the failure list a retry pass is restricted to; `None` means
/// a full run.
pub trait StepRunner {
    async fn invoke(&self, step: &SyncStep, input: Option<&Path>) -> StepOutcome;
}

/// Runs command steps as child processes and built-in steps against MySQL.
pub struct LocalRunner {
    // Current directory of every spawned utility.
    workdir: PathBuf,
    // MySQL and token variables exported to children.
    env: Vec<(String, String)>,
    mysql: MysqlConfig,
    concepts: ConceptTables,
    // Opened by the first built-in step.
    pool: OnceCell<MySqlPool>,
}

impl LocalRunner {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            workdir: config.workdir.clone(),
            env: config.child_env(),
            mysql: config.mysql.clone(),
            concepts: config.concepts.clone(),
            pool: OnceCell::new(),
        }
    }

    // Connected on first use so command-only pipelines never touch MySQL here.
    async fn pool(&self) -> Result<&MySqlPool, SyncError> {
        self.pool
            .get_or_try_init(|| mysql::connect(&self.mysql))
            .await
    }

    async fn spawn(&self, step: &SyncStep, input: Option<&Path>) -> StepOutcome {
        let Some((program, argv)) = step.command_line(input) else {
            return StepOutcome::failed("not a command step");
        };
        info!(step = %step.name, %program, args = ?argv, "spawning");

        let status = Command::new(&program)
            .args(&argv)
            .current_dir(&self.workdir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()
            .await;

        match status {
            Ok(status) if status.success() => StepOutcome::Success,
            Ok(status) => StepOutcome::Failed {
                exit_code: status.code(),
                reason: format!("{program} exited unsuccessfully"),
            },
            Err(e) => {
                warn!(step = %step.name, error = %e, "failed to spawn");
                StepOutcome::failed(format!("failed to spawn {program}: {e}"))
            }
        }
    }

    async fn builtin(&self, step: &SyncStep) -> Result<(), SyncError> {
        let pool = self.pool().await?;
        match &step.action {
            StepAction::SwapTables { pairs, skip_missing } => {
                let summary = mysql::swap_tables(pool, pairs, *skip_missing).await?;
                debug!(?summary, "swap finished");
                Ok(())
            }
            StepAction::MissingConcepts { delete } => {
                mysql::check_missing_concepts(pool, &self.concepts, &self.workdir, *delete).await?;
                Ok(())
            }
            StepAction::Command { .. } => Err(SyncError::Config(format!(
                "step `{}` is a command, not a built-in",
                step.name
            ))),
        }
    }
}

impl StepRunner for LocalRunner {
    async fn invoke(&self, step: &SyncStep, input: Option<&Path>) -> StepOutcome {
        match &step.action {
            StepAction::Command { .. } => self.spawn(step, input).await,
            _ => match self.builtin(step).await {
                Ok(()) => StepOutcome::Success,
                Err(e) => StepOutcome::Failed {
                    exit_code: Some(i32::from(e.exit_code())),
                    reason: e.to_string(),
                },
            },
        }
    }
}
