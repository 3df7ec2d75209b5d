mod cli;
mod config;
mod error;
mod mysql;
mod orchestrator;
mod pipeline;
mod runner;
mod shell;
mod ui;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, MysqlAction};
use config::SyncConfig;
use error::SyncError;
use mysql::{ContainerState, MysqlContainer, UpAction};
use orchestrator::SyncOrchestrator;
use pipeline::{FailureList, RunReport, StepStatus, SyncStep, TablePair, retry_input_path};
use runner::LocalRunner;
use shell::ProcessRunner;
use ui::Spinner;

const EXIT_HALTED: u8 = 1;
const EXIT_REMAINING: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            let code = err
                .downcast_ref::<SyncError>()
                .map(SyncError::exit_code)
                .unwrap_or(1);
            eprintln!("{} {err:#}", Style::new().red().bold().apply_to("error:"));
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info,sqlx=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = SyncConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Run {
            only,
            json,
            fail_on_remaining,
        } => {
            if config.steps.is_empty() {
                return Err(SyncError::NoSteps(cli.config).into());
            }
            let steps = select_steps(&config.steps, &only)?;
            config.check_credentials(&steps)?;

            info!(steps = steps.len(), workdir = %config.workdir.display(), "starting sync run");
            let report = build_orchestrator(&config, cli.max_retries).run(&steps).await;
            if json {
                ui::print_json(&report)?;
            } else {
                ui::print_report(&report);
            }
            Ok(ExitCode::from(run_exit_code(&report, fail_on_remaining)))
        }

        Command::Retry { step, json } => {
            let step = config.find_step(&step)?.clone();
            config.check_credentials([&step])?;

            let report = build_orchestrator(&config, cli.max_retries).retry_only(&step).await?;
            if json {
                ui::print_json(&report)?;
            } else {
                ui::print_step(&report);
            }
            Ok(if report.status == StepStatus::Failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Status => {
            let retryable: Vec<&SyncStep> = config.steps.iter().filter(|s| s.is_retryable()).collect();
            if retryable.is_empty() {
                println!("No retryable steps configured in {}", cli.config.display());
            }
            for step in retryable {
                let Some(retry) = &step.retry else { continue };
                let mut path = config.in_workdir(&retry.failure_file);
                let mut list = FailureList::load(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                // An interrupted retry pass leaves the list under its `.prev` name.
                let prev = retry_input_path(&path);
                if list.is_none() && prev.exists() {
                    list = FailureList::load(&prev)
                        .with_context(|| format!("failed to read {}", prev.display()))?;
                    path = prev;
                }
                ui::print_failure_status(&step.name, &path, list.as_ref());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::CheckEnv => {
            config.check_credentials(&config.steps)?;
            let required: usize = config.steps.iter().map(|s| s.requires.len()).sum();
            println!(
                "  {} credentials present for {} steps ({required} requirements)",
                Style::new().green().bold().apply_to("✓"),
                config.steps.len()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Swap {
            new,
            old,
            skip_missing,
        } => {
            let pool = mysql::connect(&config.mysql).await?;
            let spinner = Spinner::start(&format!("Swapping {new} -> {old}"));
            let pairs = [TablePair { new, old }];
            match mysql::swap_tables(&pool, &pairs, skip_missing).await {
                Ok(summary) if summary.swapped.is_empty() => {
                    spinner.success("Nothing to swap");
                }
                Ok(_) => spinner.success(&format!("{} now holds the new data", pairs[0].old)),
                Err(e) => {
                    spinner.failure("Swap failed");
                    return Err(e.into());
                }
            }
            pool.close().await;
            Ok(ExitCode::SUCCESS)
        }

        Command::Tables { names } => {
            let pool = mysql::connect(&config.mysql).await?;
            for table in mysql::table_status(&pool, &names).await? {
                match table.rows {
                    Some(rows) => println!("{:<40} {rows:>12}", table.name),
                    None => println!("{:<40} {:>12}", table.name, "missing"),
                }
            }
            pool.close().await;
            Ok(ExitCode::SUCCESS)
        }

        Command::MissingConcepts { delete } => {
            let pool = mysql::connect(&config.mysql).await?;
            let check =
                mysql::check_missing_concepts(&pool, &config.concepts, &config.workdir, delete).await?;
            pool.close().await;

            println!(
                "Latest trade date {}: {} of {} concepts missing",
                check.latest_trade_date,
                check.missing.len(),
                check.total
            );
            for concept in &check.missing {
                println!("    {}\t{}", concept.name, concept.code);
            }
            if delete && check.missing.is_empty() {
                println!("No incomplete concepts; nothing deleted");
            } else if delete {
                println!(
                    "Deleted {} daily rows and {} list rows",
                    check.deleted_daily_rows, check.deleted_list_rows
                );
            }
            if let Some(path) = &check.output {
                println!("Written to {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Mysql { action } => {
            let data_dir = config.in_workdir(&config.mysql.data_dir);
            let container = MysqlContainer::new(ProcessRunner, config.mysql.clone(), data_dir);
            mysql_command(&container, action).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_orchestrator(config: &SyncConfig, max_retries: Option<u32>) -> SyncOrchestrator<LocalRunner> {
    SyncOrchestrator::new(
        LocalRunner::from_config(config),
        config.workdir.clone(),
        config.max_retries,
    )
    .with_max_retries_override(max_retries)
}

/// Steps named by `--only`, in pipeline order; every step when empty.
fn select_steps(steps: &[SyncStep], only: &[String]) -> Result<Vec<SyncStep>, SyncError> {
    if let Some(unknown) = only.iter().find(|name| !steps.iter().any(|s| &s.name == *name)) {
        return Err(SyncError::StepNotFound(unknown.clone()));
    }
    Ok(steps
        .iter()
        .filter(|s| only.is_empty() || only.contains(&s.name))
        .cloned()
        .collect())
}

fn run_exit_code(report: &RunReport, fail_on_remaining: bool) -> u8 {
    if report.halted {
        EXIT_HALTED
    } else if fail_on_remaining && report.with_remaining().next().is_some() {
        EXIT_REMAINING
    } else {
        0
    }
}

async fn mysql_command(
    container: &MysqlContainer<ProcessRunner>,
    action: MysqlAction,
) -> Result<(), SyncError> {
    match action {
        MysqlAction::Up => {
            let spinner = Spinner::start(&format!("Bringing up MySQL container {}", container.name()));
            match container.up().await {
                Ok(action) => {
                    let what = match action {
                        UpAction::Created => "created",
                        UpAction::Started => "started",
                        UpAction::AlreadyRunning => "already running",
                    };
                    spinner.success(&format!("{} {what}; MySQL is ready", container.name()));
                    Ok(())
                }
                Err(e) => {
                    spinner.failure(&format!("{} did not come up", container.name()));
                    Err(e)
                }
            }
        }
        MysqlAction::Down => {
            let state = container.down().await?;
            if state == ContainerState::Running {
                println!("{} stopped", container.name());
            } else {
                println!("{} is {state}; nothing to stop", container.name());
            }
            Ok(())
        }
        MysqlAction::Status => {
            println!("{}: {}", container.name(), container.status().await?);
            Ok(())
        }
    }
}
