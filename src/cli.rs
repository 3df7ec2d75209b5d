//! Command-line interface for ashare-sync, built on clap.
//!
//! [`Cli`] carries the global flags (--config, --max-retries, --verbose) and
//! a [`Command`]: run the pipeline, retry one step, inspect failure lists,
//! or drive the MySQL helpers directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

/// Sequential A-share data sync with failure-list retries.
#[derive(Debug, Parser)]
#[command(name = "ashare-sync", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Pipeline configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Retry passes for every retryable step, overriding the configuration.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Debug-level logging (RUST_LOG still wins when set).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the configured steps in order.
    Run {
        /// Run only the named steps (repeatable), keeping pipeline order.
        #[arg(long = "only", value_name = "STEP")]
        only: Vec<String>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,

        /// Exit with code 4 when failure lists remain after retries.
        #[arg(long)]
        fail_on_remaining: bool,
    },

    /// Retries one step from its existing failure list, skipping the full run.
    Retry {
        step: String,

        #[arg(long)]
        json: bool,
    },

    /// Shows the failure list of every retryable step.
    Status,

    /// Checks that the credentials the steps require are set.
    CheckEnv,

    /// Atomically replaces table OLD with table NEW.
    Swap {
        new: String,
        old: String,

        /// Do nothing when NEW does not exist.
        #[arg(long)]
        skip_missing: bool,
    },

    /// Prints row counts of the given tables.
    Tables {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Lists concepts with no index row on the latest trade date.
    MissingConcepts {
        /// Delete those concepts from the list and daily tables.
        #[arg(long)]
        delete: bool,
    },

    /// Manages the local MySQL container.
    Mysql {
        #[command(subcommand)]
        action: MysqlAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum MysqlAction {
    /// Creates or starts the container and waits until MySQL answers.
    Up,
    /// Stops the container.
    Down,
    /// Shows whether the container exists and is running.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from([
            "ashare-sync",
            "run",
            "--only",
            "daily",
            "--only",
            "sync ths concepts",
            "--fail-on-remaining",
        ]);
        match cli.command {
            Command::Run {
                only,
                json,
                fail_on_remaining,
            } => {
                assert_eq!(only, vec!["daily", "sync ths concepts"]);
                assert!(!json);
                assert!(fail_on_remaining);
            }
            _ => panic!("expected Run command"),
        }
        assert_eq!(cli.config, PathBuf::from("ashare-sync.toml"));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "ashare-sync",
            "--config",
            "/etc/ashare.toml",
            "--max-retries",
            "5",
            "--verbose",
            "status",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.max_retries, Some(5));
        assert_eq!(cli.config, PathBuf::from("/etc/ashare.toml"));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn cli_parses_retry_and_swap() {
        let cli = Cli::parse_from(["ashare-sync", "retry", "sync ths concepts", "--json"]);
        assert!(matches!(cli.command, Command::Retry { ref step, json: true } if step == "sync ths concepts"));

        let cli = Cli::parse_from(["ashare-sync", "swap", "daily_qfq_new", "daily_qfq", "--skip-missing"]);
        match cli.command {
            Command::Swap {
                new,
                old,
                skip_missing,
            } => {
                assert_eq!(new, "daily_qfq_new");
                assert_eq!(old, "daily_qfq");
                assert!(skip_missing);
            }
            _ => panic!("expected Swap command"),
        }
    }

    #[test]
    fn cli_parses_mysql_actions() {
        let cli = Cli::parse_from(["ashare-sync", "mysql", "up"]);
        assert!(matches!(cli.command, Command::Mysql { action: MysqlAction::Up }));
        let cli = Cli::parse_from(["ashare-sync", "mysql", "status"]);
        assert!(matches!(cli.command, Command::Mysql { action: MysqlAction::Status }));
    }

    #[test]
    fn tables_requires_a_name() {
        assert!(Cli::try_parse_from(["ashare-sync", "tables"]).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
