//! Configuration loaded from `ashare-sync.toml`.
//!
//! [`SyncConfig`] holds the pipeline definition (`[[steps]]`), the retry
//! default and the MySQL connection/container settings. Values missing from
//! the file use defaults matching the sync utilities. Environment variables
//! (`MYSQL_*`, `username`, `password`, `TUSHARE_TOKEN`, ...) take precedence
//! over the file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SyncError;
use crate::pipeline::SyncStep;

pub const DEFAULT_CONFIG_FILE: &str = "ashare-sync.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Directory the sync utilities run in and failure lists live in.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Retry passes for retryable steps that do not set their own budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exported to the utilities as `TUSHARE_TOKEN`.
    #[serde(default)]
    pub tushare_token: String,

    #[serde(default)]
    pub mysql: MysqlConfig,

    #[serde(default)]
    pub concepts: ConceptTables,

    /// The pipeline, in execution order.
    #[serde(default)]
    pub steps: Vec<SyncStep>,
}

/// Connection and container settings for the local MySQL instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    /// Server host (`MYSQL_HOST`).
    pub host: String,
    /// Server port, also the host side of the container port mapping.
    pub port: u16,
    /// Login user (`MYSQL_USER` or `username`).
    pub user: String,
    /// Login password (`MYSQL_PASSWORD` or `password`).
    pub password: String,
    /// Schema the sync utilities write to; created with the container.
    pub database: String,
    /// Root password for a new container and for `mysqladmin ping`.
    pub root_password: String,
    /// Exact Docker container name.
    pub container_name: String,
    /// Host directory mounted at `/var/lib/mysql`, relative to the workdir.
    pub data_dir: PathBuf,
    /// Image used when the container has to be created.
    pub image: String,
    /// How long `mysql up` waits for `mysqladmin ping`.
    pub ping_timeout_secs: u64,
    /// Pool size for the built-in steps.
    pub max_connections: u32,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "tushare_sync".to_string(),
            root_password: String::new(),
            container_name: "tushare-mysql".to_string(),
            data_dir: PathBuf::from("mysql-data"),
            image: "mysql:8.0".to_string(),
            ping_timeout_secs: 30,
            max_connections: 5,
        }
    }
}

/// Tables read by the missing-concept check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConceptTables {
    /// Concept codes and names (`BOARD_CONCEPT_LIST_TABLE`).
    pub list_table: String,
    /// Daily index rows keyed by code and trade date (`BOARD_CONCEPT_DAILY_TABLE`).
    pub daily_table: String,
    /// Where missing concepts are written for the next concept sync.
    pub failed_file: PathBuf,
    /// Record of the concepts removed by a delete.
    pub deleted_file: PathBuf,
}

impl Default for ConceptTables {
    fn default() -> Self {
        Self {
            list_table: "ths_concept_list".to_string(),
            daily_table: "ths_concept_index_daily".to_string(),
            failed_file: PathBuf::from("failed_concepts.txt"),
            deleted_file: PathBuf::from("deleted_concepts.txt"),
        }
    }
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

// 3 passes unless a step or the CLI says otherwise.
fn default_max_retries() -> u32 {
    3
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            max_retries: default_max_retries(),
            tushare_token: String::new(),
            mysql: MysqlConfig::default(),
            concepts: ConceptTables::default(),
            steps: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Loads the configuration from `path`, falling back to defaults when the
    /// file does not exist, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SyncConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides using `lookup`. Empty values are ignored.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SyncError> {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .find(|v| !v.is_empty())
        };

        if let Some(v) = get(&["TUSHARE_TOKEN"]) {
            self.tushare_token = v;
        }
        if let Some(v) = get(&["MYSQL_HOST"]) {
            self.mysql.host = v;
        }
        if let Some(v) = get(&["MYSQL_PORT"]) {
            self.mysql.port = v
                .trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("MYSQL_PORT is not a valid port: {v}")))?;
        }
        if let Some(v) = get(&["MYSQL_USER", "username"]) {
            self.mysql.user = v;
        }
        if let Some(v) = get(&["MYSQL_PASSWORD", "password"]) {
            self.mysql.password = v;
        }
        if let Some(v) = get(&["MYSQL_DATABASE"]) {
            self.mysql.database = v;
        }
        if let Some(v) = get(&["MYSQL_ROOT_PASSWORD"]) {
            self.mysql.root_password = v;
        }
        if let Some(v) = get(&["MYSQL_CONTAINER_NAME"]) {
            self.mysql.container_name = v;
        }
        if let Some(v) = get(&["MYSQL_DATA_DIR"]) {
            self.mysql.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get(&["BOARD_CONCEPT_LIST_TABLE"]) {
            self.concepts.list_table = v;
        }
        if let Some(v) = get(&["BOARD_CONCEPT_DAILY_TABLE"]) {
            self.concepts.daily_table = v;
        }
        Ok(())
    }

    /// Rejects duplicate step names, which would make `--only`/`retry` ambiguous.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(SyncError::Config("step with empty name".into()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(SyncError::Config(format!("duplicate step name: {}", step.name)));
            }
        }
        Ok(())
    }

    pub fn find_step(&self, name: &str) -> Result<&SyncStep, SyncError> {
        self.steps
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SyncError::StepNotFound(name.to_string()))
    }

    /// Resolves a path relative to the workdir.
    pub fn in_workdir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    /// Value of a well-known setting as the child processes will see it.
    /// Unknown keys are looked up through `lookup`.
    fn resolved(&self, key: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
        let value = match key {
            "TUSHARE_TOKEN" => self.tushare_token.clone(),
            "MYSQL_HOST" => self.mysql.host.clone(),
            "MYSQL_PORT" => self.mysql.port.to_string(),
            "MYSQL_USER" | "username" => self.mysql.user.clone(),
            "MYSQL_PASSWORD" | "password" => self.mysql.password.clone(),
            "MYSQL_DATABASE" => self.mysql.database.clone(),
            "MYSQL_ROOT_PASSWORD" => self.mysql.root_password.clone(),
            "MYSQL_CONTAINER_NAME" => self.mysql.container_name.clone(),
            "MYSQL_DATA_DIR" => self.mysql.data_dir.display().to_string(),
            _ => lookup(key).unwrap_or_default(),
        };
        Some(value).filter(|v| !v.is_empty())
    }

    /// Returns every variable in `required` that resolves to nothing.
    pub fn missing_env<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        required
            .into_iter()
            .filter(|key| seen.insert(*key))
            .filter(|key| self.resolved(key, &lookup).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Eagerly checks the variables the given steps declare, listing all
    /// that are missing in one error.
    pub fn check_credentials<'a>(
        &self,
        steps: impl IntoIterator<Item = &'a SyncStep>,
    ) -> Result<(), SyncError> {
        let required: Vec<&str> = steps
            .into_iter()
            .flat_map(|s| s.requires.iter().map(String::as_str))
            .collect();
        let missing = self.missing_env(required, |key| std::env::var(key).ok());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::MissingEnv(missing))
        }
    }

    /// Environment exported to every spawned sync utility.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("MYSQL_HOST".to_string(), self.mysql.host.clone()),
            ("MYSQL_PORT".to_string(), self.mysql.port.to_string()),
            ("MYSQL_USER".to_string(), self.mysql.user.clone()),
            ("username".to_string(), self.mysql.user.clone()),
            ("MYSQL_PASSWORD".to_string(), self.mysql.password.clone()),
            ("password".to_string(), self.mysql.password.clone()),
            ("MYSQL_DATABASE".to_string(), self.mysql.database.clone()),
        ];
        if !self.tushare_token.is_empty() {
            env.push(("TUSHARE_TOKEN".to_string(), self.tushare_token.clone()));
        }
        env
    }
}
