//! Lifecycle of the local MySQL container, driven through the Docker CLI.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MysqlConfig;
use crate::error::SyncError;
use crate::shell::{CommandOutput, CommandRunner};

const DOCKER: &str = "docker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Absent,
    Running,
    Stopped,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Absent => write!(f, "absent"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What `up` had to do before the server answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpAction {
    Created,
    Started,
    AlreadyRunning,
}

/// The local MySQL container named by `MysqlConfig::container_name`.
pub struct MysqlContainer<R> {
    // Executes every `docker` invocation.
    runner: R,
    config: MysqlConfig,
    // Resolved host data directory; canonicalized before `docker run`.
    data_dir: PathBuf,
    // Delay between `mysqladmin ping` attempts.
    poll_interval: Duration,
}

impl<R: CommandRunner> MysqlContainer<R> {
    /// `data_dir` is the host directory mounted at `/var/lib/mysql`.
    pub fn new(runner: R, config: MysqlConfig, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            config,
            data_dir: data_dir.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn name(&self) -> &str {
        &self.config.container_name
    }

    async fn docker(&self, args: &[&str]) -> Result<CommandOutput, SyncError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(DOCKER, &args).await.map_err(|e| {
            SyncError::Infra(format!("failed to run docker ({e}); is Docker installed?"))
        })
    }

    async fn docker_ok(&self, args: &[&str]) -> Result<CommandOutput, SyncError> {
        let output = self.docker(args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(SyncError::Infra(format!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                output.stderr.trim()
            )))
        }
    }

    async fn ensure_daemon(&self) -> Result<(), SyncError> {
        let info = self.docker(&["info"]).await?;
        if info.success {
            Ok(())
        } else {
            Err(SyncError::Infra("Docker is not running".into()))
        }
    }

    /// Looks the container up by exact name.
    pub async fn state(&self) -> Result<ContainerState, SyncError> {
        let filter = format!("name=^/{}$", self.name());
        let output = self
            .docker_ok(&["ps", "-a", "--filter", &filter, "--format", "{{.Status}}"])
            .await?;
        let status = output.stdout.lines().next().unwrap_or("").trim();
        Ok(if status.is_empty() {
            ContainerState::Absent
        } else if status.starts_with("Up") {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        })
    }

    /// Creates or starts the container, then blocks until the server answers
    /// `mysqladmin ping` or the configured timeout elapses.
    pub async fn up(&self) -> Result<UpAction, SyncError> {
        if self.config.root_password.is_empty() {
            return Err(SyncError::MissingEnv(vec!["MYSQL_ROOT_PASSWORD".into()]));
        }
        self.ensure_daemon().await?;

        let action = match self.state().await? {
            ContainerState::Running => {
                info!(container = %self.name(), "container already running");
                UpAction::AlreadyRunning
            }
            ContainerState::Stopped => {
                info!(container = %self.name(), "starting existing container");
                self.docker_ok(&["start", self.name()]).await?;
                UpAction::Started
            }
            ContainerState::Absent => {
                self.create().await?;
                UpAction::Created
            }
        };

        self.wait_ready().await?;
        info!(container = %self.name(), "MySQL is ready");
        Ok(action)
    }

    async fn create(&self) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.data_dir)?;
        let data_dir = std::fs::canonicalize(&self.data_dir)?;
        info!(
            container = %self.name(),
            image = %self.config.image,
            data_dir = %data_dir.display(),
            "creating container"
        );

        let root_password = format!("MYSQL_ROOT_PASSWORD={}", self.config.root_password);
        let database = format!("MYSQL_DATABASE={}", self.config.database);
        let port = format!("{}:3306", self.config.port);
        let volume = format!("{}:/var/lib/mysql", data_dir.display());
        self.docker_ok(&[
            "run",
            "-d",
            "--name",
            self.name(),
            "-e",
            &root_password,
            "-e",
            &database,
            "-p",
            &port,
            "-v",
            &volume,
            &self.config.image,
            "--character-set-server=utf8mb4",
            "--collation-server=utf8mb4_unicode_ci",
        ])
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<bool, SyncError> {
        let password = format!("-p{}", self.config.root_password);
        let output = self
            .docker(&[
                "exec",
                self.name(),
                "mysqladmin",
                "ping",
                "-h",
                "127.0.0.1",
                "-uroot",
                &password,
                "--silent",
            ])
            .await?;
        Ok(output.success)
    }

    async fn wait_ready(&self) -> Result<(), SyncError> {
        let timeout = Duration::from_secs(self.config.ping_timeout_secs);
        let deadline = Instant::now() + timeout;
        loop {
            if self.ping().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(container = %self.name(), secs = timeout.as_secs(), "MySQL did not answer ping");
                return Err(SyncError::Timeout {
                    what: "mysqladmin ping".into(),
                    secs: timeout.as_secs(),
                });
            }
            debug!("waiting for MySQL");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stops the container if it is running. Returns the state it was in.
    pub async fn down(&self) -> Result<ContainerState, SyncError> {
        self.ensure_daemon().await?;
        let state = self.state().await?;
        if state == ContainerState::Running {
            info!(container = %self.name(), "stopping container");
            self.docker_ok(&["stop", self.name()]).await?;
        }
        Ok(state)
    }

    pub async fn status(&self) -> Result<ContainerState, SyncError> {
        self.ensure_daemon().await?;
        self.state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::mock::MockRunner;

    fn config() -> MysqlConfig {
        MysqlConfig {
            root_password: "rootpw".into(),
            ..MysqlConfig::default()
        }
    }

    fn container(runner: MockRunner, config: MysqlConfig, dir: &std::path::Path) -> MysqlContainer<MockRunner> {
        MysqlContainer::new(runner, config, dir).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn absent_container_is_created_and_awaited() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("mysql-data");
        let runner = MockRunner::new()
            .on("docker ps", CommandOutput::ok(""))
            .once("docker exec", CommandOutput::failed(1, "connect failed"))
            .on("docker exec", CommandOutput::ok("mysqld is alive"));

        let c = container(runner, config(), &data_dir);
        let action = c.up().await.unwrap();

        assert_eq!(action, UpAction::Created);
        assert!(data_dir.is_dir());
        let commands = c.runner().executed_commands();
        let run = commands.iter().find(|l| l.starts_with("docker run")).unwrap();
        assert!(run.contains("--name tushare-mysql"));
        assert!(run.contains("-e MYSQL_ROOT_PASSWORD=rootpw"));
        assert!(run.contains("-e MYSQL_DATABASE=tushare_sync"));
        assert!(run.contains("-p 3306:3306"));
        assert!(run.contains(":/var/lib/mysql mysql:8.0"));
        assert!(run.ends_with("--character-set-server=utf8mb4 --collation-server=utf8mb4_unicode_ci"));
        assert_eq!(c.runner().count("docker exec tushare-mysql mysqladmin ping"), 2);
    }

    #[tokio::test]
    async fn ping_timeout_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new()
            .on("docker ps", CommandOutput::ok(""))
            .on("docker exec", CommandOutput::failed(1, "connect failed"));
        let mut cfg = config();
        cfg.ping_timeout_secs = 0;

        let c = container(runner, cfg, tmp.path());
        let err = c.up().await.unwrap_err();

        assert!(matches!(err, SyncError::Timeout { ref what, secs: 0 } if what == "mysqladmin ping"));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(c.runner().count("docker run"), 1);
    }

    #[tokio::test]
    async fn docker_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on("docker info", CommandOutput::failed(1, "Cannot connect"));

        let c = container(runner, config(), tmp.path());
        let err = c.up().await.unwrap_err();

        assert_eq!(err.to_string(), "Infrastructure error: Docker is not running");
        assert_eq!(c.runner().count("docker ps"), 0);
    }

    #[tokio::test]
    async fn docker_missing_is_infra_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().spawn_error("docker");

        let c = container(runner, config(), tmp.path());
        assert!(matches!(c.status().await, Err(SyncError::Infra(_))));
    }

    #[tokio::test]
    async fn running_container_only_waits_for_ping() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on("docker ps", CommandOutput::ok("Up 2 hours\n"));

        let c = container(runner, config(), tmp.path());
        assert_eq!(c.up().await.unwrap(), UpAction::AlreadyRunning);
        assert_eq!(c.runner().count("docker run"), 0);
        assert_eq!(c.runner().count("docker start"), 0);
        assert_eq!(c.runner().count("docker exec"), 1);
    }

    #[tokio::test]
    async fn stopped_container_is_started() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on("docker ps", CommandOutput::ok("Exited (0) 3 days ago"));

        let c = container(runner, config(), tmp.path());
        assert_eq!(c.up().await.unwrap(), UpAction::Started);
        assert_eq!(c.runner().count("docker start tushare-mysql"), 1);
    }

    #[tokio::test]
    async fn up_requires_root_password() {
        let tmp = tempfile::tempdir().unwrap();
        let c = container(MockRunner::new(), MysqlConfig::default(), tmp.path());
        let err = c.up().await.unwrap_err();
        assert!(matches!(err, SyncError::MissingEnv(ref keys) if keys == &["MYSQL_ROOT_PASSWORD"]));
        assert!(c.runner().executed_commands().is_empty());
    }

    #[tokio::test]
    async fn down_stops_only_running_container() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new().on("docker ps", CommandOutput::ok("Up 5 minutes"));
        let c = container(runner, config(), tmp.path());
        assert_eq!(c.down().await.unwrap(), ContainerState::Running);
        assert_eq!(c.runner().count("docker stop tushare-mysql"), 1);

        let runner = MockRunner::new().on("docker ps", CommandOutput::ok(""));
        let c = container(runner, config(), tmp.path());
        assert_eq!(c.down().await.unwrap(), ContainerState::Absent);
        assert_eq!(c.runner().count("docker stop"), 0);
    }

    #[tokio::test]
    async fn state_uses_exact_name_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = MockRunner::new();
        let c = container(runner, config(), tmp.path());
        assert_eq!(c.state().await.unwrap(), ContainerState::Absent);
        assert_eq!(
            c.runner().executed_commands(),
            vec!["docker ps -a --filter name=^/tushare-mysql$ --format {{.Status}}"]
        );
    }
}
