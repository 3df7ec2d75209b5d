//! MySQL access for the built-in steps and the local container lifecycle.

mod concepts;
mod container;
mod tables;

use std::time::Duration;

use sqlx::MySqlPool;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use tracing::info;

use crate::config::MysqlConfig;
use crate::error::SyncError;

pub use concepts::check_missing_concepts;
pub use container::{ContainerState, MysqlContainer, UpAction};
pub use tables::{swap_tables, table_status};

/// Opens a small connection pool against the configured database.
pub async fn connect(config: &MysqlConfig) -> Result<MySqlPool, SyncError> {
    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "connecting to MySQL"
    );
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .charset("utf8mb4");
    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;
    info!("connected to MySQL");
    Ok(pool)
}
