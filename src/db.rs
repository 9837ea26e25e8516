//! SQLite connection pool setup.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Open the configured database, creating the file and its parent
/// directory on first use. WAL mode keeps ingestion writes from blocking
/// concurrent query reads; foreign keys back the document → chunk
/// cascade in the schema.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    if let Some(parent) = config.db.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db.path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;

    Ok(pool)
}
