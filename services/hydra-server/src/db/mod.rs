//! Desired-state database: pool and schema.
//!
//! Queries over `sandbox_requests` live with their only consumer,
//! [`crate::desired`].

mod error;

pub use error::DbError;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Pool settings for the desired-state database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    /// Connections idle longer than this are closed.
    pub idle_timeout: Duration,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/open_hydra".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Shared handle to the desired-state pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        debug!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Opening desired-state pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply `migrations/`, looked up relative to the working directory and
    /// then to this crate's source tree.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let dir = migrations_dir().ok_or_else(|| DbError::MigrationDirNotFound {
            tried: migration_candidates()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })?;

        let migrator = Migrator::new(dir.clone())
            .await
            .map_err(DbError::Migration)?;
        migrator.run(&self.pool).await.map_err(DbError::Migration)?;

        info!(
            migrations_dir = %dir.display(),
            applied = migrator.iter().count(),
            "Desired-state schema up to date"
        );
        Ok(())
    }
}

fn migration_candidates() -> [PathBuf; 3] {
    [
        PathBuf::from("migrations"),
        PathBuf::from("services/hydra-server/migrations"),
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

fn migrations_dir() -> Option<PathBuf> {
    migration_candidates().into_iter().find(|dir| dir.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_keeps_pool_defaults() {
        let config = DbConfig::new("postgres://db/hydra");
        assert_eq!(config.url, "postgres://db/hydra");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }

    #[test]
    fn test_crate_migrations_are_found() {
        let dir = migrations_dir().unwrap();
        assert!(dir.join("0001_sandbox_requests.sql").is_file());
    }
}
