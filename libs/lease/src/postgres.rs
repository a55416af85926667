//! Postgres-backed lease store.
//!
//! Records live in `leader_leases(lock_key, record, version)`. The `version`
//! column is the compare-and-swap token: every write is conditional on the
//! version read in the same transaction, so a racing writer makes the write
//! affect zero rows and the attempt fails with `ConsistencyViolation`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, warn};

use crate::{
    decide, Acquisition, Clock, Decision, LeaseError, LeaseRecord, LeaseStore, LockKey,
    SystemClock,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leader_leases (
    lock_key   TEXT PRIMARY KEY,
    record     TEXT NOT NULL,
    version    BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Connection settings for [`PgLeaseStore`].
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    /// Connection URLs, tried in order.
    pub endpoints: Vec<String>,

    /// CA bundle used to verify the server. Enables `verify-full`.
    pub ca_file: Option<PathBuf>,

    /// Client certificate for mutual TLS.
    pub cert_file: Option<PathBuf>,

    /// Client key for mutual TLS.
    pub key_file: Option<PathBuf>,

    pub max_connections: u32,

    pub acquire_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["postgres://localhost/open_hydra".to_string()],
            ca_file: None,
            cert_file: None,
            key_file: None,
            max_connections: 4,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PgStoreConfig {
    fn connect_options(&self, endpoint: &str) -> Result<PgConnectOptions, LeaseError> {
        let mut options = PgConnectOptions::from_str(endpoint)
            .map_err(|e| LeaseError::StoreUnavailable(format!("invalid endpoint: {e}")))?;

        if let Some(ca) = &self.ca_file {
            options = options.ssl_mode(PgSslMode::VerifyFull).ssl_root_cert(ca);
        }
        if let (Some(cert), Some(key)) = (&self.cert_file, &self.key_file) {
            options = options.ssl_client_cert(cert).ssl_client_key(key);
        }

        Ok(options)
    }
}

type Stored = Vec<(String, String, i64)>;

/// Lease store on a Postgres table.
#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Connect to the first reachable endpoint.
    pub async fn connect(config: &PgStoreConfig) -> Result<Self, LeaseError> {
        let mut last_error = None;

        for (index, endpoint) in config.endpoints.iter().enumerate() {
            let options = config.connect_options(endpoint)?;
            let result = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect_with(options)
                .await;

            match result {
                Ok(pool) => {
                    info!(
                        endpoint_index = index,
                        max_connections = config.max_connections,
                        "Lease store connected"
                    );
                    return Ok(Self::new(pool));
                }
                Err(e) => {
                    warn!(endpoint_index = index, error = %e, "Lease store endpoint unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(LeaseError::StoreUnavailable(match last_error {
            Some(e) => format!("all endpoints failed; last error: {e}"),
            None => "no lease store endpoints configured".to_string(),
        }))
    }

    /// Create the lease table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), LeaseError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn read_stored(
        tx: &mut Transaction<'_, Postgres>,
        keys: &[String],
    ) -> Result<Stored, LeaseError> {
        let rows = sqlx::query(
            "SELECT lock_key, record, version FROM leader_leases WHERE lock_key = ANY($1)",
        )
        .bind(keys)
        .fetch_all(&mut **tx)
        .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("lock_key")?,
                    row.try_get::<String, _>("record")?,
                    row.try_get::<i64, _>("version")?,
                ))
            })
            .collect::<Result<Stored, sqlx::Error>>()
            .map_err(LeaseError::from)
    }

    fn decode(keys: &[String], stored: &Stored) -> Result<Option<LeaseRecord>, LeaseError> {
        let pairs: Vec<(String, String)> = stored
            .iter()
            .map(|(k, v, _)| (k.clone(), v.clone()))
            .collect();
        LeaseRecord::decode_first(keys, &pairs)
    }

    /// Conditionally write `record` under every key of the lock.
    async fn write_all(
        tx: &mut Transaction<'_, Postgres>,
        keys: &[String],
        stored: &Stored,
        record: &LeaseRecord,
    ) -> Result<(), LeaseError> {
        let encoded = record.encode()?;

        for key in keys {
            let version = stored.iter().find(|(k, _, _)| k == key).map(|(_, _, v)| *v);
            let result = match version {
                Some(version) => {
                    sqlx::query(
                        "UPDATE leader_leases SET record = $1, version = version + 1, updated_at = now() \
                         WHERE lock_key = $2 AND version = $3",
                    )
                    .bind(&encoded)
                    .bind(key)
                    .bind(version)
                    .execute(&mut **tx)
                    .await?
                }
                None => {
                    sqlx::query(
                        "INSERT INTO leader_leases (lock_key, record, version) VALUES ($1, $2, 1) \
                         ON CONFLICT (lock_key) DO NOTHING",
                    )
                    .bind(key)
                    .bind(&encoded)
                    .execute(&mut **tx)
                    .await?
                }
            };

            if result.rows_affected() != 1 {
                return Err(LeaseError::ConsistencyViolation { key: key.clone() });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn try_acquire_or_renew(
        &self,
        lock: &LockKey,
        identity: &str,
        duration: Duration,
    ) -> Result<Acquisition, LeaseError> {
        let keys = lock.store_keys();
        let mut tx = self.pool.begin().await?;

        let stored = Self::read_stored(&mut tx, &keys).await?;
        let existing = Self::decode(&keys, &stored)?;
        let decision = decide(existing.as_ref(), identity, duration, self.clock.now());

        if let Some(record) = decision.to_write() {
            Self::write_all(&mut tx, &keys, &stored, record).await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        let acquired = !matches!(decision, Decision::Held(_));
        debug!(lock = %lock, identity, acquired, "Lease write attempted");

        Ok(Acquisition {
            record: decision.into_record(),
            acquired,
        })
    }

    async fn get(&self, lock: &LockKey) -> Result<Option<LeaseRecord>, LeaseError> {
        let keys = lock.store_keys();
        let mut tx = self.pool.begin().await?;
        let stored = Self::read_stored(&mut tx, &keys).await?;
        tx.rollback().await?;
        Self::decode(&keys, &stored)
    }

    async fn release(&self, lock: &LockKey, identity: &str) -> Result<bool, LeaseError> {
        let keys = lock.store_keys();
        let mut tx = self.pool.begin().await?;
        let stored = Self::read_stored(&mut tx, &keys).await?;

        match Self::decode(&keys, &stored)? {
            Some(record) if record.is_held_by(identity) => {
                let released = record.released_at(self.clock.now());
                Self::write_all(&mut tx, &keys, &stored, &released).await?;
                tx.commit().await?;
                info!(lock = %lock, identity, "Lease released");
                Ok(true)
            }
            _ => {
                tx.rollback().await?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PgStoreConfig::default();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.max_connections, 4);
        assert!(config.ca_file.is_none());
    }

    #[test]
    fn test_invalid_endpoint_is_unavailable() {
        let config = PgStoreConfig::default();
        let err = config.connect_options("not a url").unwrap_err();
        assert!(err.is_retryable());
    }
}
