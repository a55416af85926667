use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("cannot connect to desired-state database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("desired-state query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("no migrations directory found (tried {tried})")]
    MigrationDirNotFound { tried: String },

    /// A stored sandbox request that does not describe a valid sandbox.
    #[error("invalid sandbox request {id}: {reason}")]
    InvalidRow { id: String, reason: String },
}

impl DbError {
    /// Connection and query failures are worth retrying; bad data is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(DbError::Query(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!DbError::InvalidRow {
            id: "sbx_1".into(),
            reason: "unknown device type".into()
        }
        .is_retryable());
        assert!(!DbError::MigrationDirNotFound {
            tried: "migrations".into()
        }
        .is_retryable());
    }
}
