//! Lease store errors.

use thiserror::Error;

/// Errors surfaced by a [`LeaseStore`](crate::LeaseStore).
///
/// Losing an acquisition to a live holder is not an error; it is reported
/// as `acquired == false`.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Network or connection failure. Retryable.
    #[error("lease store unavailable: {0}")]
    StoreUnavailable(String),

    /// A racing writer won the conditional write. Retryable.
    #[error("conditional write on '{key}' lost to a concurrent writer")]
    ConsistencyViolation { key: String },

    /// The stored value could not be decoded. Needs manual intervention.
    #[error("corrupt lease record at '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },
}

impl LeaseError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ConsistencyViolation { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ConsistencyViolation { .. } => "consistency_violation",
            Self::CorruptRecord { .. } => "corrupt_record",
        }
    }
}

impl From<sqlx::Error> for LeaseError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // serialization_failure / unique_violation both mean another
            // writer got there first.
            if matches!(db.code().as_deref(), Some("40001") | Some("23505")) {
                return Self::ConsistencyViolation {
                    key: db.table().unwrap_or("leader_leases").to_string(),
                };
            }
        }
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let unavailable = LeaseError::StoreUnavailable("refused".into());
        assert!(unavailable.is_retryable());
        assert!(!unavailable.is_fatal());

        let race = LeaseError::ConsistencyViolation { key: "k".into() };
        assert!(race.is_retryable());
        assert_eq!(race.kind(), "consistency_violation");

        let corrupt = LeaseError::CorruptRecord {
            key: "k".into(),
            reason: "eof".into(),
        };
        assert!(corrupt.is_fatal());
        assert!(!corrupt.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err = LeaseError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, LeaseError::StoreUnavailable(_)));
    }
}
