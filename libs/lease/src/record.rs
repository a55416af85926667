//! The lease record and the acquisition decision.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LeaseError;

/// The stored claim. Always replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Opaque identity of the holder.
    pub holder_identity: String,

    /// When the current holder first took the lease.
    pub acquire_time: DateTime<Utc>,

    /// Time of the latest successful write (acquisition or renewal).
    pub renew_time: DateTime<Utc>,

    pub lease_duration_ms: u64,

    /// Number of times the holder has changed.
    #[serde(default)]
    pub leader_transitions: u32,
}

impl LeaseRecord {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    /// Instant at which the claim lapses.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let delta = i64::try_from(self.lease_duration_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX);
        self.renew_time
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.holder_identity == identity
    }

    /// A copy of this record that has already lapsed at `now`.
    pub fn released_at(&self, now: DateTime<Utc>) -> Self {
        Self {
            renew_time: now,
            lease_duration_ms: 0,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<String, LeaseError> {
        // Serializing plain strings, timestamps and integers cannot fail.
        serde_json::to_string(self).map_err(|e| LeaseError::CorruptRecord {
            key: String::new(),
            reason: e.to_string(),
        })
    }

    pub fn decode(key: &str, raw: &str) -> Result<Self, LeaseError> {
        serde_json::from_str(raw).map_err(|e| LeaseError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode the authoritative record of a lock from its raw stored values.
    ///
    /// `stored` holds `(key, value)` pairs for whichever of `keys` exist.
    /// The first key present in `keys` order wins.
    pub fn decode_first(
        keys: &[String],
        stored: &[(String, String)],
    ) -> Result<Option<Self>, LeaseError> {
        for key in keys {
            if let Some((_, raw)) = stored.iter().find(|(k, _)| k == key) {
                return Self::decode(key, raw).map(Some);
            }
        }
        Ok(None)
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Caller takes the lease; write this record.
    Acquire(LeaseRecord),
    /// Caller already holds the lease; write this refreshed record.
    Renew(LeaseRecord),
    /// Someone else holds a live lease; nothing to write.
    Held(LeaseRecord),
}

impl Decision {
    /// The record to write, if any.
    pub fn to_write(&self) -> Option<&LeaseRecord> {
        match self {
            Self::Acquire(r) | Self::Renew(r) => Some(r),
            Self::Held(_) => None,
        }
    }

    pub fn record(&self) -> &LeaseRecord {
        match self {
            Self::Acquire(r) | Self::Renew(r) | Self::Held(r) => r,
        }
    }

    pub fn into_record(self) -> LeaseRecord {
        match self {
            Self::Acquire(r) | Self::Renew(r) | Self::Held(r) => r,
        }
    }
}

/// Decide what `identity` may write given the currently stored record.
pub fn decide(
    existing: Option<&LeaseRecord>,
    identity: &str,
    duration: Duration,
    now: DateTime<Utc>,
) -> Decision {
    let lease_duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

    match existing {
        None => Decision::Acquire(LeaseRecord {
            holder_identity: identity.to_string(),
            acquire_time: now,
            renew_time: now,
            lease_duration_ms,
            leader_transitions: 0,
        }),
        Some(current) if current.is_held_by(identity) => Decision::Renew(LeaseRecord {
            renew_time: now,
            lease_duration_ms,
            ..current.clone()
        }),
        Some(current) if current.is_valid_at(now) => Decision::Held(current.clone()),
        Some(current) => Decision::Acquire(LeaseRecord {
            holder_identity: identity.to_string(),
            acquire_time: now,
            renew_time: now,
            lease_duration_ms,
            leader_transitions: current.leader_transitions.saturating_add(1),
        }),
    }
}
