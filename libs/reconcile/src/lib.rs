//! Reconciliation primitives.
//!
//! Helpers for loops that converge observed workloads to desired state:
//!
//! - **Spec hash**: a stable digest of a desired spec, stored on the workload
//!   so drift can be detected without comparing whole objects.
//! - **Plan**: which keys need a create, an update, a delete, or nothing.
//! - **Backoff / RetryTracker**: bounded retry of transient failures.
//!
//! # Invariants
//!
//! - Classification is deterministic: plans are ordered by key.
//! - Backoff never exceeds its configured maximum.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// Two desired or two observed objects share a key.
    #[error("duplicate {side} key: {key}")]
    DuplicateKey { side: &'static str, key: String },

    /// A stored spec hash could not be parsed.
    #[error("invalid spec hash: {0}")]
    InvalidSpecHash(String),
}

const HASH_PREFIX: &str = "sha256:";
const HASH_HEX_LEN: usize = 32;

/// A spec hash for deterministic comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hash the canonical form of a JSON document (keys sorted).
    pub fn from_json(json: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_json(json).as_bytes());
        let digest = hasher.finalize();
        Self(format!("{HASH_PREFIX}{}", hex::encode(&digest[..HASH_HEX_LEN / 2])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SpecHash {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.strip_prefix(HASH_PREFIX).is_some_and(|hex| {
            hex.len() == HASH_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit())
        });
        if !valid {
            return Err(ReconcileError::InvalidSpecHash(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        // Scalars already have a single compact rendering.
        scalar => scalar.to_string(),
    }
}

/// An object that takes part in reconciliation.
pub trait Reconcilable {
    /// Stable identity shared by the desired and observed side.
    fn key(&self) -> &str;

    /// Hash of the spec the object was built from, when known.
    fn spec_hash(&self) -> Option<&SpecHash>;
}

/// Actions needed to converge observed objects `C` to desired objects `D`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<D, C> {
    /// Desired with nothing observed.
    pub create: Vec<D>,
    /// Observed, but built from a different spec (or an unknown one).
    pub update: Vec<(D, C)>,
    /// Observed with nothing desired.
    pub delete: Vec<C>,
    pub unchanged: Vec<(D, C)>,
}

impl<D, C> Default for Plan<D, C> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<D, C> Plan<D, C> {
    /// True when nothing needs to be written.
    pub fn is_converged(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn write_count(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

/// Classify desired against observed objects by key and spec hash.
pub fn classify<D, C>(desired: Vec<D>, current: Vec<C>) -> Result<Plan<D, C>, ReconcileError>
where
    D: Reconcilable,
    C: Reconcilable,
{
    let desired = index_by_key(desired, "desired")?;
    let mut current = index_by_key(current, "observed")?;
    let mut plan = Plan::default();

    for (key, want) in desired {
        match current.remove(&key) {
            None => plan.create.push(want),
            Some(have) => {
                let drifted = match (want.spec_hash(), have.spec_hash()) {
                    (Some(w), Some(h)) => w != h,
                    _ => true,
                };
                if drifted {
                    plan.update.push((want, have));
                } else {
                    plan.unchanged.push((want, have));
                }
            }
        }
    }

    plan.delete.extend(current.into_values());
    Ok(plan)
}

fn index_by_key<T: Reconcilable>(
    items: Vec<T>,
    side: &'static str,
) -> Result<BTreeMap<String, T>, ReconcileError> {
    let mut index = BTreeMap::new();
    for item in items {
        let key = item.key().to_string();
        if index.contains_key(&key) {
            return Err(ReconcileError::DuplicateKey { side, key });
        }
        index.insert(key, item);
    }
    Ok(index)
}

/// Exponential backoff, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,

    /// Upper bound on any delay.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Retry tracker for failed operations.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    max_retries: u32,
    window: Duration,
    /// key -> (failures, first failure in window)
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            max_retries,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure. Returns true if retries are exhausted.
    pub fn record_failure(&mut self, key: &str) -> bool {
        self.record_failure_at(key, Instant::now())
    }

    fn record_failure_at(&mut self, key: &str, now: Instant) -> bool {
        let (count, first) = self.failures.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count > self.max_retries
    }

    /// Failures recorded for `key` in the current window.
    pub fn attempts(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |(count, _)| *count)
    }

    pub fn is_exhausted(&self, key: &str) -> bool {
        self.is_exhausted_at(key, Instant::now())
    }

    fn is_exhausted_at(&self, key: &str, now: Instant) -> bool {
        let Some((count, first)) = self.failures.get(key) else {
            return false;
        };
        now.duration_since(*first) <= self.window && *count > self.max_retries
    }

    /// Forget a key after it succeeds.
    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop entries whose window has passed.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }
}

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Matches the default election retry period.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60);
