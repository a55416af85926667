//! Election timing and identity.

use std::time::Duration;

use hydra_lease::LockKey;

use crate::ElectionError;

/// Lease timing. Must satisfy `retry_period < renew_deadline < lease_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionTiming {
    /// How long a written lease stays valid.
    pub lease_duration: Duration,

    /// How long a leader may go without a successful renewal.
    pub renew_deadline: Duration,

    /// Interval between acquisition or renewal attempts.
    pub retry_period: Duration,
}

impl Default for ElectionTiming {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            renew_deadline: Duration::from_secs(15),
            retry_period: Duration::from_secs(5),
        }
    }
}

impl ElectionTiming {
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.retry_period.is_zero() {
            return Err(ElectionError::InvalidConfig(
                "retry period must be greater than zero".to_string(),
            ));
        }
        if self.retry_period >= self.renew_deadline {
            return Err(ElectionError::InvalidConfig(format!(
                "retry period {:?} must be shorter than renew deadline {:?}",
                self.retry_period, self.renew_deadline
            )));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(ElectionError::InvalidConfig(format!(
                "renew deadline {:?} must be shorter than lease duration {:?}",
                self.renew_deadline, self.lease_duration
            )));
        }
        Ok(())
    }
}

/// Everything one replica needs to take part in an election.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Holder identity written into the lease. Unique per replica.
    pub identity: String,

    pub lock: LockKey,

    pub timing: ElectionTiming,

    /// Expire our own lease on shutdown so a successor need not wait out
    /// the full lease duration.
    pub release_on_cancel: bool,
}

impl ElectionConfig {
    pub fn new(identity: impl Into<String>, lock: LockKey) -> Self {
        Self {
            identity: identity.into(),
            lock,
            timing: ElectionTiming::default(),
            release_on_cancel: true,
        }
    }

    pub fn with_timing(mut self, timing: ElectionTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.identity.is_empty() {
            return Err(ElectionError::InvalidConfig(
                "election identity must not be empty".to_string(),
            ));
        }
        self.timing.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(lease: u64, renew: u64, retry: u64) -> ElectionTiming {
        ElectionTiming {
            lease_duration: Duration::from_secs(lease),
            renew_deadline: Duration::from_secs(renew),
            retry_period: Duration::from_secs(retry),
        }
    }

    #[test]
    fn test_default_timing_is_valid() {
        let timing = ElectionTiming::default();
        assert_eq!(timing, self::timing(30, 15, 5));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_timing_ordering_enforced() {
        assert!(timing(30, 15, 15).validate().is_err());
        assert!(timing(15, 15, 5).validate().is_err());
        assert!(timing(10, 15, 5).validate().is_err());
        assert!(timing(30, 15, 0).validate().is_err());
        assert!(timing(3, 2, 1).validate().is_ok());
    }

    #[test]
    fn test_empty_identity_rejected() {
        let config = ElectionConfig::new("", LockKey::default());
        assert!(config.validate().is_err());
    }
}
