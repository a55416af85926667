//! The election state machine.

use tokio::time::Instant;

/// Where this replica stands in the election.
///
/// Only the [`LeaderElector`](crate::LeaderElector) moves between states;
/// every other task reads a published copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionState {
    /// Trying to acquire; no holder observed yet.
    Candidate,

    /// Holding the lease. Leadership is only trusted before `renew_by`.
    ///
    /// `term` counts this replica's leadership terms and changes only when
    /// leadership is newly gained.
    Leader { renew_by: Instant, term: u64 },

    /// Another replica holds the lease.
    Follower { holder: String },
}

/// Side effect a state change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartedLeading,
    StoppedLeading,
    None,
}

impl ElectionState {
    /// True while leading and the renewal deadline has not passed.
    pub fn is_leader_at(&self, now: Instant) -> bool {
        matches!(self, Self::Leader { renew_by, .. } if now < *renew_by)
    }

    /// The current term, if leadership is still trusted at `now`.
    pub fn term_at(&self, now: Instant) -> Option<u64> {
        match self {
            Self::Leader { renew_by, term } if now < *renew_by => Some(*term),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Leader { .. } => "leader",
            Self::Follower { .. } => "follower",
        }
    }

    /// The lease was written for us; trust it until `renew_by`.
    ///
    /// A renewal keeps the current term; gaining leadership starts `next_term`.
    pub fn acquired(&self, renew_by: Instant, next_term: u64) -> (Self, Transition) {
        match self {
            Self::Leader { term, .. } => (
                Self::Leader {
                    renew_by,
                    term: *term,
                },
                Transition::None,
            ),
            Self::Candidate | Self::Follower { .. } => (
                Self::Leader {
                    renew_by,
                    term: next_term,
                },
                Transition::StartedLeading,
            ),
        }
    }

    /// The lease is not ours, or we can no longer prove it is.
    ///
    /// `holder` is the identity seen in the store, if the attempt got that
    /// far.
    pub fn lost(&self, holder: Option<String>) -> (Self, Transition) {
        let transition = match self {
            Self::Leader { .. } => Transition::StoppedLeading,
            Self::Candidate | Self::Follower { .. } => Transition::None,
        };
        let next = match holder {
            Some(holder) => Self::Follower { holder },
            None => Self::Candidate,
        };
        (next, transition)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_candidate_to_leader_starts_leading() {
        let renew_by = Instant::now() + Duration::from_secs(15);
        let (state, transition) = ElectionState::Candidate.acquired(renew_by, 1);
        assert_eq!(transition, Transition::StartedLeading);
        assert_eq!(state, ElectionState::Leader { renew_by, term: 1 });
    }

    #[test]
    fn test_renewal_is_not_a_transition() {
        let now = Instant::now();
        let leader = ElectionState::Leader {
            renew_by: now,
            term: 3,
        };
        let (state, transition) = leader.acquired(now + Duration::from_secs(15), 4);
        assert_eq!(transition, Transition::None);
        assert!(state.is_leader_at(now));
        assert_eq!(state.term_at(now), Some(3));
    }

    #[test]
    fn test_leader_losing_stops_leading_once() {
        let leader = ElectionState::Leader {
            renew_by: Instant::now(),
            term: 1,
        };
        let (state, transition) = leader.lost(Some("other".to_string()));
        assert_eq!(transition, Transition::StoppedLeading);
        assert_eq!(
            state,
            ElectionState::Follower {
                holder: "other".to_string()
            }
        );

        let (state, transition) = state.lost(None);
        assert_eq!(transition, Transition::None);
        assert_eq!(state, ElectionState::Candidate);
    }

    #[test]
    fn test_leadership_lapses_at_deadline() {
        let now = Instant::now();
        let state = ElectionState::Leader {
            renew_by: now + Duration::from_secs(15),
            term: 1,
        };
        assert!(state.is_leader_at(now));
        assert!(!state.is_leader_at(now + Duration::from_secs(15)));
        assert_eq!(state.term_at(now + Duration::from_secs(15)), None);
        assert!(!ElectionState::Candidate.is_leader_at(now));
    }
}
