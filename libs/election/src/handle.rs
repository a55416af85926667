//! Read side of the election.

use tokio::sync::watch;
use tokio::time::Instant;

use crate::ElectionState;

/// Cheap, cloneable view of one replica's election state.
#[derive(Debug, Clone)]
pub struct ElectionHandle {
    identity: String,
    state: watch::Receiver<ElectionState>,
}

impl ElectionHandle {
    pub(crate) fn new(identity: String, state: watch::Receiver<ElectionState>) -> Self {
        Self { identity, state }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether mutating work may proceed right now.
    pub fn is_leader(&self) -> bool {
        self.state.borrow().is_leader_at(Instant::now())
    }

    /// The current leadership term while [`is_leader`](Self::is_leader)
    /// holds. A new value means leadership was gained again.
    pub fn leader_term(&self) -> Option<u64> {
        self.state.borrow().term_at(Instant::now())
    }

    pub fn state(&self) -> ElectionState {
        self.state.borrow().clone()
    }

    /// Identity of the last observed holder.
    pub fn leader(&self) -> Option<String> {
        match &*self.state.borrow() {
            ElectionState::Leader { .. } => Some(self.identity.clone()),
            ElectionState::Follower { holder } => Some(holder.clone()),
            ElectionState::Candidate => None,
        }
    }

    /// Wait for the next published state. Returns false once the elector has
    /// exited.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }
}
