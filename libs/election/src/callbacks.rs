//! Transition notifications.

use tracing::info;

/// Hooks fired by the elector on state changes.
///
/// `on_started_leading` and `on_stopped_leading` strictly alternate, starting
/// with `on_started_leading`, and `on_stopped_leading` always runs before the
/// next acquisition attempt. Hooks run on the elector task and should return
/// quickly.
pub trait LeaderCallbacks: Send + Sync + 'static {
    fn on_started_leading(&self) {}

    fn on_stopped_leading(&self) {}

    /// The observed lease holder changed. Observability only.
    fn on_new_leader(&self, _identity: &str) {}
}

/// Logs every transition.
#[derive(Debug, Clone, Default)]
pub struct TracingCallbacks {
    identity: String,
}

impl TracingCallbacks {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl LeaderCallbacks for TracingCallbacks {
    fn on_started_leading(&self) {
        info!(identity = %self.identity, "Started leading");
    }

    fn on_stopped_leading(&self) {
        info!(identity = %self.identity, "Stopped leading");
    }

    fn on_new_leader(&self, identity: &str) {
        if identity == self.identity {
            info!(identity, "This replica is the new leader");
        } else {
            info!(leader = identity, identity = %self.identity, "Observed new leader");
        }
    }
}
