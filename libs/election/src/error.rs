use hydra_lease::LeaseError;
use thiserror::Error;

/// Errors that end or prevent an election.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid election config: {0}")]
    InvalidConfig(String),

    /// A store failure the election cannot recover from.
    #[error("lease store failure: {0}")]
    Store(#[from] LeaseError),
}
