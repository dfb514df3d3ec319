use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("cryptotally: threshold {threshold} out of range for a committee of {committee}")]
    InvalidThreshold { threshold: usize, committee: usize },

    #[error("cryptotally: vote must be 0 or 1, got {0}")]
    InvalidVote(i64),

    #[error("cryptotally: CBOR encoding error: {0}")]
    Encoding(#[from] serde_cbor::Error),

    #[error("cryptotally: persisted vote disagrees with the vote this voter was created with")]
    PersistedVoteMismatch,

    #[error("cryptotally: persisted share vector has length {actual}, expected {expected}")]
    PersistedShareCount { expected: usize, actual: usize },
}
