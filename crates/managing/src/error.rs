//! Errors returned by the managing service.

use thiserror::Error;

use crate::store::MinerStoreError;

#[derive(Debug, Error)]
pub enum ManagingError {
    /// Only returned when pre-registration is required.
    #[error("unknown miner: {0}")]
    UnknownMiner(String),
    #[error("invalid consume amount: {0}")]
    InvalidAmount(u64),
    #[error("invalid score: {0}")]
    InvalidScore(f64),
    /// Reserve thresholds must lie in `(0, 1]`.
    #[error("invalid quota threshold: {0}")]
    InvalidThreshold(f64),
    #[error("invalid rate limit policy: {0}")]
    InvalidPolicy(String),
    /// The durable write failed; the in-memory state was left untouched.
    #[error("storage write failed: {0}")]
    StorageWriteFailed(#[from] MinerStoreError),
    /// Expected sampling outcome when no miner qualifies. Callers decide how to fall back.
    #[error("no eligible miner")]
    NoEligibleMiner,
}

impl ManagingError {
    pub fn is_no_eligible_miner(&self) -> bool {
        matches!(self, Self::NoEligibleMiner)
    }
}
