//! Durable mirror of miner records (memory, file).
//!
//! Records are split the way the backing systems are: rate limit counters go to
//! the fast key-value side, score histories to the long-lived relational side.
//! A backend may route the two kinds to different systems.

mod file;
mod memory;

use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ratelimit::RateLimitRecord;
use crate::score::ScoreHistorySnapshot;
use crate::traits::MinerId;

pub use file::FileMinerStore;
pub use memory::MemoryMinerStore;

#[derive(Debug, Error)]
pub enum MinerStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Everything persisted for one miner.
///
/// `rate_limit` is `None` when only scores were ever written; such a miner is
/// restored with a fresh, full window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "Id: Serialize", deserialize = "Id: for<'a> Deserialize<'a>"))]
pub struct MinerSnapshot<Id> {
    pub id: Id,
    #[serde(default)]
    pub rate_limit: Option<RateLimitRecord>,
    #[serde(default)]
    pub scores: ScoreHistorySnapshot,
}

impl<Id> MinerSnapshot<Id> {
    pub fn empty(id: Id) -> Self {
        Self {
            id,
            rate_limit: None,
            scores: ScoreHistorySnapshot::default(),
        }
    }
}

/// Write-through persistence trait with auto-impl for &, Box, Arc.
///
/// Every method is synchronous: a successful return means the record is durable.
#[auto_impl(&, Box, Arc)]
pub trait MinerStore<Id: MinerId>: Send + Sync {
    fn load_all(&self) -> Result<Vec<MinerSnapshot<Id>>, MinerStoreError>;

    fn save_rate_limit(&self, id: &Id, record: &RateLimitRecord) -> Result<(), MinerStoreError>;

    fn save_score_history(
        &self,
        id: &Id,
        history: &ScoreHistorySnapshot,
    ) -> Result<(), MinerStoreError>;

    /// Remove both record kinds. Removing an unknown miner is not an error.
    fn remove(&self, id: &Id) -> Result<(), MinerStoreError>;

    fn get(&self, id: &Id) -> Result<Option<MinerSnapshot<Id>>, MinerStoreError>;

    fn contains(&self, id: &Id) -> Result<bool, MinerStoreError> {
        Ok(self.get(id)?.is_some())
    }

    fn count(&self) -> Result<usize, MinerStoreError>;

    fn flush(&self) -> Result<(), MinerStoreError> {
        Ok(())
    }
}
