//! In-memory miner store (does not persist across restarts).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::ratelimit::RateLimitRecord;
use crate::score::ScoreHistorySnapshot;
use crate::traits::MinerId;

use super::{MinerSnapshot, MinerStore, MinerStoreError};

/// In-memory miner store for testing and ephemeral deployments.
pub struct MemoryMinerStore<Id: MinerId> {
    miners: RwLock<HashMap<Id, MinerSnapshot<Id>>>,
}

impl<Id: MinerId> Default for MemoryMinerStore<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: MinerId> MemoryMinerStore<Id> {
    pub fn new() -> Self {
        Self {
            miners: RwLock::new(HashMap::new()),
        }
    }
}

impl<Id: MinerId> MinerStore<Id> for MemoryMinerStore<Id> {
    fn load_all(&self) -> Result<Vec<MinerSnapshot<Id>>, MinerStoreError> {
        Ok(self.miners.read().values().cloned().collect())
    }

    fn save_rate_limit(&self, id: &Id, record: &RateLimitRecord) -> Result<(), MinerStoreError> {
        self.miners
            .write()
            .entry(id.clone())
            .or_insert_with(|| MinerSnapshot::empty(id.clone()))
            .rate_limit = Some(record.clone());
        Ok(())
    }

    fn save_score_history(
        &self,
        id: &Id,
        history: &ScoreHistorySnapshot,
    ) -> Result<(), MinerStoreError> {
        self.miners
            .write()
            .entry(id.clone())
            .or_insert_with(|| MinerSnapshot::empty(id.clone()))
            .scores = history.clone();
        Ok(())
    }

    fn remove(&self, id: &Id) -> Result<(), MinerStoreError> {
        self.miners.write().remove(id);
        Ok(())
    }

    fn get(&self, id: &Id) -> Result<Option<MinerSnapshot<Id>>, MinerStoreError> {
        Ok(self.miners.read().get(id).cloned())
    }

    fn count(&self) -> Result<usize, MinerStoreError> {
        Ok(self.miners.read().len())
    }
}
