//! Set of known miners, mapping each identity to its `Arc<MinerState>`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::state::MinerState;
use crate::traits::MinerId;

/// Type alias for the internal miner map to avoid clippy::type_complexity.
type MinerMap<Id> = HashMap<Id, Arc<MinerState>>;

/// Registry of miners. The map lock is only held to fetch or insert an `Arc`.
#[derive(Debug)]
pub struct MinerRegistry<Id: MinerId> {
    miners: RwLock<MinerMap<Id>>,
}

impl<Id: MinerId> Default for MinerRegistry<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: MinerId> MinerRegistry<Id> {
    pub fn new() -> Self {
        Self {
            miners: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &Id) -> Option<Arc<MinerState>> {
        self.miners.read().get(id).map(Arc::clone)
    }

    /// Get or create miner state. The bool is true if this call inserted it.
    pub fn get_or_insert_with(
        &self,
        id: &Id,
        make: impl FnOnce() -> MinerState,
    ) -> (Arc<MinerState>, bool) {
        // Fast path: read lock
        if let Some(state) = self.miners.read().get(id) {
            return (Arc::clone(state), false);
        }

        // Slow path: write lock (only on first access per miner)
        let mut miners = self.miners.write();

        // Double-check after acquiring write lock
        if let Some(state) = miners.get(id) {
            return (Arc::clone(state), false);
        }

        let state = Arc::new(make());
        miners.insert(id.clone(), Arc::clone(&state));
        debug!(%id, "new miner added to registry");

        (state, true)
    }

    /// Insert restored state, replacing anything present.
    pub fn insert(&self, id: Id, state: MinerState) {
        self.miners.write().insert(id, Arc::new(state));
    }

    /// Remove `id` only if it still maps to `state`, so a newer registration is left alone.
    pub fn remove_if_same(&self, id: &Id, state: &Arc<MinerState>) -> bool {
        let mut miners = self.miners.write();
        match miners.get(id) {
            Some(current) if Arc::ptr_eq(current, state) => {
                miners.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.miners.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.miners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities known at call time.
    pub fn ids(&self) -> Vec<Id> {
        self.miners.read().keys().cloned().collect()
    }

    /// Cloned `Arc`s for every miner; the map lock is released before returning.
    pub fn entries(&self) -> Vec<(Id, Arc<MinerState>)> {
        self.miners
            .read()
            .iter()
            .map(|(id, state)| (id.clone(), Arc::clone(state)))
            .collect()
    }
}
