//! JSON file-based miner store with atomic writes.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::ratelimit::RateLimitRecord;
use crate::score::ScoreHistorySnapshot;
use crate::traits::MinerId;

use super::{MinerSnapshot, MinerStore, MinerStoreError};

type MinerMap<Id> = HashMap<Id, MinerSnapshot<Id>>;

/// JSON file store. Loaded to memory on open, rewritten on every mutation.
///
/// Each write goes to a temp file which is then renamed over the target, so a
/// crash leaves either the old or the new file. A failed write leaves the
/// cached map as it was before the call.
///
/// Every mutation holds one store-wide lock while it serializes and syncs the
/// whole map, so writes for different miners are serialized here even though
/// the service locks miners independently. Suited to small registries and
/// tooling; high write rates need a backend with per-record writes.
pub struct FileMinerStore<Id: MinerId> {
    path: PathBuf,
    miners: RwLock<MinerMap<Id>>,
}

impl<Id: MinerId> FileMinerStore<Id> {
    /// Load existing file or create empty store.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, MinerStoreError> {
        let path = path.into();
        let miners = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), count = miners.len(), "opened miner store");

        Ok(Self {
            path,
            miners: RwLock::new(miners),
        })
    }

    /// Create store, making parent directories if needed.
    pub fn new_with_create_dir(path: impl Into<PathBuf>) -> Result<Self, MinerStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_file(path: &Path) -> Result<MinerMap<Id>, MinerStoreError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let snapshots: Vec<MinerSnapshot<Id>> = serde_json::from_reader(reader)
            .map_err(|e| MinerStoreError::Serialization(e.to_string()))?;

        let mut miners = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            miners.insert(snapshot.id.clone(), snapshot);
        }

        Ok(miners)
    }

    fn write_file(&self, miners: &MinerMap<Id>) -> Result<(), MinerStoreError> {
        let snapshots: Vec<&MinerSnapshot<Id>> = miners.values().collect();

        // Write to temp file first, then rename (atomic)
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &snapshots)
                .map_err(|e| MinerStoreError::Serialization(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Apply `f` to one miner's entry and persist, restoring the previous entry if the write fails.
    fn update_entry(
        &self,
        id: &Id,
        f: impl FnOnce(Option<MinerSnapshot<Id>>) -> Option<MinerSnapshot<Id>>,
    ) -> Result<(), MinerStoreError> {
        let mut miners = self.miners.write();
        let previous = miners.remove(id);
        if let Some(next) = f(previous.clone()) {
            miners.insert(id.clone(), next);
        }

        if let Err(e) = self.write_file(&miners) {
            warn!(%id, error = %e, "miner store write failed, keeping previous record");
            match previous {
                Some(previous) => miners.insert(id.clone(), previous),
                None => miners.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }
}

impl<Id: MinerId> MinerStore<Id> for FileMinerStore<Id> {
    fn load_all(&self) -> Result<Vec<MinerSnapshot<Id>>, MinerStoreError> {
        Ok(self.miners.read().values().cloned().collect())
    }

    fn save_rate_limit(&self, id: &Id, record: &RateLimitRecord) -> Result<(), MinerStoreError> {
        self.update_entry(id, |existing| {
            let mut snapshot = existing.unwrap_or_else(|| MinerSnapshot::empty(id.clone()));
            snapshot.rate_limit = Some(record.clone());
            Some(snapshot)
        })
    }

    fn save_score_history(
        &self,
        id: &Id,
        history: &ScoreHistorySnapshot,
    ) -> Result<(), MinerStoreError> {
        self.update_entry(id, |existing| {
            let mut snapshot = existing.unwrap_or_else(|| MinerSnapshot::empty(id.clone()));
            snapshot.scores = history.clone();
            Some(snapshot)
        })
    }

    fn remove(&self, id: &Id) -> Result<(), MinerStoreError> {
        if !self.miners.read().contains_key(id) {
            return Ok(());
        }
        self.update_entry(id, |_| None)
    }

    fn get(&self, id: &Id) -> Result<Option<MinerSnapshot<Id>>, MinerStoreError> {
        Ok(self.miners.read().get(id).cloned())
    }

    fn count(&self) -> Result<usize, MinerStoreError> {
        Ok(self.miners.read().len())
    }

    fn flush(&self) -> Result<(), MinerStoreError> {
        let miners = self.miners.read();
        self.write_file(&miners)
    }
}
