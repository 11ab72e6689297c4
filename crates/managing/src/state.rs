//! Per-miner state behind its own lock.
//!
//! Each miner owns one `RwLock` so accounting on unrelated miners never
//! contends. Mutations take the write lock for the whole check, persist and
//! commit sequence; reads and sampling take the read lock only long enough to
//! copy a [`MinerView`].

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ratelimit::RateLimitRecord;
use crate::score::ScoreRecord;

/// The two records kept for every miner.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerRecords {
    pub score: ScoreRecord,
    pub rate_limit: RateLimitRecord,
}

/// Consistent copy of one miner's accounting state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinerView {
    pub remaining: u64,
    pub capacity: u64,
    pub representative_score: Option<f64>,
}

impl MinerView {
    /// Remaining quota as a fraction of capacity, zero when capacity is zero.
    pub fn headroom(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.remaining as f64 / self.capacity as f64
    }
}

#[derive(Debug)]
pub(crate) struct MinerEntry {
    pub(crate) records: MinerRecords,
    /// Set once any record for this miner reached the store.
    pub(crate) persisted: bool,
    /// Set when the miner is deregistered; holders of a stale `Arc` must re-resolve.
    pub(crate) retired: bool,
}

/// Lock-protected state for one miner.
#[derive(Debug)]
pub struct MinerState {
    entry: RwLock<MinerEntry>,
    first_seen: u64,
}

impl MinerState {
    pub(crate) fn new(records: MinerRecords, persisted: bool, now: u64) -> Self {
        Self {
            entry: RwLock::new(MinerEntry {
                records,
                persisted,
                retired: false,
            }),
            first_seen: now,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, MinerEntry> {
        self.entry.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, MinerEntry> {
        self.entry.write()
    }

    /// Milliseconds since the UNIX epoch when this process first saw the miner.
    pub fn first_seen(&self) -> u64 {
        self.first_seen
    }

    pub fn is_retired(&self) -> bool {
        self.read().retired
    }

    /// Copy of the records, `None` once retired.
    pub fn records(&self) -> Option<MinerRecords> {
        let entry = self.read();
        (!entry.retired).then(|| entry.records.clone())
    }

    /// View at `now` with window rollover projected, `None` once retired.
    pub fn view(&self, now: u64) -> Option<MinerView> {
        let entry = self.read();
        if entry.retired {
            return None;
        }
        let rate_limit = &entry.records.rate_limit;
        Some(MinerView {
            remaining: rate_limit.remaining_at(now),
            capacity: rate_limit.capacity(),
            representative_score: entry.records.score.representative_score(),
        })
    }
}
