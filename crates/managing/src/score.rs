//! Bounded per-miner score history and its representative score.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One recorded score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub score: f64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
}

/// Bounded FIFO of the most recent scores for one miner.
///
/// The representative score is always derived from the current history, so it
/// can never drift from the mean of what is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    history: VecDeque<ScoreEntry>,
    max_len: usize,
}

impl ScoreRecord {
    /// `max_len` is clamped to at least one entry.
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            history: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// Rebuild from a persisted history, keeping only the most recent `max_len` entries.
    pub fn from_snapshot(snapshot: &ScoreHistorySnapshot, max_len: usize) -> Self {
        let mut record = Self::new(max_len);
        let skip = snapshot.entries.len().saturating_sub(record.max_len);
        record
            .history
            .extend(snapshot.entries.iter().skip(skip).copied());
        record
    }

    /// Append a score, evicting the oldest entry on overflow. Returns the new representative score.
    pub fn push(&mut self, score: f64, timestamp: u64) -> f64 {
        self.history.push_back(ScoreEntry { score, timestamp });
        while self.history.len() > self.max_len {
            self.history.pop_front();
        }
        self.representative_score().unwrap_or(score)
    }

    /// Arithmetic mean of the history, `None` when nothing has been recorded yet.
    pub fn representative_score(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let sum: f64 = self.history.iter().map(|entry| entry.score).sum();
        Some(sum / self.history.len() as f64)
    }

    /// Scores, most recent last.
    pub fn scores(&self) -> Vec<f64> {
        self.history.iter().map(|entry| entry.score).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScoreEntry> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn snapshot(&self) -> ScoreHistorySnapshot {
        ScoreHistorySnapshot {
            entries: self.history.iter().copied().collect(),
        }
    }
}

/// Persisted form of a score history (the long-lived, relational side of storage).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistorySnapshot {
    pub entries: Vec<ScoreEntry>,
}
