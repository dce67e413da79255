//! Bounded record of finished rounds, most recent first.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::multiplier::Multiplier;

/// One finished round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub round_id: u64,
    pub crash_point: Multiplier,
    /// Milliseconds since the Unix epoch when the round crashed.
    pub timestamp: u64,
    /// Number of ledger entries when the round crashed.
    pub players: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
}

impl HistoryEntry {
    #[must_use]
    pub fn now(round_id: u64, crash_point: Multiplier, players: usize, server_seed: Option<String>) -> Self {
        Self {
            round_id,
            crash_point,
            timestamp: unix_millis(),
            players,
            server_seed,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// At most `capacity` entries; pushing past it evicts the oldest.
#[derive(Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Records a finished round at the front.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Owned copy for a wire message.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
