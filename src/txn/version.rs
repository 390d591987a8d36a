// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-key commit history and snapshot visibility resolution.

use std::collections::HashMap;
use std::hash::Hash;

/// One persisted change to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VersionRecord {
    pub version: u64,
    pub exists: bool,
}

/// How a key resolves at a given snapshot version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    /// The key has never passed through the engine; the backend's live
    /// state is authoritative.
    Untracked,
    /// The key is logically absent at the snapshot.
    Absent,
    /// The newest record at or below the snapshot is live and has not been
    /// superseded; the backend holds the correct value.
    Live,
    /// The visible value was overwritten or deleted at this later version;
    /// its pre-image must be in the undo cache.
    Superseded(u64),
    /// Every record is newer than the snapshot. If the key held a value
    /// before the engine first touched it, that value was captured in the
    /// undo cache under the first record's version.
    PreHistory(u64),
}

/// Per-key sequence of `(version, exists)` records, strictly ordered by
/// version within each key.
#[derive(Debug, Default)]
pub(crate) struct VersionIndex<K> {
    histories: HashMap<K, Vec<VersionRecord>>,
}

impl<K> VersionIndex<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            histories: HashMap::new(),
        }
    }

    /// Appends a record for a key. Versions must arrive in increasing order.
    pub fn append(&mut self, key: K, version: u64, exists: bool) {
        let records = self.histories.entry(key).or_default();
        debug_assert!(records.last().map_or(true, |r| r.version < version));
        records.push(VersionRecord { version, exists });
    }

    /// The newest persisted version for a key, if any.
    pub fn last_version(&self, key: &K) -> Option<u64> {
        self.histories
            .get(key)
            .and_then(|records| records.last())
            .map(|record| record.version)
    }

    /// Resolves a key's visibility at a snapshot version.
    ///
    /// Walks the history tracking the newest record at or below the
    /// snapshot (`target`) and the first record above it (`next`).
    pub fn resolve(&self, key: &K, snapshot: u64) -> Visibility {
        let Some(records) = self.histories.get(key) else {
            return Visibility::Untracked;
        };

        let mut target: Option<&VersionRecord> = None;
        let mut next: Option<u64> = None;
        for record in records {
            if record.version <= snapshot {
                target = Some(record);
            } else {
                next = Some(record.version);
                break;
            }
        }

        match (target, next) {
            (None, Some(first)) => Visibility::PreHistory(first),
            (None, None) => Visibility::Absent,
            (Some(record), _) if !record.exists => Visibility::Absent,
            (Some(_), None) => Visibility::Live,
            (Some(_), Some(next)) => Visibility::Superseded(next),
        }
    }

    /// Drops records no live snapshot can reach: everything older than the
    /// newest record at or below `min_live`, which itself is retained to
    /// answer visibility for the oldest live snapshot.
    pub fn prune(&mut self, min_live: u64) -> u64 {
        let mut dropped = 0u64;
        for records in self.histories.values_mut() {
            if let Some(pivot) = records.iter().rposition(|r| r.version <= min_live) {
                if pivot > 0 {
                    records.drain(..pivot);
                    dropped += pivot as u64;
                }
            }
        }
        dropped
    }

    #[cfg(test)]
    pub fn record_count(&self, key: &K) -> usize {
        self.histories.get(key).map_or(0, Vec::len)
    }
}
