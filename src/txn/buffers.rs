// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Per-scope transaction buffers.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use super::outcome::ChangeSet;

/// Buffered state of one transaction scope.
///
/// Invariants:
/// - `writes` and `deletes` are disjoint.
/// - every key in `created` is also in `writes`.
/// - `touched` records the local tick of the last mutation per key.
#[derive(Debug)]
pub(crate) struct ScopeBuffers<K, V> {
    /// Pending inserts and overwrites.
    pub writes: HashMap<K, V>,
    /// Pending removals.
    pub deletes: HashSet<K>,
    /// Keys inserted (rather than overwritten) by this scope.
    pub created: HashSet<K>,
    /// Pre-images captured at delete time, for reporting.
    pub deleted_values: HashMap<K, V>,
    /// Deleted keys whose pre-image came from the committed snapshot rather
    /// than an insert inside this scope.
    pub preexisting: HashSet<K>,
    /// Monotonic per-scope tick.
    pub local_version: u64,
    /// Last tick at which each key was touched.
    pub touched: HashMap<K, u64>,
}

impl<K, V> ScopeBuffers<K, V> {
    pub fn new() -> Self {
        Self {
            writes: HashMap::new(),
            deletes: HashSet::new(),
            created: HashSet::new(),
            deleted_values: HashMap::new(),
            preexisting: HashSet::new(),
            local_version: 0,
            touched: HashMap::new(),
        }
    }

    /// Allocates the next local tick.
    pub fn tick(&mut self) -> u64 {
        self.local_version += 1;
        self.local_version
    }
}

impl<K, V> Default for ScopeBuffers<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ScopeBuffers<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Buffers an insert.
    pub fn stage_create(&mut self, key: K, value: V) {
        self.deletes.remove(&key);
        self.preexisting.remove(&key);
        self.created.insert(key.clone());
        self.writes.insert(key.clone(), value);
        let tick = self.tick();
        self.touched.insert(key, tick);
    }

    /// Buffers an overwrite.
    pub fn stage_write(&mut self, key: K, value: V) {
        self.deletes.remove(&key);
        self.writes.insert(key.clone(), value);
        let tick = self.tick();
        self.touched.insert(key, tick);
    }

    /// Buffers a removal. `from_snapshot` marks a pre-image that came from
    /// the committed snapshot rather than an insert inside this scope.
    pub fn stage_delete(&mut self, key: K, preimage: V, from_snapshot: bool) {
        self.writes.remove(&key);
        self.created.remove(&key);
        self.deleted_values.insert(key.clone(), preimage);
        if from_snapshot {
            self.preexisting.insert(key.clone());
        }
        self.deletes.insert(key.clone());
        let tick = self.tick();
        self.touched.insert(key, tick);
    }

    /// Keys this scope has pending changes for.
    pub fn pending_keys(&self) -> impl Iterator<Item = &K> {
        self.writes.keys().chain(self.deletes.iter())
    }

    /// Classifies the buffered changes for reporting.
    ///
    /// A written key is `created` if this scope inserted it, else `updated`.
    /// A deleted key is reported only if it held a committed value when this
    /// scope removed it; an insert-then-remove is invisible to the parent.
    pub fn changes(&self) -> ChangeSet<K, V> {
        let mut changes = ChangeSet::new();
        for (key, value) in &self.writes {
            if self.created.contains(key) {
                changes.created.push((key.clone(), value.clone()));
            } else {
                changes.updated.push((key.clone(), value.clone()));
            }
        }
        for key in &self.deletes {
            if self.preexisting.contains(key) {
                if let Some(preimage) = self.deleted_values.get(key) {
                    changes.deleted.push((key.clone(), preimage.clone()));
                }
            }
        }
        changes
    }
}
