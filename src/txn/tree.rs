// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Shared engine state: the scope registry, conflict rules, merge
//! bookkeeping, and garbage collection.
//!
//! Everything here is pure in-memory bookkeeping; backend I/O stays in the
//! sync and async front ends, which both drive this state machine.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::mem;

use tracing::debug;

use super::buffers::ScopeBuffers;
use super::error::TxnError;
use super::outcome::{ChangeSet, WriteConflict};
use super::undo::UndoCache;
use super::version::{VersionIndex, Visibility};
use super::{TxnId, TxnState};

/// Result of checking a scope's own buffers for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BufferHit<V> {
    /// The scope has buffered this value.
    Value(V),
    /// The scope has buffered a removal.
    Tombstone,
    /// The scope has not touched the key.
    Miss,
}

/// How a snapshot read should obtain a key's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SnapshotRead<V> {
    /// The backend's live value is correct at this snapshot.
    Backend,
    /// The key is absent at this snapshot.
    Absent,
    /// The value was resolved from the undo cache.
    Value(V),
    /// The history says a pre-image superseded at this version is required,
    /// but the undo cache no longer holds it.
    MissingPreimage(u64),
}

/// How a snapshot existence check resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SnapshotExists {
    /// Defer to the backend's live state.
    Backend,
    Present,
    Missing,
}

/// Statistics from one garbage-collection pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GcStats {
    pub undo_records_pruned: u64,
    pub undo_keys_dropped: u64,
    pub index_records_pruned: u64,
}

/// One registered transaction scope.
#[derive(Debug)]
pub(crate) struct Scope<K, V> {
    /// Immediate parent; `None` only for the root.
    pub parent: Option<TxnId>,
    /// Global version frozen at creation. The root's watermark floats at
    /// the current global version instead.
    pub snapshot_version: u64,
    /// The parent's local tick at creation, for sibling conflict detection.
    pub snapshot_local: u64,
    pub state: TxnState,
    pub buffers: ScopeBuffers<K, V>,
}

/// The engine's shared state: global version counter, per-key history,
/// pre-image cache, and the tree of registered scopes.
#[derive(Debug)]
pub(crate) struct EngineState<K, V> {
    global_version: u64,
    next_id: u64,
    versions: VersionIndex<K>,
    undo: UndoCache<K, V>,
    scopes: HashMap<TxnId, Scope<K, V>>,
}

impl<K, V> EngineState<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug,
    V: Clone + fmt::Debug,
{
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(
            TxnId::ROOT,
            Scope {
                parent: None,
                snapshot_version: 0,
                snapshot_local: 0,
                state: TxnState::Open,
                buffers: ScopeBuffers::new(),
            },
        );
        Self {
            global_version: 0,
            next_id: 1,
            versions: VersionIndex::new(),
            undo: UndoCache::new(),
            scopes,
        }
    }

    fn scope(&self, id: TxnId) -> Option<&Scope<K, V>> {
        self.scopes.get(&id)
    }

    fn scope_mut(&mut self, id: TxnId) -> Option<&mut Scope<K, V>> {
        self.scopes.get_mut(&id)
    }

    /// Fails with `AlreadyCommitted` unless the scope is registered and open.
    pub fn ensure_open(&self, id: TxnId) -> Result<(), TxnError> {
        match self.scope(id) {
            Some(scope) if scope.state == TxnState::Open => Ok(()),
            _ => Err(TxnError::AlreadyCommitted),
        }
    }

    /// Fails with `AncestorCommitted` if any ancestor of the scope has
    /// closed (or was dropped).
    pub fn ancestors_open(&self, id: TxnId) -> Result<(), TxnError> {
        let mut cursor = self.scope(id).and_then(|scope| scope.parent);
        while let Some(ancestor) = cursor {
            match self.scope(ancestor) {
                Some(scope) if scope.state == TxnState::Open => cursor = scope.parent,
                _ => return Err(TxnError::AncestorCommitted),
            }
        }
        Ok(())
    }

    pub fn parent_of(&self, id: TxnId) -> Option<TxnId> {
        self.scope(id).and_then(|scope| scope.parent)
    }

    /// The visibility watermark for a scope's reads: the frozen snapshot
    /// for nested scopes, the current global version for the root.
    pub fn snapshot_of(&self, id: TxnId) -> u64 {
        if id == TxnId::ROOT {
            self.global_version
        } else {
            self.scope(id)
                .map_or(self.global_version, |scope| scope.snapshot_version)
        }
    }

    /// Registers a child under `parent`. Children of the root snapshot at
    /// the current global version; deeper children inherit their parent's
    /// snapshot so a sibling committing never widens their view.
    pub fn begin_nested(&mut self, parent: TxnId) -> Result<TxnId, TxnError> {
        self.ensure_open(parent)?;
        let snapshot_version = self.snapshot_of(parent);
        let snapshot_local = self
            .scope(parent)
            .map_or(0, |scope| scope.buffers.local_version);

        let id = TxnId(self.next_id);
        self.next_id += 1;
        self.scopes.insert(
            id,
            Scope {
                parent: Some(parent),
                snapshot_version,
                snapshot_local,
                state: TxnState::Open,
                buffers: ScopeBuffers::new(),
            },
        );
        Ok(id)
    }

    /// Marks a scope closed and discards its buffers. The registry entry
    /// stays until the handle drops so late operations can be rejected.
    pub fn close(&mut self, id: TxnId) {
        if let Some(scope) = self.scope_mut(id) {
            scope.state = TxnState::Closed;
            scope.buffers = ScopeBuffers::new();
        }
    }

    /// Clears the root's buffers after a commit or rollback; the root
    /// itself stays open.
    pub fn reset_root(&mut self) {
        if let Some(scope) = self.scope_mut(TxnId::ROOT) {
            scope.buffers = ScopeBuffers::new();
        }
    }

    /// Deregisters a scope entirely (handle drop).
    pub fn remove(&mut self, id: TxnId) {
        if id != TxnId::ROOT {
            self.scopes.remove(&id);
        }
    }

    // ------------------------------------------------------------------
    // Buffer access
    // ------------------------------------------------------------------

    pub fn buffered(&self, id: TxnId, key: &K) -> BufferHit<V> {
        let Some(scope) = self.scope(id) else {
            return BufferHit::Miss;
        };
        if let Some(value) = scope.buffers.writes.get(key) {
            BufferHit::Value(value.clone())
        } else if scope.buffers.deletes.contains(key) {
            BufferHit::Tombstone
        } else {
            BufferHit::Miss
        }
    }

    pub fn write_buffered(&self, id: TxnId, key: &K) -> bool {
        self.scope(id)
            .is_some_and(|scope| scope.buffers.writes.contains_key(key))
    }

    pub fn delete_buffered(&self, id: TxnId, key: &K) -> bool {
        self.scope(id)
            .is_some_and(|scope| scope.buffers.deletes.contains(key))
    }

    pub fn created_contains(&self, id: TxnId, key: &K) -> bool {
        self.scope(id)
            .is_some_and(|scope| scope.buffers.created.contains(key))
    }

    pub fn write_value(&self, id: TxnId, key: &K) -> Option<V> {
        self.scope(id)
            .and_then(|scope| scope.buffers.writes.get(key).cloned())
    }

    pub fn stage_create(&mut self, id: TxnId, key: K, value: V) -> Result<(), TxnError> {
        let scope = self.scope_mut(id).ok_or(TxnError::AlreadyCommitted)?;
        scope.buffers.stage_create(key, value);
        Ok(())
    }

    pub fn stage_write(&mut self, id: TxnId, key: K, value: V) -> Result<(), TxnError> {
        let scope = self.scope_mut(id).ok_or(TxnError::AlreadyCommitted)?;
        scope.buffers.stage_write(key, value);
        Ok(())
    }

    pub fn stage_delete(
        &mut self,
        id: TxnId,
        key: K,
        preimage: V,
        from_snapshot: bool,
    ) -> Result<(), TxnError> {
        let scope = self.scope_mut(id).ok_or(TxnError::AlreadyCommitted)?;
        scope.buffers.stage_delete(key, preimage, from_snapshot);
        Ok(())
    }

    /// Classifies a scope's buffered changes for reporting.
    pub fn changes_of(&self, id: TxnId) -> ChangeSet<K, V> {
        self.scope(id)
            .map_or_else(ChangeSet::new, |scope| scope.buffers.changes())
    }

    /// Takes a scope's buffers, leaving them empty.
    pub fn take_buffers(&mut self, id: TxnId) -> ScopeBuffers<K, V> {
        self.scope_mut(id)
            .map_or_else(ScopeBuffers::new, |scope| mem::take(&mut scope.buffers))
    }

    // ------------------------------------------------------------------
    // Snapshot resolution
    // ------------------------------------------------------------------

    /// Resolves how a snapshot read should obtain a key's value.
    pub fn resolve_read(&self, key: &K, snapshot: u64) -> SnapshotRead<V> {
        match self.versions.resolve(key, snapshot) {
            Visibility::Untracked => {
                if self.undo.contains(key) {
                    SnapshotRead::Absent
                } else {
                    SnapshotRead::Backend
                }
            }
            Visibility::Absent => SnapshotRead::Absent,
            Visibility::Live => SnapshotRead::Backend,
            Visibility::Superseded(version) => match self.undo.lookup(key, version) {
                Some(value) => SnapshotRead::Value(value.clone()),
                None => SnapshotRead::MissingPreimage(version),
            },
            Visibility::PreHistory(version) => match self.undo.lookup(key, version) {
                Some(value) => SnapshotRead::Value(value.clone()),
                None => SnapshotRead::Absent,
            },
        }
    }

    /// Resolves a snapshot existence check without touching pre-images
    /// unless the key predates its own engine history.
    pub fn resolve_exists(&self, key: &K, snapshot: u64) -> SnapshotExists {
        match self.versions.resolve(key, snapshot) {
            Visibility::Untracked => {
                if self.undo.contains(key) {
                    SnapshotExists::Missing
                } else {
                    SnapshotExists::Backend
                }
            }
            Visibility::Absent => SnapshotExists::Missing,
            Visibility::Live | Visibility::Superseded(_) => SnapshotExists::Present,
            Visibility::PreHistory(version) => {
                if self.undo.lookup(key, version).is_some() {
                    SnapshotExists::Present
                } else {
                    SnapshotExists::Missing
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Conflict detection
    // ------------------------------------------------------------------

    /// Detects whether the parent (or a sibling that already merged into
    /// it) touched one of the committer's keys after the committer forked.
    pub fn sibling_conflict(&self, id: TxnId) -> Option<WriteConflict<K, V>> {
        let child = self.scope(id)?;
        let parent = self.scope(child.parent?)?;

        for key in child.buffers.pending_keys() {
            if let Some(&tick) = parent.buffers.touched.get(key) {
                if tick > child.snapshot_local {
                    return Some(WriteConflict {
                        key: key.clone(),
                        parent_value: parent.buffers.writes.get(key).cloned(),
                        child_value: child.buffers.writes.get(key).cloned(),
                    });
                }
            }
        }
        None
    }

    /// Detects whether a newer version than the committer's snapshot has
    /// been persisted for one of its keys.
    pub fn persisted_conflict(&self, id: TxnId) -> Option<K> {
        let scope = self.scope(id)?;
        let snapshot = self.snapshot_of(id);

        for key in scope.buffers.pending_keys() {
            if let Some(last) = self.versions.last_version(key) {
                if last > snapshot {
                    return Some(key.clone());
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    /// Folds a scope's buffers into its parent's under a single fresh
    /// parent tick. The caller has already run conflict detection.
    pub fn merge_into_parent(&mut self, id: TxnId) -> Result<(), TxnError> {
        let parent_id = self
            .scope(id)
            .and_then(|scope| scope.parent)
            .ok_or(TxnError::AlreadyCommitted)?;
        let child_buffers = self.take_buffers(id);
        let parent = self
            .scope_mut(parent_id)
            .ok_or(TxnError::AncestorCommitted)?;

        let tick = parent.buffers.tick();
        let ScopeBuffers {
            writes,
            deletes,
            created,
            mut deleted_values,
            preexisting,
            ..
        } = child_buffers;

        for (key, value) in writes {
            if created.contains(&key) {
                parent.buffers.created.insert(key.clone());
            }
            parent.buffers.deletes.remove(&key);
            parent.buffers.touched.insert(key.clone(), tick);
            parent.buffers.writes.insert(key, value);
        }

        for key in deletes {
            parent.buffers.writes.remove(&key);
            parent.buffers.created.remove(&key);
            if let Some(preimage) = deleted_values.remove(&key) {
                parent.buffers.deleted_values.insert(key.clone(), preimage);
            }
            if preexisting.contains(&key) {
                parent.buffers.preexisting.insert(key.clone());
            }
            parent.buffers.touched.insert(key.clone(), tick);
            parent.buffers.deletes.insert(key);
        }

        debug!(child = ?id, parent = ?parent_id, tick, "merged scope into parent");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence bookkeeping
    // ------------------------------------------------------------------

    /// The version the next persisted commit will carry.
    pub fn allocate_version(&self) -> u64 {
        self.global_version + 1
    }

    /// Records one persisted overwrite: the displaced backend value (if
    /// any) rotates into the undo cache and the history gains a live record.
    pub fn record_applied_write(&mut self, key: &K, preimage: Option<V>, version: u64) {
        if let Some(value) = preimage {
            self.undo.push(key.clone(), value, version);
        }
        self.versions.append(key.clone(), version, true);
    }

    /// Records one persisted removal.
    pub fn record_applied_delete(&mut self, key: &K, preimage: Option<V>, version: u64) {
        if let Some(value) = preimage {
            self.undo.push(key.clone(), value, version);
        }
        self.versions.append(key.clone(), version, false);
    }

    /// Publishes a fully (or partially, after a backend failure) applied
    /// version as the new global version.
    pub fn publish_version(&mut self, version: u64) {
        debug_assert!(version > self.global_version);
        self.global_version = version;
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// The oldest snapshot any open nested scope can still read, or the
    /// current global version when none is open.
    pub fn min_live_snapshot(&self) -> u64 {
        self.scopes
            .values()
            .filter(|scope| scope.parent.is_some() && scope.state == TxnState::Open)
            .map(|scope| scope.snapshot_version)
            .min()
            .unwrap_or(self.global_version)
    }

    /// Prunes pre-images and history records no live snapshot can reach.
    pub fn collect_garbage(&mut self) -> GcStats {
        let min_live = self.min_live_snapshot();
        let (undo_records_pruned, undo_keys_dropped) = self.undo.prune(min_live);
        let index_records_pruned = self.versions.prune(min_live);
        let stats = GcStats {
            undo_records_pruned,
            undo_keys_dropped,
            index_records_pruned,
        };
        debug!(min_live, ?stats, "pruned version metadata");
        stats
    }
}
