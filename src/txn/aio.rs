// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous transaction engine.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::AsyncKvBackend;

use super::error::TxnError;
use super::outcome::{ChangeSet, CommitOutcome, WriteConflict};
use super::tree::{BufferHit, EngineState, SnapshotExists, SnapshotRead};
use super::TxnId;

struct AsyncShared<B: AsyncKvBackend> {
    backend: B,
    /// In-memory bookkeeping; never held across an await.
    state: Mutex<EngineState<B::Key, B::Value>>,
    /// Write critical section: commit and merge run entirely inside it,
    /// serialising all committers. Reads never take it.
    gate: RwLock<()>,
}

/// A transaction over an asynchronous backend.
///
/// Same semantics as the synchronous [`Transaction`](super::Transaction):
/// one long-lived root, nested scopes snapshotted at creation, buffered
/// changes merged upward on `commit`. Suspension points occur at each
/// backend call; committers serialise on the root's write critical section
/// while snapshot readers proceed concurrently against the undo cache.
pub struct AsyncTransaction<B: AsyncKvBackend> {
    shared: Arc<AsyncShared<B>>,
    id: TxnId,
}

impl<B: AsyncKvBackend> AsyncTransaction<B> {
    /// Creates the root transaction owning `backend`.
    pub fn root(backend: B) -> Self {
        Self {
            shared: Arc::new(AsyncShared {
                backend,
                state: Mutex::new(EngineState::new()),
                gate: RwLock::new(()),
            }),
            id: TxnId::ROOT,
        }
    }

    /// Opens a child scope snapshotted at this scope's current view.
    pub fn begin_nested(&self) -> Result<Self, TxnError> {
        let id = self.shared.state.lock().begin_nested(self.id)?;
        Ok(Self {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    /// Returns this scope's identifier.
    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns true if the scope can still accept operations.
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().ensure_open(self.id).is_ok()
    }

    /// The global version this scope's reads resolve against.
    pub fn snapshot_version(&self) -> u64 {
        self.shared.state.lock().snapshot_of(self.id)
    }

    /// Returns the backend this engine persists into.
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Buffers an insert. Fails with `AlreadyExists` if the key is visible
    /// to this scope, either buffered or committed.
    pub async fn create(&self, key: B::Key, value: B::Value) -> Result<&Self, TxnError> {
        self.ensure_open()?;
        if self.with_state(|st| st.write_buffered(self.id, &key)) {
            return Err(TxnError::already_exists(&key));
        }
        let deleted = self.with_state(|st| st.delete_buffered(self.id, &key));
        if !deleted && self.snapshot_exists(&key).await? {
            return Err(TxnError::already_exists(&key));
        }
        self.with_state(|st| {
            st.ensure_open(self.id)?;
            st.stage_create(self.id, key, value)
        })?;
        Ok(self)
    }

    /// Buffers an overwrite. Fails with `NotFound` unless the key is
    /// visible to this scope.
    pub async fn write(&self, key: B::Key, value: B::Value) -> Result<&Self, TxnError> {
        self.ensure_open()?;
        if !self.with_state(|st| st.write_buffered(self.id, &key)) {
            let deleted = self.with_state(|st| st.delete_buffered(self.id, &key));
            if deleted || !self.snapshot_exists(&key).await? {
                return Err(TxnError::not_found(&key));
            }
        }
        self.with_state(|st| {
            st.ensure_open(self.id)?;
            st.stage_write(self.id, key, value)
        })?;
        Ok(self)
    }

    /// Buffers a removal, capturing the pre-image for reporting. The
    /// pre-image of a key this scope did not itself insert is the committed
    /// snapshot value, so a buffered overwrite never masks it.
    pub async fn delete(&self, key: B::Key) -> Result<&Self, TxnError> {
        self.ensure_open()?;
        let (preimage, from_snapshot) = if self.with_state(|st| st.created_contains(self.id, &key))
        {
            (self.with_state(|st| st.write_value(self.id, &key)), false)
        } else if self.with_state(|st| st.delete_buffered(self.id, &key)) {
            (None, false)
        } else {
            match self.snapshot_value(&key).await? {
                Some(value) => (Some(value), true),
                // Write-buffered with no committed counterpart.
                None => (self.with_state(|st| st.write_value(self.id, &key)), true),
            }
        };
        let Some(preimage) = preimage else {
            return Err(TxnError::not_found(&key));
        };
        self.with_state(|st| {
            st.ensure_open(self.id)?;
            st.stage_delete(self.id, key, preimage, from_snapshot)
        })?;
        Ok(self)
    }

    /// Reads a key as of this scope's snapshot, through its own buffers.
    pub async fn read(&self, key: &B::Key) -> Result<Option<B::Value>, TxnError> {
        {
            let st = self.shared.state.lock();
            st.ensure_open(self.id)?;
            match st.buffered(self.id, key) {
                BufferHit::Value(value) => return Ok(Some(value)),
                BufferHit::Tombstone => return Ok(None),
                BufferHit::Miss => {}
            }
        }
        self.snapshot_value(key).await
    }

    /// Returns true if the key is visible to this scope.
    pub async fn exists(&self, key: &B::Key) -> Result<bool, TxnError> {
        {
            let st = self.shared.state.lock();
            st.ensure_open(self.id)?;
            match st.buffered(self.id, key) {
                BufferHit::Value(_) => return Ok(true),
                BufferHit::Tombstone => return Ok(false),
                BufferHit::Miss => {}
            }
        }
        self.snapshot_exists(key).await
    }

    /// Commits this scope's buffered changes. See
    /// [`Transaction::commit`](super::Transaction::commit) for semantics;
    /// the entire merge runs inside the root's write critical section.
    pub async fn commit(&self) -> Result<CommitOutcome<B::Key, B::Value>, TxnError> {
        self.commit_inner(None).await
    }

    /// Like [`commit`](Self::commit), echoing `label` in the outcome.
    pub async fn commit_labeled(
        &self,
        label: impl Into<String>,
    ) -> Result<CommitOutcome<B::Key, B::Value>, TxnError> {
        self.commit_inner(Some(label.into())).await
    }

    /// Discards this scope's buffered changes, reporting what was dropped.
    /// Closes nested scopes; resets the root. Never fails and performs no
    /// backend I/O.
    pub fn rollback(&self) -> CommitOutcome<B::Key, B::Value> {
        let mut st = self.shared.state.lock();
        if st.ensure_open(self.id).is_err() {
            return CommitOutcome::applied(None, ChangeSet::new());
        }
        let changes = st.changes_of(self.id);
        if self.id == TxnId::ROOT {
            st.reset_root();
        } else {
            st.close(self.id);
        }
        CommitOutcome::applied(None, changes)
    }

    async fn commit_inner(
        &self,
        label: Option<String>,
    ) -> Result<CommitOutcome<B::Key, B::Value>, TxnError> {
        enum Plan<K, V> {
            Conflicted { key: K, child_value: Option<V> },
            Apply { version: u64, writes: Vec<(K, V)>, deletes: Vec<K> },
        }

        let _gate = self.shared.gate.write().await;

        let changes;
        let plan = {
            let mut st = self.shared.state.lock();
            st.ensure_open(self.id)?;
            changes = st.changes_of(self.id);

            if self.id != TxnId::ROOT && st.ancestors_open(self.id).is_err() {
                st.close(self.id);
                return Ok(CommitOutcome::rejected(
                    label,
                    changes,
                    TxnError::AncestorCommitted,
                    None,
                ));
            }

            if let Some(parent_id) = st.parent_of(self.id) {
                // Any parented committer checks against its parent's
                // buffers first; for root-parented scopes that parent is
                // the root itself.
                if let Some(conflict) = st.sibling_conflict(self.id) {
                    let error = TxnError::conflict_at(&conflict.key);
                    st.close(self.id);
                    return Ok(CommitOutcome::rejected(label, changes, error, Some(conflict)));
                }
                if parent_id != TxnId::ROOT {
                    // Nested parent: pure buffer integration.
                    st.merge_into_parent(self.id)?;
                    st.close(self.id);
                    return Ok(CommitOutcome::applied(label, changes));
                }
            }

            // Persistence: merge into the backend's committed line.
            if let Some(key) = st.persisted_conflict(self.id) {
                let child_value = st.write_value(self.id, &key);
                if self.id == TxnId::ROOT {
                    st.reset_root();
                } else {
                    st.close(self.id);
                }
                Plan::Conflicted { key, child_value }
            } else {
                let version = st.allocate_version();
                let buffers = st.take_buffers(self.id);
                Plan::Apply {
                    version,
                    writes: buffers.writes.into_iter().collect(),
                    deletes: buffers.deletes.into_iter().collect(),
                }
            }
        };

        match plan {
            Plan::Conflicted { key, child_value } => {
                let parent_value = self.shared.backend.read(&key).await?;
                let error = TxnError::conflict_at(&key);
                Ok(CommitOutcome::rejected(
                    label,
                    ChangeSet::new(),
                    error,
                    Some(WriteConflict {
                        key,
                        parent_value,
                        child_value,
                    }),
                ))
            }
            Plan::Apply {
                version,
                writes,
                deletes,
            } => {
                let mut recorded = 0u64;
                let mut failure: Option<TxnError> = None;
                for key in &deletes {
                    if let Err(error) = self.persist_delete(key, version, &mut recorded).await {
                        failure = Some(error);
                        break;
                    }
                }
                if failure.is_none() {
                    for (key, value) in &writes {
                        if let Err(error) =
                            self.persist_write(key, value, version, &mut recorded).await
                        {
                            failure = Some(error);
                            break;
                        }
                    }
                }

                let mut st = self.shared.state.lock();
                // A version with any recorded history is consumed even on
                // failure so the history stays strictly ordered; the
                // backend is the atomicity boundary.
                if failure.is_none() || recorded > 0 {
                    st.publish_version(version);
                }
                if self.id == TxnId::ROOT {
                    st.reset_root();
                } else {
                    st.close(self.id);
                }
                if let Some(error) = failure {
                    return Err(error);
                }
                st.collect_garbage();
                debug!(txn = ?self.id, version, "persisted commit");
                Ok(CommitOutcome::applied(label, changes))
            }
        }
    }

    async fn persist_delete(
        &self,
        key: &B::Key,
        version: u64,
        recorded: &mut u64,
    ) -> Result<(), TxnError> {
        let preimage = self.shared.backend.read(key).await?;
        // Record before mutating the backend so a snapshot reader
        // re-resolving mid-apply lands on the undo cache.
        self.with_state(|st| st.record_applied_delete(key, preimage, version));
        *recorded += 1;
        self.shared.backend.delete(key).await?;
        Ok(())
    }

    async fn persist_write(
        &self,
        key: &B::Key,
        value: &B::Value,
        version: u64,
        recorded: &mut u64,
    ) -> Result<(), TxnError> {
        let preimage = self.shared.backend.read(key).await?;
        self.with_state(|st| st.record_applied_write(key, preimage, version));
        *recorded += 1;
        self.shared
            .backend
            .write(key.clone(), value.clone())
            .await?;
        Ok(())
    }

    /// Resolves a snapshot read, retrying when a concurrent commit changes
    /// the key's visibility class between resolution and the backend read.
    async fn snapshot_value(&self, key: &B::Key) -> Result<Option<B::Value>, TxnError> {
        loop {
            let (snapshot, plan) = {
                let st = self.shared.state.lock();
                let snapshot = st.snapshot_of(self.id);
                (snapshot, st.resolve_read(key, snapshot))
            };
            match plan {
                SnapshotRead::Absent => return Ok(None),
                SnapshotRead::Value(value) => return Ok(Some(value)),
                SnapshotRead::MissingPreimage(version) => {
                    return Err(TxnError::missing_preimage(key, version))
                }
                SnapshotRead::Backend => {
                    let value = self.shared.backend.read(key).await?;
                    let st = self.shared.state.lock();
                    if matches!(st.resolve_read(key, snapshot), SnapshotRead::Backend) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    async fn snapshot_exists(&self, key: &B::Key) -> Result<bool, TxnError> {
        loop {
            let (snapshot, plan) = {
                let st = self.shared.state.lock();
                let snapshot = st.snapshot_of(self.id);
                (snapshot, st.resolve_exists(key, snapshot))
            };
            match plan {
                SnapshotExists::Present => return Ok(true),
                SnapshotExists::Missing => return Ok(false),
                SnapshotExists::Backend => {
                    let present = self.shared.backend.exists(key).await?;
                    let st = self.shared.state.lock();
                    if matches!(st.resolve_exists(key, snapshot), SnapshotExists::Backend) {
                        return Ok(present);
                    }
                }
            }
        }
    }

    fn ensure_open(&self) -> Result<(), TxnError> {
        self.shared.state.lock().ensure_open(self.id)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState<B::Key, B::Value>) -> R) -> R {
        let mut st = self.shared.state.lock();
        f(&mut st)
    }
}

impl<B: AsyncKvBackend> Drop for AsyncTransaction<B> {
    fn drop(&mut self) {
        // Dropping an open nested handle is an implicit rollback; a closed
        // one just deregisters.
        if self.id != TxnId::ROOT {
            self.shared.state.lock().remove(self.id);
        }
    }
}
