// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Synchronous transaction engine.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::storage::KvBackend;

use super::error::TxnError;
use super::outcome::{ChangeSet, CommitOutcome, WriteConflict};
use super::tree::{BufferHit, EngineState, SnapshotExists, SnapshotRead};
use super::TxnId;

struct SharedTree<B: KvBackend> {
    backend: B,
    state: RefCell<EngineState<B::Key, B::Value>>,
}

/// A transaction over a synchronous backend.
///
/// One long-lived root owns the backend; nested scopes form a tree under
/// it. Every scope sees an immutable snapshot of the state committed at its
/// creation, buffers its own changes, and merges them upward on `commit`.
///
/// The engine is caller-driven and holds no locks; handles are deliberately
/// not `Send`. Callers sharing an engine across threads must provide their
/// own mutual exclusion (or use the async flavour).
///
/// Dropping an open handle discards its buffered changes and deregisters
/// the scope.
pub struct Transaction<B: KvBackend> {
    shared: Rc<SharedTree<B>>,
    id: TxnId,
}

impl<B: KvBackend> Transaction<B> {
    /// Creates the root transaction owning `backend`.
    ///
    /// The root is long-lived: its `commit` persists its buffers and resets
    /// them, never closing the scope.
    pub fn root(backend: B) -> Self {
        Self {
            shared: Rc::new(SharedTree {
                backend,
                state: RefCell::new(EngineState::new()),
            }),
            id: TxnId::ROOT,
        }
    }

    /// Opens a child scope snapshotted at this scope's current view.
    pub fn begin_nested(&self) -> Result<Self, TxnError> {
        let id = self.shared.state.borrow_mut().begin_nested(self.id)?;
        Ok(Self {
            shared: Rc::clone(&self.shared),
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
        self.shared.state.borrow().ensure_open(self.id).is_ok()
    }

    /// The global version this scope's reads resolve against.
    pub fn snapshot_version(&self) -> u64 {
        self.shared.state.borrow().snapshot_of(self.id)
    }

    /// Returns the backend this engine persists into.
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Buffers an insert. Fails with `AlreadyExists` if the key is visible
    /// to this scope, either buffered or committed.
    pub fn create(&self, key: B::Key, value: B::Value) -> Result<&Self, TxnError> {
        let mut st = self.shared.state.borrow_mut();
        st.ensure_open(self.id)?;
        if st.write_buffered(self.id, &key)
            || (!st.delete_buffered(self.id, &key) && self.snapshot_exists(&st, &key)?)
        {
            return Err(TxnError::already_exists(&key));
        }
        st.stage_create(self.id, key, value)?;
        Ok(self)
    }

    /// Buffers an overwrite. Fails with `NotFound` unless the key is
    /// visible to this scope.
    pub fn write(&self, key: B::Key, value: B::Value) -> Result<&Self, TxnError> {
        let mut st = self.shared.state.borrow_mut();
        st.ensure_open(self.id)?;
        if !st.write_buffered(self.id, &key)
            && (st.delete_buffered(self.id, &key) || !self.snapshot_exists(&st, &key)?)
        {
            return Err(TxnError::not_found(&key));
        }
        st.stage_write(self.id, key, value)?;
        Ok(self)
    }

    /// Buffers a removal, capturing the pre-image for reporting. The
    /// pre-image of a key this scope did not itself insert is the committed
    /// snapshot value, so a buffered overwrite never masks it.
    pub fn delete(&self, key: B::Key) -> Result<&Self, TxnError> {
        let mut st = self.shared.state.borrow_mut();
        st.ensure_open(self.id)?;

        let (preimage, from_snapshot) = if st.created_contains(self.id, &key) {
            (st.write_value(self.id, &key), false)
        } else if st.delete_buffered(self.id, &key) {
            (None, false)
        } else {
            match self.snapshot_value(&st, &key)? {
                Some(value) => (Some(value), true),
                // Write-buffered with no committed counterpart.
                None => (st.write_value(self.id, &key), true),
            }
        };
        let Some(preimage) = preimage else {
            return Err(TxnError::not_found(&key));
        };
        st.stage_delete(self.id, key, preimage, from_snapshot)?;
        Ok(self)
    }

    /// Reads a key as of this scope's snapshot, through its own buffers.
    pub fn read(&self, key: &B::Key) -> Result<Option<B::Value>, TxnError> {
        let st = self.shared.state.borrow();
        st.ensure_open(self.id)?;
        match st.buffered(self.id, key) {
            BufferHit::Value(value) => Ok(Some(value)),
            BufferHit::Tombstone => Ok(None),
            BufferHit::Miss => self.snapshot_value(&st, key),
        }
    }

    /// Returns true if the key is visible to this scope.
    pub fn exists(&self, key: &B::Key) -> Result<bool, TxnError> {
        let st = self.shared.state.borrow();
        st.ensure_open(self.id)?;
        match st.buffered(self.id, key) {
            BufferHit::Value(_) => Ok(true),
            BufferHit::Tombstone => Ok(false),
            BufferHit::Miss => self.snapshot_exists(&st, key),
        }
    }

    /// Commits this scope's buffered changes.
    ///
    /// Scopes with a nested parent merge into the parent's buffers under
    /// sibling conflict detection. The root and its direct children merge
    /// into the backend under global conflict detection, bumping the global
    /// version and pruning version metadata.
    ///
    /// `Conflict` and `AncestorCommitted` are reported inside the returned
    /// outcome, never as `Err`; backend failures propagate.
    pub fn commit(&self) -> Result<CommitOutcome<B::Key, B::Value>, TxnError> {
        self.commit_inner(None)
    }

    /// Like [`commit`](Self::commit), echoing `label` in the outcome.
    pub fn commit_labeled(
        &self,
        label: impl Into<String>,
    ) -> Result<CommitOutcome<B::Key, B::Value>, TxnError> {
        self.commit_inner(Some(label.into()))
    }

    /// Discards this scope's buffered changes, reporting what was dropped.
    /// Closes nested scopes; resets the root. Never fails.
    pub fn rollback(&self) -> CommitOutcome<B::Key, B::Value> {
        let mut st = self.shared.state.borrow_mut();
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

    fn commit_inner(
        &self,
        label: Option<String>,
    ) -> Result<CommitOutcome<B::Key, B::Value>, TxnError> {
        let mut st = self.shared.state.borrow_mut();
        st.ensure_open(self.id)?;
        let changes = st.changes_of(self.id);

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
            if parent_id != TxnId::ROOT {
                // Nested parent: pure buffer integration.
                if let Some(conflict) = st.sibling_conflict(self.id) {
                    let error = TxnError::conflict_at(&conflict.key);
                    st.close(self.id);
                    return Ok(CommitOutcome::rejected(label, changes, error, Some(conflict)));
                }
                st.merge_into_parent(self.id)?;
                st.close(self.id);
                return Ok(CommitOutcome::applied(label, changes));
            }

            // Root-parented: the root's own uncommitted buffers count as a
            // sibling for conflict purposes.
            if let Some(conflict) = st.sibling_conflict(self.id) {
                let error = TxnError::conflict_at(&conflict.key);
                st.close(self.id);
                return Ok(CommitOutcome::rejected(label, changes, error, Some(conflict)));
            }
        }

        // Persistence: merge into the backend's committed line.
        if let Some(key) = st.persisted_conflict(self.id) {
            let child_value = st.write_value(self.id, &key);
            let parent_value = self.shared.backend.read(&key)?;
            let error = TxnError::conflict_at(&key);
            if self.id == TxnId::ROOT {
                st.reset_root();
            } else {
                st.close(self.id);
            }
            return Ok(CommitOutcome::rejected(
                label,
                ChangeSet::new(),
                error,
                Some(WriteConflict {
                    key,
                    parent_value,
                    child_value,
                }),
            ));
        }

        let version = st.allocate_version();
        let buffers = st.take_buffers(self.id);
        let deletes: Vec<B::Key> = buffers.deletes.into_iter().collect();
        let writes: Vec<(B::Key, B::Value)> = buffers.writes.into_iter().collect();

        let mut applied = 0u64;
        let mut failure: Option<TxnError> = None;
        for key in &deletes {
            match Self::persist_delete(&self.shared.backend, &mut st, key, version) {
                Ok(()) => applied += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        if failure.is_none() {
            for (key, value) in &writes {
                match Self::persist_write(&self.shared.backend, &mut st, key, value, version) {
                    Ok(()) => applied += 1,
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }
        }

        // A partially applied version is still consumed so the history
        // stays strictly ordered; the backend is the atomicity boundary.
        if failure.is_none() || applied > 0 {
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

    fn persist_delete(
        backend: &B,
        st: &mut EngineState<B::Key, B::Value>,
        key: &B::Key,
        version: u64,
    ) -> Result<(), TxnError> {
        let preimage = backend.read(key)?;
        backend.delete(key)?;
        st.record_applied_delete(key, preimage, version);
        Ok(())
    }

    fn persist_write(
        backend: &B,
        st: &mut EngineState<B::Key, B::Value>,
        key: &B::Key,
        value: &B::Value,
        version: u64,
    ) -> Result<(), TxnError> {
        let preimage = backend.read(key)?;
        backend.write(key.clone(), value.clone())?;
        st.record_applied_write(key, preimage, version);
        Ok(())
    }

    fn snapshot_value(
        &self,
        st: &EngineState<B::Key, B::Value>,
        key: &B::Key,
    ) -> Result<Option<B::Value>, TxnError> {
        let snapshot = st.snapshot_of(self.id);
        match st.resolve_read(key, snapshot) {
            SnapshotRead::Backend => Ok(self.shared.backend.read(key)?),
            SnapshotRead::Absent => Ok(None),
            SnapshotRead::Value(value) => Ok(Some(value)),
            SnapshotRead::MissingPreimage(version) => {
                Err(TxnError::missing_preimage(key, version))
            }
        }
    }

    fn snapshot_exists(
        &self,
        st: &EngineState<B::Key, B::Value>,
        key: &B::Key,
    ) -> Result<bool, TxnError> {
        let snapshot = st.snapshot_of(self.id);
        match st.resolve_exists(key, snapshot) {
            SnapshotExists::Backend => Ok(self.shared.backend.exists(key)?),
            SnapshotExists::Present => Ok(true),
            SnapshotExists::Missing => Ok(false),
        }
    }
}

impl<B: KvBackend> Drop for Transaction<B> {
    fn drop(&mut self) {
        // Dropping an open nested handle is an implicit rollback; a closed
        // one just deregisters.
        if self.id != TxnId::ROOT {
            self.shared.state.borrow_mut().remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsBackend, Key, MemoryBackend, Value};
    use tempfile::TempDir;

    type MemTxn = Transaction<MemoryBackend<String, String>>;

    fn create_root() -> MemTxn {
        Transaction::root(MemoryBackend::new())
    }

    /// Root with the given pairs already committed to the backend.
    fn seeded_root(pairs: &[(&str, &str)]) -> MemTxn {
        let root = create_root();
        for (key, value) in pairs {
            root.create(key.to_string(), value.to_string()).unwrap();
        }
        assert!(root.commit().unwrap().success);
        root
    }

    #[test]
    fn test_read_your_own_writes() {
        let root = seeded_root(&[("k", "old")]);
        let tx = root.begin_nested().unwrap();

        tx.write("k".to_string(), "new".to_string()).unwrap();
        assert_eq!(tx.read(&"k".to_string()).unwrap().as_deref(), Some("new"));

        tx.delete("k".to_string()).unwrap();
        assert_eq!(tx.read(&"k".to_string()).unwrap(), None);
        assert!(!tx.exists(&"k".to_string()).unwrap());
    }

    #[test]
    fn test_basic_snapshot_isolation() {
        let root = seeded_root(&[("a", "V1")]);

        let tx1 = root.begin_nested().unwrap();
        let tx2 = root.begin_nested().unwrap();

        tx1.delete("a".to_string()).unwrap();
        assert!(tx1.commit().unwrap().success);

        // tx2 still sees its snapshot.
        assert_eq!(tx2.read(&"a".to_string()).unwrap().as_deref(), Some("V1"));
        assert!(tx2.commit().unwrap().success);

        let tx3 = root.begin_nested().unwrap();
        assert_eq!(tx3.read(&"a".to_string()).unwrap(), None);
    }

    #[test]
    fn test_write_write_conflict() {
        let root = seeded_root(&[("x", "0")]);

        let tx1 = root.begin_nested().unwrap();
        let tx2 = root.begin_nested().unwrap();

        tx1.write("x".to_string(), "A".to_string()).unwrap();
        assert!(tx1.commit().unwrap().success);

        tx2.write("x".to_string(), "B".to_string()).unwrap();
        let outcome = tx2.commit().unwrap();
        assert!(!outcome.success);
        assert!(outcome.is_conflict());
        let conflict = outcome.conflict.unwrap();
        assert_eq!(conflict.key, "x");
        assert_eq!(conflict.parent_value.as_deref(), Some("A"));
        assert_eq!(conflict.child_value.as_deref(), Some("B"));
        // Rejection against the committed line reports no classified changes.
        assert!(outcome.created.is_empty() && outcome.updated.is_empty());

        assert_eq!(
            root.begin_nested()
                .unwrap()
                .read(&"x".to_string())
                .unwrap()
                .as_deref(),
            Some("A")
        );
    }

    #[test]
    fn test_conflict_closes_transaction() {
        let root = seeded_root(&[("x", "0")]);
        let tx1 = root.begin_nested().unwrap();
        let tx2 = root.begin_nested().unwrap();

        tx1.write("x".to_string(), "A".to_string()).unwrap();
        tx1.commit().unwrap();
        tx2.write("x".to_string(), "B".to_string()).unwrap();
        assert!(!tx2.commit().unwrap().success);

        assert!(!tx2.is_open());
        assert!(matches!(
            tx2.read(&"x".to_string()),
            Err(TxnError::AlreadyCommitted)
        ));
    }

    #[test]
    fn test_disjoint_keys_both_succeed() {
        let root = seeded_root(&[("a", "1"), ("b", "2")]);
        let tx1 = root.begin_nested().unwrap();
        let tx2 = root.begin_nested().unwrap();

        tx1.write("a".to_string(), "1'".to_string()).unwrap();
        tx2.write("b".to_string(), "2'".to_string()).unwrap();
        assert!(tx1.commit().unwrap().success);
        assert!(tx2.commit().unwrap().success);
    }

    #[test]
    fn test_nested_strict_isolation() {
        let root = seeded_root(&[("k", "committed")]);

        let parent = root.begin_nested().unwrap();
        parent
            .write("k".to_string(), "uncommitted".to_string())
            .unwrap();

        // The child sees only state committed at its snapshot, never the
        // parent's buffers.
        let child = parent.begin_nested().unwrap();
        assert_eq!(
            child.read(&"k".to_string()).unwrap().as_deref(),
            Some("committed")
        );
    }

    #[test]
    fn test_long_reader_over_many_writes() {
        let root = seeded_root(&[("h", "G0")]);
        let reader = root.begin_nested().unwrap();

        for i in 1..=50 {
            let writer = root.begin_nested().unwrap();
            writer.write("h".to_string(), format!("G{i}")).unwrap();
            assert!(writer.commit().unwrap().success);
        }

        assert_eq!(
            root.backend().read(&"h".to_string()).unwrap().as_deref(),
            Some("G50")
        );
        assert_eq!(reader.read(&"h".to_string()).unwrap().as_deref(), Some("G0"));
    }

    #[test]
    fn test_create_then_delete_not_reported() {
        let root = create_root();
        let tx = root.begin_nested().unwrap();

        tx.create("new".to_string(), "v".to_string()).unwrap();
        tx.delete("new".to_string()).unwrap();

        let outcome = tx.commit().unwrap();
        assert!(outcome.success);
        assert!(outcome.created.iter().all(|(k, _)| k != "new"));
        assert!(outcome.deleted.iter().all(|(k, _)| k != "new"));
    }

    #[test]
    fn test_results_accumulate_up_the_chain() {
        let root = create_root();
        let a = root.begin_nested().unwrap();
        let b = a.begin_nested().unwrap();
        let c = b.begin_nested().unwrap();

        c.create("C".to_string(), "v".to_string()).unwrap();
        assert!(c.commit().unwrap().success);
        b.create("B".to_string(), "v".to_string()).unwrap();

        let outcome = b.commit().unwrap();
        assert!(outcome.success);
        let mut created: Vec<&str> = outcome.created.iter().map(|(k, _)| k.as_str()).collect();
        created.sort_unstable();
        assert_eq!(created, vec!["B", "C"]);
    }

    #[test]
    fn test_rolled_back_child_contributes_nothing() {
        let root = create_root();
        let a = root.begin_nested().unwrap();
        let b = a.begin_nested().unwrap();
        let c = b.begin_nested().unwrap();

        c.create("C".to_string(), "v".to_string()).unwrap();
        let discarded = c.rollback();
        assert!(discarded.success);
        assert_eq!(discarded.created.len(), 1);

        b.create("B".to_string(), "v".to_string()).unwrap();
        let outcome = b.commit().unwrap();
        let created: Vec<&str> = outcome.created.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(created, vec!["B"]);
    }

    #[test]
    fn test_create_existing_key_fails() {
        let root = seeded_root(&[("a", "v")]);
        let tx = root.begin_nested().unwrap();

        assert!(matches!(
            tx.create("a".to_string(), "w".to_string()),
            Err(TxnError::AlreadyExists { .. })
        ));
        // The failed call left no buffered state behind.
        assert_eq!(tx.read(&"a".to_string()).unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_create_after_delete_succeeds() {
        let root = seeded_root(&[("a", "old")]);
        let tx = root.begin_nested().unwrap();

        tx.delete("a".to_string()).unwrap();
        tx.create("a".to_string(), "new".to_string()).unwrap();
        assert_eq!(tx.read(&"a".to_string()).unwrap().as_deref(), Some("new"));

        let outcome = tx.commit().unwrap();
        // A delete-then-create round trip is reported as an insert.
        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.deleted.is_empty());
    }

    #[test]
    fn test_write_absent_key_fails() {
        let root = create_root();
        let tx = root.begin_nested().unwrap();

        assert!(matches!(
            tx.write("missing".to_string(), "v".to_string()),
            Err(TxnError::NotFound { .. })
        ));
    }

    #[test]
    fn test_write_after_delete_fails() {
        let root = seeded_root(&[("a", "v")]);
        let tx = root.begin_nested().unwrap();

        tx.delete("a".to_string()).unwrap();
        assert!(matches!(
            tx.write("a".to_string(), "w".to_string()),
            Err(TxnError::NotFound { .. })
        ));
    }

    #[test]
    fn test_delete_absent_key_fails() {
        let root = create_root();
        let tx = root.begin_nested().unwrap();

        assert!(matches!(
            tx.delete("missing".to_string()),
            Err(TxnError::NotFound { .. })
        ));
    }

    #[test]
    fn test_operations_after_commit_fail() {
        let root = create_root();
        let tx = root.begin_nested().unwrap();
        tx.commit().unwrap();

        assert!(matches!(
            tx.create("a".to_string(), "v".to_string()),
            Err(TxnError::AlreadyCommitted)
        ));
        assert!(matches!(
            tx.read(&"a".to_string()),
            Err(TxnError::AlreadyCommitted)
        ));
        assert!(matches!(tx.commit(), Err(TxnError::AlreadyCommitted)));
        assert!(matches!(
            tx.begin_nested(),
            Err(TxnError::AlreadyCommitted)
        ));
        // Rollback of a closed scope stays quiet.
        assert!(tx.rollback().success);
    }

    #[test]
    fn test_rollback_discards_buffers() {
        let root = seeded_root(&[("a", "v")]);
        let tx = root.begin_nested().unwrap();

        tx.write("a".to_string(), "w".to_string()).unwrap();
        let outcome = tx.rollback();
        assert!(outcome.success);
        assert_eq!(outcome.updated.len(), 1);

        let fresh = root.begin_nested().unwrap();
        assert_eq!(fresh.read(&"a".to_string()).unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_ancestor_committed() {
        let root = seeded_root(&[("k", "v")]);
        let parent = root.begin_nested().unwrap();
        let child = parent.begin_nested().unwrap();

        child.write("k".to_string(), "child".to_string()).unwrap();
        assert!(parent.commit().unwrap().success);

        let outcome = child.commit().unwrap();
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(TxnError::AncestorCommitted)));
        // The would-be contribution is reported but not applied.
        assert_eq!(outcome.updated.len(), 1);
        assert!(!child.is_open());

        let fresh = root.begin_nested().unwrap();
        assert_eq!(fresh.read(&"k".to_string()).unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_read_only_commit_after_ancestor_committed() {
        let root = create_root();
        let parent = root.begin_nested().unwrap();
        let child = parent.begin_nested().unwrap();

        assert!(parent.commit().unwrap().success);
        let outcome = child.commit().unwrap();
        assert!(matches!(outcome.error, Some(TxnError::AncestorCommitted)));
    }

    #[test]
    fn test_preimage_fidelity() {
        let root = seeded_root(&[("k", "before")]);
        let tx = root.begin_nested().unwrap();

        let seen = tx.read(&"k".to_string()).unwrap();
        tx.delete("k".to_string()).unwrap();

        let outcome = tx.commit().unwrap();
        assert_eq!(outcome.deleted.len(), 1);
        assert_eq!(Some(outcome.deleted[0].1.clone()), seen);
    }

    #[test]
    fn test_write_then_delete_reports_original_preimage() {
        let root = seeded_root(&[("k", "orig")]);
        let tx = root.begin_nested().unwrap();

        tx.write("k".to_string(), "intermediate".to_string()).unwrap();
        tx.delete("k".to_string()).unwrap();

        let outcome = tx.commit().unwrap();
        assert_eq!(
            outcome.deleted,
            vec![("k".to_string(), "orig".to_string())]
        );
    }

    #[test]
    fn test_result_faithfulness() {
        let root = seeded_root(&[("upd", "old"), ("del", "gone")]);
        let tx = root.begin_nested().unwrap();

        tx.create("new".to_string(), "n".to_string()).unwrap();
        tx.write("upd".to_string(), "u".to_string()).unwrap();
        tx.delete("del".to_string()).unwrap();

        let outcome = tx.commit().unwrap();
        assert_eq!(outcome.created, vec![("new".to_string(), "n".to_string())]);
        assert_eq!(outcome.updated, vec![("upd".to_string(), "u".to_string())]);
        assert_eq!(
            outcome.deleted,
            vec![("del".to_string(), "gone".to_string())]
        );
    }

    #[test]
    fn test_sibling_conflict_with_root_buffers() {
        let root = seeded_root(&[("k", "v")]);

        let tx = root.begin_nested().unwrap();
        // The root touches the key after the child forked.
        root.write("k".to_string(), "root".to_string()).unwrap();

        tx.write("k".to_string(), "child".to_string()).unwrap();
        let outcome = tx.commit().unwrap();
        assert!(!outcome.success);
        assert!(outcome.is_conflict());
        let conflict = outcome.conflict.unwrap();
        assert_eq!(conflict.parent_value.as_deref(), Some("root"));
        // A sibling rejection reports the would-be contribution.
        assert_eq!(outcome.updated.len(), 1);
    }

    #[test]
    fn test_root_commit_resets_buffers() {
        let root = create_root();

        root.create("a".to_string(), "1".to_string()).unwrap();
        let first = root.commit_labeled("first").unwrap();
        assert!(first.success);
        assert_eq!(first.label.as_deref(), Some("first"));
        assert_eq!(first.created.len(), 1);

        // The root stays open and its buffers are fresh.
        assert!(root.is_open());
        let second = root.commit().unwrap();
        assert!(second.success);
        assert!(second.created.is_empty());

        root.write("a".to_string(), "2".to_string()).unwrap();
        assert!(root.commit().unwrap().success);
        assert_eq!(
            root.backend().read(&"a".to_string()).unwrap().as_deref(),
            Some("2")
        );
    }

    #[test]
    fn test_preseeded_key_reads_through() {
        let backend = MemoryBackend::new();
        backend
            .write("legacy".to_string(), "on-disk".to_string())
            .unwrap();
        let root = Transaction::root(backend);

        // Keys that never passed through the engine defer to the backend.
        let reader = root.begin_nested().unwrap();
        assert_eq!(
            reader.read(&"legacy".to_string()).unwrap().as_deref(),
            Some("on-disk")
        );
        assert!(reader.exists(&"legacy".to_string()).unwrap());
    }

    #[test]
    fn test_preseeded_key_snapshot_stability() {
        let backend = MemoryBackend::new();
        backend
            .write("legacy".to_string(), "on-disk".to_string())
            .unwrap();
        let root = Transaction::root(backend);

        let reader = root.begin_nested().unwrap();
        let writer = root.begin_nested().unwrap();
        writer
            .write("legacy".to_string(), "rewritten".to_string())
            .unwrap();
        assert!(writer.commit().unwrap().success);

        // The old snapshot still sees the pre-engine value.
        assert_eq!(
            reader.read(&"legacy".to_string()).unwrap().as_deref(),
            Some("on-disk")
        );
    }

    #[test]
    fn test_drop_deregisters_scope() {
        let root = seeded_root(&[("k", "v")]);
        {
            let tx = root.begin_nested().unwrap();
            tx.write("k".to_string(), "buffered".to_string()).unwrap();
            // Dropped without commit: implicit rollback.
        }

        let fresh = root.begin_nested().unwrap();
        assert_eq!(fresh.read(&"k".to_string()).unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_dropped_reader_releases_snapshot_pin() {
        let root = seeded_root(&[("k", "v0")]);
        let reader = root.begin_nested().unwrap();

        let writer = root.begin_nested().unwrap();
        writer.write("k".to_string(), "v1".to_string()).unwrap();
        writer.commit().unwrap();
        drop(reader);

        // With the reader gone the next commit prunes its pre-images.
        let writer = root.begin_nested().unwrap();
        writer.write("k".to_string(), "v2".to_string()).unwrap();
        assert!(writer.commit().unwrap().success);

        let fresh = root.begin_nested().unwrap();
        assert_eq!(fresh.read(&"k".to_string()).unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_chained_calls() {
        let root = create_root();
        let tx = root.begin_nested().unwrap();
        let outcome = tx
            .create("a".to_string(), "1".to_string())
            .and_then(|tx| tx.create("b".to_string(), "2".to_string()))
            .and_then(|tx| tx.commit())
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.created.len(), 2);
    }

    #[test]
    fn test_fs_backend_end_to_end() {
        let dir = TempDir::new().unwrap();
        let root = Transaction::root(FsBackend::open(dir.path()).unwrap());

        root.create(Key::from("k"), Value::from("v1")).unwrap();
        assert!(root.commit().unwrap().success);

        let reader = root.begin_nested().unwrap();
        let writer = root.begin_nested().unwrap();
        writer.write(Key::from("k"), Value::from("v2")).unwrap();
        assert!(writer.commit().unwrap().success);

        assert_eq!(
            reader.read(&Key::from("k")).unwrap(),
            Some(Value::from("v1"))
        );
        assert_eq!(
            root.backend().read(&Key::from("k")).unwrap(),
            Some(Value::from("v2"))
        );
    }
}
