// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Commit and rollback reporting.

use super::error::TxnError;

/// A write-write clash detected at merge time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConflict<K, V> {
    /// The contested key.
    pub key: K,
    /// The merge target's buffered value for the key, if any.
    pub parent_value: Option<V>,
    /// The committer's buffered value for the key, if any.
    pub child_value: Option<V>,
}

/// Classified changes carried by a scope's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChangeSet<K, V> {
    pub created: Vec<(K, V)>,
    pub updated: Vec<(K, V)>,
    pub deleted: Vec<(K, V)>,
}

impl<K, V> ChangeSet<K, V> {
    pub fn new() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<K, V> Default for ChangeSet<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Report returned by `commit` and `rollback`.
///
/// `Conflict` and `AncestorCommitted` never surface as `Err`; they are
/// reported here with `success = false`. The classified lists describe the
/// changes the scope contributed (or, on rollback and on rejected nested
/// merges, would have contributed).
#[derive(Debug)]
pub struct CommitOutcome<K, V> {
    /// Caller-provided label, echoed back.
    pub label: Option<String>,
    /// True if the changes were applied (merged or persisted).
    pub success: bool,
    /// The rejection reason when `success` is false.
    pub error: Option<TxnError>,
    /// Conflict details when `error` is `Conflict`.
    pub conflict: Option<WriteConflict<K, V>>,
    /// Keys this scope inserted, with their values.
    pub created: Vec<(K, V)>,
    /// Keys this scope overwrote, with their new values.
    pub updated: Vec<(K, V)>,
    /// Keys this scope removed, with their pre-images. Keys both inserted
    /// and removed inside the scope do not appear.
    pub deleted: Vec<(K, V)>,
}

impl<K, V> CommitOutcome<K, V> {
    pub(crate) fn applied(label: Option<String>, changes: ChangeSet<K, V>) -> Self {
        Self {
            label,
            success: true,
            error: None,
            conflict: None,
            created: changes.created,
            updated: changes.updated,
            deleted: changes.deleted,
        }
    }

    pub(crate) fn rejected(
        label: Option<String>,
        changes: ChangeSet<K, V>,
        error: TxnError,
        conflict: Option<WriteConflict<K, V>>,
    ) -> Self {
        Self {
            label,
            success: false,
            error: Some(error),
            conflict,
            created: changes.created,
            updated: changes.updated,
            deleted: changes.deleted,
        }
    }

    /// Returns true if the commit was rejected by conflict detection.
    pub fn is_conflict(&self) -> bool {
        matches!(self.error, Some(TxnError::Conflict { .. }))
    }
}
