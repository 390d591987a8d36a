// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical snapshot-isolated transactions over a pluggable backend.
//!
//! One long-lived root transaction owns a backend and a monotonic global
//! version. Nested transactions form a tree under it; each sees an
//! immutable snapshot of the state committed at its creation, buffers its
//! own writes and deletes, and merges them upward on commit:
//!
//! - a scope with a **nested parent** folds its buffers into that parent,
//!   failing with `Conflict` if the parent (or a sibling that merged
//!   earlier) touched one of its keys after it forked;
//! - the **root and its direct children** persist into the backend under
//!   optimistic conflict detection against the per-key version history,
//!   rotating displaced values into an undo cache so older snapshots keep
//!   reading their frozen view.
//!
//! Version metadata is garbage-collected after each persisted commit,
//! bounded by the oldest snapshot still held by a live scope.
//!
//! # Key Concepts
//!
//! ## Snapshot Isolation
//!
//! A transaction observes the database as of its creation and its own
//! buffered changes, nothing else. Parent buffers are invisible to
//! children; a parent's mutations reach later reads only through commit.
//! Write-write conflicts are detected at merge time; write skew is
//! permitted.
//!
//! ## First committer wins
//!
//! Among transactions forked at the same version and touching the same
//! key, the first to commit persists; the rest observe `Conflict` in
//! their outcome and close without applying anything.
//!
//! # Example
//!
//! ```
//! use laminadb::{MemoryBackend, Transaction};
//!
//! let root = Transaction::root(MemoryBackend::<String, String>::new());
//! root.create("greeting".into(), "hello".into()).unwrap();
//! root.commit().unwrap();
//!
//! let tx = root.begin_nested().unwrap();
//! tx.write("greeting".into(), "goodbye".into()).unwrap();
//! // The buffered write is private to `tx` until it commits.
//! let other = root.begin_nested().unwrap();
//! assert_eq!(other.read(&"greeting".to_string()).unwrap().as_deref(), Some("hello"));
//!
//! let outcome = tx.commit().unwrap();
//! assert!(outcome.success);
//! assert_eq!(outcome.updated.len(), 1);
//! ```

mod aio;
mod buffers;
mod error;
mod outcome;
mod sync;
mod tree;
mod undo;
mod version;

pub use aio::AsyncTransaction;
pub use error::TxnError;
pub use outcome::{CommitOutcome, WriteConflict};
pub use sync::Transaction;

/// Unique transaction identifier within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// The root transaction's identifier.
    pub const ROOT: TxnId = TxnId(0);
}

/// Transaction lifecycle state.
///
/// Nested transactions close on `commit` (success or failure) or
/// `rollback`; the root only resets and stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Closed,
}
