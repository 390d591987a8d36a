// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! LaminaDB: hierarchical snapshot-isolated transactions layered over a pluggable key/value backend
//!
//! This crate provides a multi-version transactional overlay: a tree of
//! nestable transaction scopes with snapshot isolation, optimistic
//! write-write conflict detection, and safe garbage collection of version
//! metadata, all above a four-operation backend adapter.

pub mod storage;
pub mod txn;

pub use storage::{
    AsyncKvBackend, Blocking, Durability, FsBackend, Key, KvBackend, MemoryBackend, StorageError,
    Value, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
pub use txn::{
    AsyncTransaction, CommitOutcome, Transaction, TxnError, TxnId, TxnState, WriteConflict,
};
