// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction error types.

use std::fmt;

use crate::storage::StorageError;

/// Errors that can occur in transaction operations.
///
/// Keys are carried pre-rendered (via `Debug`) so the enum stays independent
/// of the backend's key type.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error("transaction already committed or rolled back")]
    AlreadyCommitted,

    #[error("an ancestor scope already committed")]
    AncestorCommitted,

    #[error("key already exists: {key}")]
    AlreadyExists { key: String },

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("write conflict at key {key}")]
    Conflict { key: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TxnError {
    pub(crate) fn already_exists<K: fmt::Debug>(key: &K) -> Self {
        Self::AlreadyExists {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn not_found<K: fmt::Debug>(key: &K) -> Self {
        Self::NotFound {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn conflict_at<K: fmt::Debug>(key: &K) -> Self {
        Self::Conflict {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn missing_preimage<K: fmt::Debug>(key: &K, superseded_at: u64) -> Self {
        Self::Storage(StorageError::Corruption(format!(
            "missing pre-image for {key:?} superseded at version {superseded_at}"
        )))
    }
}
