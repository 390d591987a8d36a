// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Storage error types.

/// Errors that can occur in backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key too large: {size} > {max}")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large: {size} > {max}")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}
