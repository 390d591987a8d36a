// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-memory key/value backend.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::RwLock;

use super::adapter::KvBackend;
use super::error::StorageError;

/// A hash-map backend.
///
/// Suitable for unit tests, ephemeral engines, and as the inner store of
/// [`Blocking`](super::Blocking) under the async engine. Thread-safe.
#[derive(Debug, Default)]
pub struct MemoryBackend<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryBackend<K, V> {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> KvBackend for MemoryBackend<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug,
    V: Clone + fmt::Debug,
{
    type Key = K;
    type Value = V;

    fn read(&self, key: &K) -> Result<Option<V>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: K, value: V) -> Result<(), StorageError> {
        self.entries.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &K) -> Result<bool, StorageError> {
        Ok(self.entries.read().contains_key(key))
    }
}
