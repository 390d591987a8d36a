// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Backend adapter traits and byte-oriented key/value types.

use std::fmt;
use std::future::Future;
use std::hash::Hash;

use super::error::StorageError;

/// Maximum key size in bytes accepted by the shipped backends.
pub const MAX_KEY_SIZE: usize = 128;

/// Maximum value size in bytes accepted by the shipped backends.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// A key in a byte-oriented backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(pub Vec<u8>);

impl Key {
    /// Creates a new key from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the key.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A value in a byte-oriented backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(pub Vec<u8>);

impl Value {
    /// Creates a new value from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the value bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the value.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the value is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A synchronous key/value backend.
///
/// The transaction engine talks to exactly these four operations; everything
/// else (history, snapshots, conflict detection) lives above the adapter.
///
/// # Contract
///
/// - `read` returns `Ok(None)` for absent keys.
/// - `write` and `delete` are reflected by the next call: after `write(k, v)`
///   returns, `read(k)` yields `v`.
/// - `delete` of an absent key is a no-op.
/// - Failures propagate unchanged; the engine never retries.
pub trait KvBackend {
    type Key: Clone + Eq + Hash + fmt::Debug;
    type Value: Clone + fmt::Debug;

    /// Reads the current value for a key.
    fn read(&self, key: &Self::Key) -> Result<Option<Self::Value>, StorageError>;

    /// Stores a value, replacing any existing one.
    fn write(&self, key: Self::Key, value: Self::Value) -> Result<(), StorageError>;

    /// Removes a key.
    fn delete(&self, key: &Self::Key) -> Result<(), StorageError>;

    /// Returns true if the key currently holds a value.
    fn exists(&self, key: &Self::Key) -> Result<bool, StorageError>;
}

/// An asynchronous key/value backend.
///
/// Same contract as [`KvBackend`]; each operation is a suspension point.
pub trait AsyncKvBackend: Send + Sync {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync;
    type Value: Clone + fmt::Debug + Send + Sync;

    /// Reads the current value for a key.
    fn read(
        &self,
        key: &Self::Key,
    ) -> impl Future<Output = Result<Option<Self::Value>, StorageError>> + Send;

    /// Stores a value, replacing any existing one.
    fn write(
        &self,
        key: Self::Key,
        value: Self::Value,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Removes a key.
    fn delete(&self, key: &Self::Key) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Returns true if the key currently holds a value.
    fn exists(&self, key: &Self::Key) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

/// Adapts a synchronous backend to the asynchronous contract.
///
/// Operations complete inline; the returned futures are immediately ready.
/// Useful for embedding in-process stores under the async engine.
#[derive(Debug, Default)]
pub struct Blocking<B>(pub B);

impl<B> Blocking<B> {
    /// Wraps a synchronous backend.
    pub fn new(backend: B) -> Self {
        Self(backend)
    }

    /// Returns the wrapped backend.
    pub fn into_inner(self) -> B {
        self.0
    }

    /// Returns a reference to the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.0
    }
}

impl<B> AsyncKvBackend for Blocking<B>
where
    B: KvBackend + Send + Sync,
    B::Key: Send + Sync,
    B::Value: Send + Sync,
{
    type Key = B::Key;
    type Value = B::Value;

    fn read(
        &self,
        key: &Self::Key,
    ) -> impl Future<Output = Result<Option<Self::Value>, StorageError>> + Send {
        std::future::ready(self.0.read(key))
    }

    fn write(
        &self,
        key: Self::Key,
        value: Self::Value,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        std::future::ready(self.0.write(key, value))
    }

    fn delete(&self, key: &Self::Key) -> impl Future<Output = Result<(), StorageError>> + Send {
        std::future::ready(self.0.delete(key))
    }

    fn exists(&self, key: &Self::Key) -> impl Future<Output = Result<bool, StorageError>> + Send {
        std::future::ready(self.0.exists(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_key_from_bytes() {
        let key = Key::from(b"hello".as_slice());
        assert_eq!(key.as_bytes(), b"hello");
        assert_eq!(key.len(), 5);
    }

    #[test]
    fn test_key_from_str() {
        let key = Key::from("hello");
        assert_eq!(key.as_bytes(), b"hello");
    }

    #[test]
    fn test_value_from_bytes() {
        let value = Value::from(b"world".as_slice());
        assert_eq!(value.as_bytes(), b"world");
        assert_eq!(value.len(), 5);
    }

    #[tokio::test]
    async fn test_blocking_adapter_passthrough() {
        let backend = Blocking::new(MemoryBackend::new());

        backend.write("k".to_string(), 7u32).await.unwrap();
        assert!(backend.exists(&"k".to_string()).await.unwrap());
        assert_eq!(backend.read(&"k".to_string()).await.unwrap(), Some(7));

        backend.delete(&"k".to_string()).await.unwrap();
        assert_eq!(backend.read(&"k".to_string()).await.unwrap(), None);
    }
}
