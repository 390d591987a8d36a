// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Pluggable key/value backend adapters.
//!
//! The transaction engine is parametrised over a backend exposing exactly
//! four operations: `read`, `write`, `delete`, `exists`. Backends hold only
//! the latest state for each key; all multi-version bookkeeping lives in the
//! engine above them.
//!
//! Two concrete backends ship with the crate:
//!
//! - [`MemoryBackend`]: a hash map, for tests and ephemeral engines
//! - [`FsBackend`]: a directory with one file per key
//!
//! Any synchronous backend can serve the async engine through [`Blocking`].
//!
//! # Example
//!
//! ```
//! use laminadb::storage::{Key, KvBackend, MemoryBackend, Value};
//!
//! let backend: MemoryBackend<Key, Value> = MemoryBackend::new();
//! backend.write(Key::from("greeting"), Value::from("hello")).unwrap();
//! assert_eq!(backend.read(&Key::from("greeting")).unwrap(), Some(Value::from("hello")));
//! ```

mod adapter;
mod error;
mod fs;
mod memory;

pub use adapter::{
    AsyncKvBackend, Blocking, Key, KvBackend, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
pub use error::StorageError;
pub use fs::{Durability, FsBackend};
pub use memory::MemoryBackend;
