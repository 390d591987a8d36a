// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Filesystem-backed key/value backend.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::adapter::{Key, KvBackend, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use super::error::StorageError;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Durability mode for write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    /// Writes land in the OS page cache. Durable against process crashes
    /// but not power failures.
    #[default]
    Buffered,
    /// Every write is fsynced before the rename that publishes it.
    SyncEachWrite,
}

/// Directory-of-files backend.
///
/// Each key is stored as one file whose name is the lowercase hex of the key
/// bytes. Writes go to a temporary sibling and are published by rename, so a
/// reader never observes a torn value.
#[derive(Debug)]
pub struct FsBackend {
    dir: PathBuf,
    durability: Durability,
}

impl FsBackend {
    /// Opens or creates a backend rooted at the given directory.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        Self::open_with_durability(dir, Durability::default())
    }

    /// Opens or creates a backend with the specified durability mode.
    pub fn open_with_durability(dir: &Path, durability: Durability) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            durability,
        })
    }

    /// Returns the backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &Key) -> Result<PathBuf, StorageError> {
        if key.len() > MAX_KEY_SIZE {
            return Err(StorageError::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }

        let mut name = String::with_capacity(key.len() * 2);
        for &byte in key.as_bytes() {
            name.push(HEX[(byte >> 4) as usize] as char);
            name.push(HEX[(byte & 0x0f) as usize] as char);
        }
        Ok(self.dir.join(name))
    }

    fn validate_value(value: &Value) -> Result<(), StorageError> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(StorageError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        Ok(())
    }
}

impl KvBackend for FsBackend {
    type Key = Key;
    type Value = Value;

    fn read(&self, key: &Key) -> Result<Option<Value>, StorageError> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Value::new(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: Key, value: Value) -> Result<(), StorageError> {
        Self::validate_value(&value)?;
        let path = self.key_path(&key)?;

        // "<hex>.tmp" cannot collide with a key path: key names are pure hex.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)?;
        file.write_all(value.as_bytes())?;
        if self.durability == Durability::SyncEachWrite {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<(), StorageError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &Key) -> Result<bool, StorageError> {
        let path = self.key_path(key)?;
        Ok(path.try_exists()?)
    }
}
