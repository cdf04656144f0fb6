//! Transactional key-value storage with crash recovery.
//!
//! Mirrors the reference implementation's scheme: writes accumulate in an
//! in-memory cache inside an `atomic_writes` block; on commit the whole
//! write-set is serialized into a single backup key before being applied,
//! so a crash mid-commit can always be recovered from on the next open.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

const BACKUP_KEY: &[u8] = b"__backup_recovery";

/// A durable, transactional key-value store.
///
/// Backed by `sled` for crash-safe single-key writes; the backup-key
/// scheme above it is what actually guarantees atomicity across a
/// multi-key write-set, per the testable crash-recovery property.
pub struct Storage {
    tree: sled::Db,
    write_set: Mutex<Option<BTreeMap<Vec<u8>, Option<Vec<u8>>>>>,
}

impl Storage {
    /// Opens (or creates) durable storage at `path`, running crash
    /// recovery first.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing engine cannot be opened
    /// or a recovered write-set fails to apply.
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        let tree = sled::open(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        let storage = Self {
            tree,
            write_set: Mutex::new(None),
        };
        storage.crash_recovery()?;
        Ok(storage)
    }

    /// Opens an ephemeral, in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the in-memory engine cannot be
    /// opened (this does not happen in practice).
    pub fn temporary() -> Result<Self, StorageError> {
        let tree = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self {
            tree,
            write_set: Mutex::new(None),
        })
    }

    /// Runs `body` inside a transaction: every write made through
    /// [`Self::set`]/[`Self::delete`] during `body` is buffered and only
    /// becomes visible (and durable) when `body` returns `Ok`. If the
    /// process crashes after the backup key is written but before the
    /// write-set is applied, the next [`Self::open`] replays it.
    ///
    /// # Errors
    ///
    /// Returns whatever error `body` returns, or a [`StorageError`] if the
    /// commit itself fails to persist.
    pub fn atomic_writes<T, E>(
        &self,
        body: impl FnOnce(&Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        {
            let mut guard = self.write_set.lock().expect("write_set mutex poisoned");
            guard.get_or_insert_with(BTreeMap::new);
        }

        let result = body(self);

        match result {
            Ok(value) => {
                let write_set = self
                    .write_set
                    .lock()
                    .expect("write_set mutex poisoned")
                    .take()
                    .unwrap_or_default();
                self.commit(write_set).map_err(E::from)?;
                Ok(value)
            }
            Err(err) => {
                *self.write_set.lock().expect("write_set mutex poisoned") = None;
                Err(err)
            }
        }
    }

    fn commit(&self, write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<(), StorageError> {
        if write_set.is_empty() {
            return Ok(());
        }
        let encoded = encode_value(&write_set)?;
        self.tree
            .insert(BACKUP_KEY, encoded)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.apply_write_set(&write_set)?;
        self.tree
            .remove(BACKUP_KEY)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        self.tree.flush().map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    fn apply_write_set(&self, write_set: &BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<(), StorageError> {
        for (key, value) in write_set {
            match value {
                Some(bytes) => {
                    self.tree
                        .insert(key.as_slice(), bytes.as_slice())
                        .map_err(|e| StorageError::Backend(e.to_string()))?;
                }
                None => {
                    self.tree
                        .remove(key.as_slice())
                        .map_err(|e| StorageError::Backend(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Replays an interrupted commit left behind by a crash between
    /// writing the backup key and applying the write-set.
    fn crash_recovery(&self) -> Result<(), StorageError> {
        let Some(backup) = self
            .tree
            .get(BACKUP_KEY)
            .map_err(|e| StorageError::Backend(e.to_string()))?
        else {
            return Ok(());
        };
        let write_set: BTreeMap<Vec<u8>, Option<Vec<u8>>> =
            decode_value(&backup).map_err(|reason| StorageError::Corrupted {
                key: String::from_utf8_lossy(BACKUP_KEY).into_owned(),
                reason,
            })?;
        self.apply_write_set(&write_set)?;
        self.tree
            .remove(BACKUP_KEY)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Reads and deserializes the value at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the stored bytes don't
    /// decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        if let Some(guard) = self.write_set.lock().expect("write_set mutex poisoned").as_ref() {
            if let Some(pending) = guard.get(key.as_bytes()) {
                return pending
                    .as_ref()
                    .map(|bytes| {
                        decode_value(bytes).map_err(|reason| StorageError::Corrupted {
                            key: key.to_string(),
                            reason,
                        })
                    })
                    .transpose();
            }
        }

        let Some(bytes) = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| StorageError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };
        decode_value(&bytes)
            .map(Some)
            .map_err(|reason| StorageError::Corrupted {
                key: key.to_string(),
                reason,
            })
    }

    /// Writes `value` at `key`. Inside an [`Self::atomic_writes`] block
    /// this is buffered; outside of one it commits immediately as a
    /// single-key transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if committing outside a transaction
    /// fails.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let encoded = encode_value(value)?;
        self.write_buffered_or_commit(key.as_bytes().to_vec(), Some(encoded))
    }

    /// Deletes the value at `key`, buffered the same way as [`Self::set`].
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if committing outside a transaction
    /// fails.
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write_buffered_or_commit(key.as_bytes().to_vec(), None)
    }

    fn write_buffered_or_commit(
        &self,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> Result<(), StorageError> {
        let mut guard = self.write_set.lock().expect("write_set mutex poisoned");
        match guard.as_mut() {
            Some(pending) => {
                pending.insert(key, value);
                Ok(())
            }
            None => {
                let mut single = BTreeMap::new();
                single.insert(key, value);
                drop(guard);
                self.commit(single)
            }
        }
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::Backend(e.to_string()))
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_value() {
        let storage = Storage::temporary().unwrap();
        storage.set("k", &42u64).unwrap();
        let value: Option<u64> = storage.get("k").unwrap();
        assert_eq!(value, Some(42));
    }

    #[test]
    fn atomic_writes_are_visible_only_after_success() {
        let storage = Storage::temporary().unwrap();
        let result: Result<(), StorageError> = storage.atomic_writes(|tx| {
            tx.set("a", &1u64)?;
            tx.set("b", &2u64)?;
            Ok(())
        });
        result.unwrap();
        assert_eq!(storage.get::<u64>("a").unwrap(), Some(1));
        assert_eq!(storage.get::<u64>("b").unwrap(), Some(2));
    }

    #[test]
    fn failed_transaction_discards_its_writes() {
        let storage = Storage::temporary().unwrap();
        let result: Result<(), StorageError> = storage.atomic_writes(|tx| {
            tx.set("a", &1u64)?;
            Err(StorageError::Backend("simulated failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(storage.get::<u64>("a").unwrap(), None);
    }

    #[test]
    fn delete_removes_a_value() {
        let storage = Storage::temporary().unwrap();
        storage.set("k", &1u64).unwrap();
        storage.delete("k").unwrap();
        assert_eq!(storage.get::<u64>("k").unwrap(), None);
    }
}
