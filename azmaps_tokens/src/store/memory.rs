//! An in-memory storage tier

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{KeyValueStorage, StorageError};

/// An in-memory storage tier
///
/// Values live only as long as the storage itself. Used as the session tier
/// and as the last-resort fallback of a [`TokenStore`](super::TokenStore).
#[derive(Default, Debug)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Constructs a new, empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a value directly
    pub fn get(&self, key: &str) -> Option<String> {
        self.items().get(key).cloned()
    }

    /// Writes a value directly
    pub fn insert(&self, key: &str, value: &str) {
        self.items().insert(key.to_owned(), value.to_owned());
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.insert(key, value);
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key))
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items().remove(key);
        Ok(())
    }
}
