//! Tiered key-value persistence for tokens
//!
//! A [`TokenStore`] prefers a durable storage tier, then a session-scoped
//! tier, and finally an in-memory fallback. Tiers are probed with a
//! write/read/delete round trip on every call, so a tier that becomes
//! unavailable (or available) mid-session is picked up on the next call.
//!
//! Every probe writes the same sentinel key, so a store serializes its probes
//! and the operation that follows them. Clones of a store share that lock.

use std::{
    error, fmt, io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;

#[cfg(feature = "file")]
mod file;
mod memory;

#[cfg(feature = "file")]
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Key under which the current access token is persisted
pub const ACCESS_TOKEN_KEY: &str = "access.token.key";

/// Sentinel key used to probe whether a tier is usable
pub const PROBE_KEY: &str = "testStorage";

const PROBE_VALUE: &str = "A";

/// An error raised by a storage tier
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage tier could not be read or written
    #[error("storage tier I/O failed")]
    Io(#[from] io::Error),
    /// The storage tier holds data that could not be parsed
    #[error("storage tier holds unreadable data")]
    Format(#[from] serde_json::Error),
    /// The storage tier refused the operation
    #[error("storage tier unavailable: {0}")]
    Unavailable(String),
}

/// A synchronous string key-value storage tier
pub trait KeyValueStorage: Send + Sync + fmt::Debug {
    /// Stores `value` under `key`, replacing any prior value
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Reads the value stored under `key`
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Removes any value stored under `key`
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStorage + ?Sized> KeyValueStorage for Arc<S> {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }
}

/// A token store that cascades through durable, session, and in-memory tiers
#[derive(Clone, Debug)]
pub struct TokenStore {
    durable: Option<Arc<dyn KeyValueStorage>>,
    session: Option<Arc<dyn KeyValueStorage>>,
    fallback: Arc<MemoryStorage>,
    exclusive: Arc<Mutex<()>>,
}

impl TokenStore {
    /// Constructs a store that only has its in-memory fallback
    ///
    /// The fallback is usually shared by every store in the process.
    pub fn new(fallback: Arc<MemoryStorage>) -> Self {
        Self {
            durable: None,
            session: None,
            fallback,
            exclusive: Arc::default(),
        }
    }

    /// Adds a durable storage tier, tried first
    pub fn with_durable(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.durable = Some(storage);
        self
    }

    /// Adds a session-scoped storage tier, tried after the durable tier
    pub fn with_session(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.session = Some(storage);
        self
    }

    /// The in-memory fallback tier
    pub fn fallback(&self) -> &Arc<MemoryStorage> {
        &self.fallback
    }

    /// Saves a value into the first usable tier
    ///
    /// Returns `true` once the value has been stored. The in-memory fallback
    /// always accepts writes.
    pub fn save(&self, key: &str, value: &str) -> bool {
        let _exclusive = self.lock();

        for (tier, storage) in self.usable_tiers() {
            match storage.set_item(key, value) {
                Ok(()) => {
                    tracing::trace!(tier, key, "saved item");
                    return true;
                }
                Err(error) => {
                    tracing::warn!(
                        tier,
                        key,
                        error = (&error as &dyn error::Error),
                        "unable to save item, trying next tier"
                    );
                }
            }
        }

        self.save_fallback(key, value)
    }

    /// Loads a value from the first usable tier
    pub fn load(&self, key: &str) -> Option<String> {
        let _exclusive = self.lock();

        for (tier, storage) in self.usable_tiers() {
            match storage.get_item(key) {
                Ok(value) => {
                    tracing::trace!(tier, key, found = value.is_some(), "loaded item");
                    return value;
                }
                Err(error) => {
                    tracing::warn!(
                        tier,
                        key,
                        error = (&error as &dyn error::Error),
                        "unable to load item, trying next tier"
                    );
                }
            }
        }

        self.fallback.get(key)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.exclusive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save_fallback(&self, key: &str, value: &str) -> bool {
        tracing::trace!(tier = "memory", key, "saved item");
        self.fallback.insert(key, value);
        true
    }

    fn usable_tiers(&self) -> impl Iterator<Item = (&'static str, &dyn KeyValueStorage)> + '_ {
        [("durable", &self.durable), ("session", &self.session)]
            .into_iter()
            .filter_map(|(tier, storage)| storage.as_deref().map(|s| (tier, s)))
            .filter(|(tier, storage)| probe(tier, *storage))
    }
}

/// Probes a tier with a write/read/delete round trip on the sentinel key
///
/// Some tiers accept calls but silently drop writes, so checking that the
/// tier exists is not enough.
fn probe(tier: &str, storage: &dyn KeyValueStorage) -> bool {
    let result = (|| -> Result<bool, StorageError> {
        storage.set_item(PROBE_KEY, PROBE_VALUE)?;
        if storage.get_item(PROBE_KEY)?.as_deref() != Some(PROBE_VALUE) {
            return Ok(false);
        }
        storage.remove_item(PROBE_KEY)?;
        Ok(storage.get_item(PROBE_KEY)?.is_none())
    })();

    match result {
        Ok(true) => true,
        Ok(false) => {
            tracing::debug!(tier, "storage tier failed round-trip verification");
            false
        }
        Err(error) => {
            tracing::debug!(
                tier,
                error = (&error as &dyn error::Error),
                "storage tier unavailable"
            );
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{test_storage::*, *};

    fn fresh_store() -> TokenStore {
        TokenStore::new(Arc::new(MemoryStorage::new()))
    }

    mod when_durable_tier_is_usable {
        use super::*;

        #[test]
        fn values_round_trip_through_the_durable_tier() {
            let durable = Arc::new(MemoryStorage::new());
            let session = Arc::new(MemoryStorage::new());
            let store = fresh_store()
                .with_durable(durable.clone())
                .with_session(session.clone());

            assert!(store.save(ACCESS_TOKEN_KEY, "token-value"));

            assert_eq!(store.load(ACCESS_TOKEN_KEY).as_deref(), Some("token-value"));
            assert_eq!(durable.get(ACCESS_TOKEN_KEY).as_deref(), Some("token-value"));
            assert_eq!(session.get(ACCESS_TOKEN_KEY), None);
            assert_eq!(store.fallback().get(ACCESS_TOKEN_KEY), None);
        }

        #[test]
        fn probe_leaves_no_sentinel_behind() {
            let durable = Arc::new(MemoryStorage::new());
            let store = fresh_store().with_durable(durable.clone());

            store.save("k", "v");

            assert_eq!(durable.get(PROBE_KEY), None);
        }
    }

    mod when_durable_tier_throws {
        use super::*;

        #[test]
        fn values_round_trip_through_the_session_tier() {
            let session = Arc::new(MemoryStorage::new());
            let store = fresh_store()
                .with_durable(Arc::new(FailingStorage))
                .with_session(session.clone());

            assert!(store.save(ACCESS_TOKEN_KEY, "token-value"));

            assert_eq!(store.load(ACCESS_TOKEN_KEY).as_deref(), Some("token-value"));
            assert_eq!(session.get(ACCESS_TOKEN_KEY).as_deref(), Some("token-value"));
            assert_eq!(store.fallback().get(ACCESS_TOKEN_KEY), None);
        }

        #[test]
        #[tracing_test::traced_test]
        fn unavailable_tier_is_logged() {
            let store = fresh_store().with_durable(Arc::new(FailingStorage));

            store.save(ACCESS_TOKEN_KEY, "token-value");

            assert!(logs_contain("storage tier unavailable"));
        }

        mod and_session_tier_drops_writes {
            use super::*;

            #[test]
            fn values_round_trip_through_the_memory_fallback() {
                let store = fresh_store()
                    .with_durable(Arc::new(FailingStorage))
                    .with_session(Arc::new(ForgetfulStorage));

                assert!(store.save(ACCESS_TOKEN_KEY, "token-value"));

                assert_eq!(store.load(ACCESS_TOKEN_KEY).as_deref(), Some("token-value"));
                assert_eq!(
                    store.fallback().get(ACCESS_TOKEN_KEY).as_deref(),
                    Some("token-value")
                );
            }
        }
    }

    #[test]
    fn fallback_is_shared_between_stores() {
        let fallback = Arc::new(MemoryStorage::new());
        let writer = TokenStore::new(fallback.clone());
        let reader = TokenStore::new(fallback);

        writer.save("k", "v");

        assert_eq!(reader.load("k").as_deref(), Some("v"));
    }

    #[test]
    fn concurrent_loads_always_find_the_durable_value() {
        use std::thread;

        let durable = Arc::new(MemoryStorage::new());
        durable.insert(ACCESS_TOKEN_KEY, "token-value");
        let store = fresh_store().with_durable(durable);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..2_000)
                        .filter(|_| store.load(ACCESS_TOKEN_KEY).is_none())
                        .count()
                })
            })
            .collect();

        let misses: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();

        assert_eq!(misses, 0);
        assert_eq!(store.fallback().get(ACCESS_TOKEN_KEY), None);
    }

    #[test]
    fn concurrent_saves_land_in_the_durable_tier() {
        use std::thread;

        let durable = Arc::new(MemoryStorage::new());
        let store = fresh_store().with_durable(durable.clone());

        let writers: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        store.save(&format!("key-{}-{}", n, i), "v");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        for n in 0..8 {
            for i in 0..500 {
                let key = format!("key-{}-{}", n, i);
                assert_eq!(durable.get(&key).as_deref(), Some("v"));
                assert_eq!(store.fallback().get(&key), None);
            }
        }
    }

    #[test]
    fn tier_recovery_is_picked_up_on_the_next_call() {
        use std::sync::atomic::{AtomicBool, Ordering};

        #[derive(Debug, Default)]
        struct Flaky {
            broken: AtomicBool,
            inner: MemoryStorage,
        }

        impl KeyValueStorage for Flaky {
            fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
                if self.broken.load(Ordering::SeqCst) {
                    return Err(StorageError::Unavailable("locked".into()));
                }
                self.inner.set_item(key, value)
            }

            fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
                self.inner.get_item(key)
            }

            fn remove_item(&self, key: &str) -> Result<(), StorageError> {
                self.inner.remove_item(key)
            }
        }

        let flaky = Arc::new(Flaky::default());
        flaky.broken.store(true, Ordering::SeqCst);
        let store = fresh_store().with_durable(flaky.clone());

        store.save("k", "from-fallback");
        assert_eq!(store.fallback().get("k").as_deref(), Some("from-fallback"));

        flaky.broken.store(false, Ordering::SeqCst);
        store.save("k", "from-durable");

        assert_eq!(flaky.inner.get("k").as_deref(), Some("from-durable"));
        assert_eq!(store.load("k").as_deref(), Some("from-durable"));
    }
}
