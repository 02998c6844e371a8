//! Transactional store: the handle every state component shares.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pulsestore_core::{Config, Engine, EngineError, EngineResult, ReadTx, WriteTx};
use tracing::info;

use crate::codec::{decode, encode, Entity};
use crate::error::{Result, StateError};
use crate::indexes::IndexSpec;
use crate::keys::StateKey;

/// Explicitly constructed store handle. Cloning shares the same engine.
#[derive(Clone)]
pub struct Store {
    engine: Arc<Engine>,
}

impl Store {
    /// Open an on-disk store and start its expiry sweeper.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let engine = Engine::open(path.as_ref(), config)?;
        engine.start_sweeper()?;
        info!(path = %path.as_ref().display(), "state store opened");
        Ok(Self { engine: Arc::new(engine) })
    }

    /// Open a store that lives only in memory.
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let engine = Engine::open_in_memory(config)?;
        engine.start_sweeper()?;
        Ok(Self { engine: Arc::new(engine) })
    }

    pub fn from_engine(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run `f` in a read-only transaction.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTx<'_>) -> Result<T>,
    {
        let tx = self.engine.begin_read()?;
        f(&tx)
    }

    /// Run `f` in a read-write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back on `Err`. Everything `f`
    /// reads and writes is atomic relative to other `update` calls.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTx<'_>) -> Result<T>,
    {
        let mut tx = self.engine.begin_write()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Declare a persistent index. Re-declaring the same spec returns `Ok(false)`.
    pub fn create_index(&self, spec: &IndexSpec) -> Result<bool> {
        spec.validate()?;
        Ok(self.engine.declare_index(&spec.name, &spec.prefix)?)
    }

    /// `Ok` while the store accepts transactions.
    pub fn ping(&self) -> Result<()> {
        Ok(self.engine.check_open()?)
    }

    pub fn close(&self) -> Result<()> {
        Ok(self.engine.close()?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.engine.path())
            .field("entries", &self.engine.len())
            .finish()
    }
}

/// Typed reads shared by both transaction kinds.
pub trait StateRead {
    fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn raw_contains(&self, key: &[u8]) -> bool;
    fn raw_index_keys(&self, name: &str) -> EngineResult<Vec<Vec<u8>>>;
    fn raw_prefix_keys(&self, prefix: &[u8]) -> Vec<Vec<u8>>;

    /// Decode the entity at `key`; `NotFound` if absent or expired.
    fn load<T: Entity>(&self, key: &StateKey) -> Result<T> {
        match self.raw_get(&key.encode()) {
            Some(bytes) => decode(&bytes),
            None => Err(StateError::not_found(T::NAME)),
        }
    }

    fn exists(&self, key: &StateKey) -> bool {
        self.raw_contains(&key.encode())
    }

    /// Keys covered by `spec`: from its index when declared, else by prefix scan.
    fn enumerate(&self, spec: &IndexSpec) -> Result<Vec<Vec<u8>>> {
        match self.raw_index_keys(&spec.name) {
            Ok(keys) => Ok(keys),
            Err(EngineError::UnknownIndex(_)) => Ok(self.raw_prefix_keys(&spec.prefix)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Typed writes inside an update.
pub trait StateWrite: StateRead {
    /// Store `value` at `key`; returns `true` if a live value was replaced.
    fn save<T: Entity>(&mut self, key: &StateKey, value: &T, ttl: Option<Duration>) -> Result<bool>;

    /// Returns `true` if a live value was removed.
    fn remove(&mut self, key: &StateKey) -> bool;
}

impl StateRead for ReadTx<'_> {
    fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(key).map(<[u8]>::to_vec)
    }

    fn raw_contains(&self, key: &[u8]) -> bool {
        self.contains_key(key)
    }

    fn raw_index_keys(&self, name: &str) -> EngineResult<Vec<Vec<u8>>> {
        self.index_keys(name)
    }

    fn raw_prefix_keys(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.scan_prefix(prefix).into_iter().map(|(k, _)| k).collect()
    }
}

impl StateRead for WriteTx<'_> {
    fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(key)
    }

    fn raw_contains(&self, key: &[u8]) -> bool {
        self.contains_key(key)
    }

    fn raw_index_keys(&self, name: &str) -> EngineResult<Vec<Vec<u8>>> {
        self.index_keys(name)
    }

    fn raw_prefix_keys(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.scan_prefix(prefix).into_iter().map(|(k, _)| k).collect()
    }
}

impl StateWrite for WriteTx<'_> {
    fn save<T: Entity>(&mut self, key: &StateKey, value: &T, ttl: Option<Duration>) -> Result<bool> {
        let bytes = encode(value)?;
        Ok(self.put(&key.encode(), &bytes, ttl)?)
    }

    fn remove(&mut self, key: &StateKey) -> bool {
        self.delete(&key.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserInfo;
    use tempfile::TempDir;

    fn store() -> Store {
        Store::open_in_memory(Config::ephemeral()).unwrap()
    }

    #[test]
    fn test_update_commits_on_ok() {
        let store = store();
        let key = StateKey::UserInfo { mid: 1 };
        store
            .update(|tx| tx.save(&key, &UserInfo::new(1, 2, "a", ""), None))
            .unwrap();
        let user: UserInfo = store.view(|tx| tx.load(&key)).unwrap();
        assert_eq!(user.room_id, 2);
    }

    #[test]
    fn test_update_rolls_back_on_err() {
        let store = store();
        let key = StateKey::UserInfo { mid: 1 };
        let result: Result<()> = store.update(|tx| {
            tx.save(&key, &UserInfo::new(1, 2, "a", ""), None)?;
            Err(StateError::MissingPayload("test"))
        });
        assert!(matches!(result, Err(StateError::MissingPayload(_))));
        assert!(!store.view(|tx| Ok(tx.exists(&key))).unwrap());
    }

    #[test]
    fn test_view_missing_is_not_found() {
        let store = store();
        let err = store.view(|tx| tx.load::<UserInfo>(&StateKey::UserInfo { mid: 9 })).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ping_and_close() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), Config::ephemeral()).unwrap();
        assert!(store.engine().sweeper_running());
        store.ping().unwrap();
        let clone = store.clone();
        store.close().unwrap();
        assert!(matches!(clone.ping(), Err(StateError::Engine(EngineError::Closed))));
        assert!(clone.update(|_| Ok(())).is_err());
    }

    #[test]
    fn test_enumerate_falls_back_to_scan() {
        let store = store();
        store
            .update(|tx| {
                tx.save(&StateKey::UserInfo { mid: 2 }, &UserInfo::new(2, 0, "b", ""), None)?;
                tx.save(&StateKey::UserInfo { mid: 1 }, &UserInfo::new(1, 0, "a", ""), None)
            })
            .unwrap();
        let spec = IndexSpec::for_space(crate::keys::KeySpace::UserInfo);
        let scanned = store.view(|tx| tx.enumerate(&spec)).unwrap();
        store.create_index(&spec).unwrap();
        let indexed = store.view(|tx| tx.enumerate(&spec)).unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned, indexed);
    }
}
