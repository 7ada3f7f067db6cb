//! Coordination store: version-checked small blobs plus named locks.
//!
//! Cluster-wide admin state (run mode, settings) lives here. Writers always
//! name the version they read; a stale version loses and must re-read.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use sysproc_common::{Result, SysprocError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub version: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied { version: u64 },
    /// The key's current version (None if absent) did not match the expected one.
    Conflict { current: Option<u64> },
}

pub trait CoordinationStore: Send + Sync + Debug {
    fn read(&self, key: &str) -> Result<Option<VersionedValue>>;

    /// Write `data` only if the key is at `expected` (`None`: key must be absent).
    fn write_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        data: Vec<u8>,
    ) -> Result<WriteOutcome>;

    /// Take the named lock for `owner`; false if anyone holds it.
    fn try_lock(&self, name: &str, owner: &str) -> Result<bool>;

    fn unlock(&self, name: &str, owner: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCoordinationStore {
    values: Mutex<HashMap<String, VersionedValue>>,
    locks: Mutex<HashMap<String, String>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SysprocError {
    SysprocError::Coordination("coordination store lock poisoned".to_string())
}

impl CoordinationStore for MemoryCoordinationStore {
    fn read(&self, key: &str) -> Result<Option<VersionedValue>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn write_if_version(
        &self,
        key: &str,
        expected: Option<u64>,
        data: Vec<u8>,
    ) -> Result<WriteOutcome> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        let current = values.get(key).map(|v| v.version);
        if current != expected {
            debug!(key, ?expected, ?current, "version-checked write lost");
            return Ok(WriteOutcome::Conflict { current });
        }
        let version = current.map(|v| v + 1).unwrap_or(1);
        values.insert(key.to_string(), VersionedValue { version, data });
        Ok(WriteOutcome::Applied { version })
    }

    fn try_lock(&self, name: &str, owner: &str) -> Result<bool> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        if locks.contains_key(name) {
            return Ok(false);
        }
        locks.insert(name.to_string(), owner.to_string());
        Ok(true)
    }

    fn unlock(&self, name: &str, owner: &str) -> Result<()> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        match locks.get(name) {
            Some(holder) if holder == owner => {
                locks.remove(name);
                Ok(())
            }
            Some(holder) => Err(SysprocError::Coordination(format!(
                "lock {name} is held by {holder}, not {owner}"
            ))),
            None => Ok(()),
        }
    }
}

/// Held named lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    store: Arc<dyn CoordinationStore>,
    name: String,
    owner: String,
}

impl LockGuard {
    pub fn acquire(store: Arc<dyn CoordinationStore>, name: &str, owner: &str) -> Result<Self> {
        if !store.try_lock(name, owner)? {
            return Err(SysprocError::Coordination(format!(
                "lock {name} is held by another operation"
            )));
        }
        Ok(Self {
            store,
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.unlock(&self.name, &self.owner) {
            warn!(lock = %self.name, error = %e, "failed to release coordination lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_version_loses() {
        let store = MemoryCoordinationStore::new();
        assert_eq!(
            store.write_if_version("mode", None, b"RUNNING".to_vec()).expect("create"),
            WriteOutcome::Applied { version: 1 }
        );
        assert_eq!(
            store.write_if_version("mode", None, b"PAUSED".to_vec()).expect("racing create"),
            WriteOutcome::Conflict { current: Some(1) }
        );
        assert_eq!(
            store.write_if_version("mode", Some(1), b"PAUSED".to_vec()).expect("update"),
            WriteOutcome::Applied { version: 2 }
        );
        let v = store.read("mode").expect("read").expect("present");
        assert_eq!((v.version, v.data.as_slice()), (2, b"PAUSED".as_slice()));
    }

    #[test]
    fn lock_guard_excludes_and_releases() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let guard = LockGuard::acquire(Arc::clone(&store), "admin", "a").expect("first");
        let err = LockGuard::acquire(Arc::clone(&store), "admin", "b").expect_err("held");
        assert!(matches!(err, SysprocError::Coordination(_)));
        assert!(store.unlock("admin", "b").is_err());
        drop(guard);
        assert!(store.try_lock("admin", "b").expect("relock"));
    }
}
