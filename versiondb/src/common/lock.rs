use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A handle to a named mutex that can be stored and reused.
#[derive(Clone)]
pub struct LockHandle {
    lock: Arc<Mutex<()>>,
}

impl LockHandle {
    pub fn new() -> Self {
        LockHandle {
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Default for LockHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of named mutexes.
///
/// The same name always yields a handle to the same mutex, so unrelated
/// components can serialize work on one database name without sharing any
/// other state.
///
/// # Examples
///
/// ```rust
/// use versiondb::common::LockRegistry;
///
/// let registry = LockRegistry::new();
/// let handle = registry.get_lock("clock-app");
/// {
///     let _guard = handle.lock();
///     assert!(registry.get_lock("clock-app").is_locked());
/// }
/// assert!(!handle.is_locked());
/// ```
#[derive(Clone)]
pub struct LockRegistry {
    locks: Arc<RwLock<HashMap<String, LockHandle>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn get_lock(&self, name: &str) -> LockHandle {
        if let Some(handle) = self.locks.read().get(name) {
            return handle.clone();
        }
        let mut locks = self.locks.write();
        locks.entry(name.to_string()).or_default().clone()
    }

    pub fn remove_lock(&self, name: &str) -> bool {
        let mut locks = self.locks.write();
        locks.remove(name).is_some()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.read().len()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
