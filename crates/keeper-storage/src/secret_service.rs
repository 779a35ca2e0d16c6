use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("no secret stored for this entry")]
    NoEntry,
    #[error("secret service unavailable: {0}")]
    Unavailable(String),
}

/// Blocking access to an external secret store, addressed by collection and key
/// (OS keyring in production; memory in tests).
pub trait SecretService: Send + Sync {
    fn put(&self, collection: &str, key: &str, value: &str) -> Result<(), ServiceError>;
    fn get(&self, collection: &str, key: &str) -> Result<String, ServiceError>;
    fn delete(&self, collection: &str, key: &str) -> Result<(), ServiceError>;
}

/// OS keyring-backed service. Uses the `keyring` crate with the collection as
/// the service name and the key as the user name.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeyring;

impl OsKeyring {
    fn entry(collection: &str, key: &str) -> Result<keyring::Entry, ServiceError> {
        keyring::Entry::new(collection, key).map_err(map_keyring_err)
    }
}

impl SecretService for OsKeyring {
    fn put(&self, collection: &str, key: &str, value: &str) -> Result<(), ServiceError> {
        Self::entry(collection, key)?
            .set_password(value)
            .map_err(map_keyring_err)
    }

    fn get(&self, collection: &str, key: &str) -> Result<String, ServiceError> {
        Self::entry(collection, key)?
            .get_password()
            .map_err(map_keyring_err)
    }

    fn delete(&self, collection: &str, key: &str) -> Result<(), ServiceError> {
        Self::entry(collection, key)?
            .delete_credential()
            .map_err(map_keyring_err)
    }
}

fn map_keyring_err(err: keyring::Error) -> ServiceError {
    match err {
        keyring::Error::NoEntry => ServiceError::NoEntry,
        other => ServiceError::Unavailable(other.to_string()),
    }
}

/// In-memory secret service for tests and ephemeral sessions.
///
/// Can be switched offline, or made to stall, to exercise unavailability.
#[derive(Debug, Default, Clone)]
pub struct InMemorySecretService {
    entries: Arc<Mutex<HashMap<(String, String), String>>>,
    offline: Arc<AtomicBool>,
    stall: Arc<Mutex<Option<Duration>>>,
}

impl InMemorySecretService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `delay`.
    pub fn set_stall(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.stall.lock() {
            *guard = delay;
        }
    }

    /// Every stored value, for asserting on what reached the service.
    pub fn values(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, collection: &str, key: &str) -> bool {
        self.entries
            .lock()
            .map(|map| map.contains_key(&(collection.to_string(), key.to_string())))
            .unwrap_or(false)
    }

    fn with_entries<T>(
        &self,
        op: impl FnOnce(&mut HashMap<(String, String), String>) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let stall = self.stall.lock().ok().and_then(|guard| *guard);
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("service offline".to_string()));
        }
        let mut map = self
            .entries
            .lock()
            .map_err(|err| ServiceError::Unavailable(format!("lock poisoned: {err}")))?;
        op(&mut map)
    }
}

impl SecretService for InMemorySecretService {
    fn put(&self, collection: &str, key: &str, value: &str) -> Result<(), ServiceError> {
        self.with_entries(|map| {
            map.insert(
                (collection.to_string(), key.to_string()),
                value.to_string(),
            );
            Ok(())
        })
    }

    fn get(&self, collection: &str, key: &str) -> Result<String, ServiceError> {
        self.with_entries(|map| {
            map.get(&(collection.to_string(), key.to_string()))
                .cloned()
                .ok_or(ServiceError::NoEntry)
        })
    }

    fn delete(&self, collection: &str, key: &str) -> Result<(), ServiceError> {
        self.with_entries(|map| {
            map.remove(&(collection.to_string(), key.to_string()))
                .map(|_| ())
                .ok_or(ServiceError::NoEntry)
        })
    }
}
