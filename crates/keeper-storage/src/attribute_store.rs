use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use keeper_core::{AccountGroup, KeeperError, Result};
use tracing::{debug, instrument};

use crate::{driver::PersistenceDriver, keyfile};

pub use crate::keyfile::{Attributes, Groups};

/// Reserved attribute marking a group whose creation or removal has not yet
/// reached every backend. Marked groups are hidden from [`AttributeStore::list_groups`].
pub const PENDING_REMOVAL_KEY: &str = "PendingRemoval";

/// Durable key/value store for account groups, backed by the account key-file.
///
/// Every mutation is flushed to disk before it returns. The in-memory state
/// only changes once the flush has succeeded, so a failed write leaves the
/// store exactly as it was. Clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct AttributeStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Debug)]
struct StoreState {
    driver: PersistenceDriver,
    groups: Groups,
}

impl AttributeStore {
    /// Load the store from `driver`; fails with `CorruptStore` on a malformed file.
    pub fn open(driver: PersistenceDriver) -> Result<Self> {
        let groups = driver.load()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreState { driver, groups })),
        })
    }

    /// Open `accounts.cfg` inside `dir`.
    pub fn open_in(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(PersistenceDriver::in_dir(dir))
    }

    pub fn path(&self) -> Result<PathBuf> {
        Ok(self.lock()?.driver.path().to_path_buf())
    }

    /// Discard in-memory state and re-read the file.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.groups = state.driver.load()?;
        Ok(())
    }

    pub fn get(&self, group: &AccountGroup, key: &str) -> Result<String> {
        let state = self.lock()?;
        state
            .groups
            .get(group)
            .and_then(|attrs| attrs.get(key))
            .cloned()
            .ok_or_else(|| KeeperError::not_found(group, key))
    }

    /// Write one attribute, creating the group if needed.
    #[instrument(skip_all, fields(%group, %key))]
    pub fn set(&self, group: &AccountGroup, key: &str, value: &str) -> Result<()> {
        self.set_many(group, [(key.to_string(), value.to_string())])
    }

    /// Write several attributes of one group with a single flush.
    pub fn set_many<I>(&self, group: &AccountGroup, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        if let Some((key, _)) = entries.iter().find(|(key, _)| !keyfile::is_valid_key(key)) {
            return Err(KeeperError::InvalidValue {
                kind: "attribute key",
                input: key.clone(),
            });
        }
        self.mutate(|groups| {
            groups.entry(group.clone()).or_default().extend(entries);
            Ok(())
        })
    }

    /// Remove one attribute (idempotent). A group left without attributes is dropped.
    #[instrument(skip_all, fields(%group, %key))]
    pub fn delete(&self, group: &AccountGroup, key: &str) -> Result<()> {
        let present = {
            let state = self.lock()?;
            state
                .groups
                .get(group)
                .is_some_and(|attrs| attrs.contains_key(key))
        };
        if !present {
            return Ok(());
        }
        self.mutate(|groups| {
            if let Some(attrs) = groups.get_mut(group) {
                attrs.remove(key);
                if attrs.is_empty() {
                    groups.remove(group);
                }
            }
            Ok(())
        })
    }

    /// Remove a group and every attribute in it. Returns whether it existed.
    #[instrument(skip_all, fields(%group))]
    pub fn delete_group(&self, group: &AccountGroup) -> Result<bool> {
        if !self.exists(group)? {
            return Ok(false);
        }
        self.mutate(|groups| Ok(groups.remove(group).is_some()))
    }

    /// Groups that are fully present, excluding those pending removal.
    pub fn list_groups(&self) -> Result<Vec<AccountGroup>> {
        let state = self.lock()?;
        Ok(state
            .groups
            .iter()
            .filter(|(_, attrs)| !is_marked(attrs))
            .map(|(group, _)| group.clone())
            .collect())
    }

    /// Groups carrying the pending-removal marker.
    pub fn pending_groups(&self) -> Result<Vec<AccountGroup>> {
        let state = self.lock()?;
        Ok(state
            .groups
            .iter()
            .filter(|(_, attrs)| is_marked(attrs))
            .map(|(group, _)| group.clone())
            .collect())
    }

    /// True if the group is present and not pending removal.
    pub fn contains_group(&self, group: &AccountGroup) -> Result<bool> {
        let state = self.lock()?;
        Ok(state.groups.get(group).is_some_and(|attrs| !is_marked(attrs)))
    }

    /// True if the group is present in any state.
    pub fn exists(&self, group: &AccountGroup) -> Result<bool> {
        Ok(self.lock()?.groups.contains_key(group))
    }

    pub fn is_pending(&self, group: &AccountGroup) -> Result<bool> {
        let state = self.lock()?;
        Ok(state.groups.get(group).is_some_and(is_marked))
    }

    /// All attributes of a group, pending or not.
    pub fn group_entries(&self, group: &AccountGroup) -> Result<Attributes> {
        let state = self.lock()?;
        state
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| KeeperError::unknown_group(group))
    }

    /// Hide the group until a removal completes.
    pub fn mark_pending(&self, group: &AccountGroup) -> Result<()> {
        if !self.exists(group)? {
            return Err(KeeperError::unknown_group(group));
        }
        if self.is_pending(group)? {
            return Ok(());
        }
        debug!(%group, "marking group pending removal");
        self.set(group, PENDING_REMOVAL_KEY, "true")
    }

    pub fn clear_pending(&self, group: &AccountGroup) -> Result<()> {
        self.delete(group, PENDING_REMOVAL_KEY)
    }

    /// Copy of the full state, pending groups included.
    pub fn snapshot(&self) -> Result<Groups> {
        Ok(self.lock()?.groups.clone())
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut Groups) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let mut next = state.groups.clone();
        let out = apply(&mut next)?;
        state.driver.save(&next)?;
        state.groups = next;
        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.inner.lock().map_err(|err| KeeperError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

fn is_marked(attrs: &Attributes) -> bool {
    attrs.contains_key(PENDING_REMOVAL_KEY)
}
