use std::{collections::BTreeMap, sync::Arc};

use keeper_core::{
    events::AccountEvent, secret::SecretBackend, AccountGroup, KeeperError, Result, Value,
    ValueKind,
};
use keeper_storage::{AttributeStore, Attributes, PENDING_REMOVAL_KEY};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::{
    param_key, Account, RegistryConfig, ENABLED_KEY, MANAGER_KEY, PARAM_PREFIX, PROTOCOL_KEY,
};

/// Parameter whose value names a new account's group.
const IDENTITY_PARAM: &str = "account";
const EVENT_CAPACITY: usize = 64;
/// Hidden group the backend check writes its throwaway secret under.
const CHECK_GROUP: &str = "keeper/health/check0";
const CHECK_VALUE: &str = "ok";

/// Owns the set of accounts and keeps the account file and the secret backend
/// consistent with each other.
///
/// Operations are serialized; each one is durable when it returns.
pub struct AccountRegistry {
    store: AttributeStore,
    backend: Arc<dyn SecretBackend>,
    config: RegistryConfig,
    op_lock: Mutex<()>,
    events: broadcast::Sender<AccountEvent>,
}

impl AccountRegistry {
    /// Build a registry over a loaded store.
    ///
    /// With a non-inline backend, secrets found in the account file are moved
    /// into the backend first. Groups left pending by an interrupted create or
    /// remove are then cleaned up; failures there are logged and retried on
    /// the next removal or open.
    #[instrument(skip_all, fields(backend = backend.name()))]
    pub async fn open(
        store: AttributeStore,
        backend: Arc<dyn SecretBackend>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = Self {
            store,
            backend,
            config,
            op_lock: Mutex::new(()),
            events,
        };

        registry.migrate_inline_secrets().await?;
        registry.retry_pending_removals().await;
        info!(
            accounts = registry.store.list_groups()?.len(),
            "account registry ready"
        );
        Ok(registry)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Receive an event after every successful mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.events.subscribe()
    }

    /// Provision a new account and return its group.
    ///
    /// Fails with `DuplicateAccount` when an account with the same manager,
    /// protocol, and non-secret parameters already exists.
    #[instrument(skip(self, params))]
    pub async fn create_account(
        &self,
        manager: &str,
        protocol: &str,
        params: BTreeMap<String, Value>,
    ) -> Result<AccountGroup> {
        let _guard = self.op_lock.lock().await;

        let (secrets, plain): (Vec<_>, Vec<_>) = params
            .iter()
            .partition(|(name, _)| self.config.is_secret_param(name));
        let plain: Attributes = plain
            .into_iter()
            .map(|(name, value)| (param_key(name), value.to_keyfile()))
            .collect();

        if let Some(existing) = self.find_equivalent(manager, protocol, &plain)? {
            return Err(KeeperError::DuplicateAccount {
                group: existing.to_string(),
            });
        }

        // Section names are plaintext, so a secret identity falls back to the placeholder.
        let identity = params
            .get(IDENTITY_PARAM)
            .filter(|_| !self.config.is_secret_param(IDENTITY_PARAM))
            .map(Value::to_keyfile)
            .unwrap_or_else(|| IDENTITY_PARAM.to_string());
        let group = self.allocate_group(manager, protocol, &identity)?;

        // The group stays hidden until every secret has reached the backend.
        let mut entries = plain;
        entries.insert(MANAGER_KEY.to_string(), manager.to_string());
        entries.insert(PROTOCOL_KEY.to_string(), protocol.to_string());
        entries.insert(PENDING_REMOVAL_KEY.to_string(), "true".to_string());
        self.store.set_many(&group, entries)?;

        for (name, value) in secrets {
            let stored = self
                .backend
                .set(&group, &param_key(name), &value.to_keyfile())
                .await;
            if let Err(err) = stored {
                self.abandon_creation(&group).await;
                return Err(err);
            }
        }
        if let Err(err) = self.store.clear_pending(&group) {
            self.abandon_creation(&group).await;
            return Err(err);
        }

        info!(%group, "account created");
        self.emit(AccountEvent::Created(group.clone()));
        Ok(group)
    }

    /// Write an attribute. Secret parameters go to the secret backend.
    #[instrument(skip_all, fields(%group, %key))]
    pub async fn set_property(
        &self,
        group: &AccountGroup,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let _guard = self.op_lock.lock().await;
        self.write_attribute(group, key, &value).await?;
        self.emit(AccountEvent::Altered {
            group: group.clone(),
            key: key.to_string(),
        });
        Ok(())
    }

    #[instrument(skip(self), fields(%group))]
    pub async fn set_enabled(&self, group: &AccountGroup, enabled: bool) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.write_attribute(group, ENABLED_KEY, &Value::Bool(enabled))
            .await?;
        self.emit(AccountEvent::Toggled {
            group: group.clone(),
            enabled,
        });
        Ok(())
    }

    /// Read an attribute, wherever it is stored.
    pub async fn get_property(&self, group: &AccountGroup, key: &str) -> Result<String> {
        let _guard = self.op_lock.lock().await;
        self.read_attribute(group, key).await
    }

    /// Read a connection parameter by bare name, decoded as `kind`.
    pub async fn get_param(
        &self,
        group: &AccountGroup,
        name: &str,
        kind: ValueKind,
    ) -> Result<Value> {
        let _guard = self.op_lock.lock().await;
        let raw = self.read_attribute(group, &param_key(name)).await?;
        Value::from_keyfile(kind, &raw)
    }

    /// Read a secret parameter through the active backend.
    #[instrument(skip(self), fields(%group))]
    pub async fn get_secret_param(&self, group: &AccountGroup, key: &str) -> Result<String> {
        let _guard = self.op_lock.lock().await;
        self.ensure_live(group)?;
        self.backend.get(group, key).await
    }

    /// Remove an account from the account file and the secret backend.
    ///
    /// If the backend cannot be reached the account stays hidden and marked,
    /// and `PartialRemoval` is returned; calling again completes the removal.
    #[instrument(skip(self), fields(%group))]
    pub async fn remove_account(&self, group: &AccountGroup) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        if !self.store.exists(group)? {
            return Err(KeeperError::unknown_group(group));
        }

        self.store.mark_pending(group)?;
        self.finish_removal(group).await?;

        info!("account removed");
        self.emit(AccountEvent::Removed(group.clone()));
        Ok(())
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountGroup>> {
        let _guard = self.op_lock.lock().await;
        self.store.list_groups()
    }

    /// Non-secret snapshot of one account.
    pub async fn account(&self, group: &AccountGroup) -> Result<Account> {
        let _guard = self.op_lock.lock().await;
        self.ensure_live(group)?;
        let entries = self.store.group_entries(group)?;
        Ok(Account::from_entries(group.clone(), entries, &self.config))
    }

    /// Round-trip a throwaway secret through the backend.
    ///
    /// The scratch group is marked pending before anything is written, so it
    /// never shows up as an account; if cleanup fails it is finished at the
    /// next open like any interrupted removal.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn check_backend(&self) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let group: AccountGroup = CHECK_GROUP.parse()?;
        if self.store.contains_group(&group)? {
            return Err(KeeperError::DuplicateAccount {
                group: group.to_string(),
            });
        }
        let key = self
            .config
            .secret_keys()
            .next()
            .unwrap_or_else(|| param_key("password"));

        self.store.set_many(
            &group,
            [(PENDING_REMOVAL_KEY.to_string(), "true".to_string())],
        )?;
        let outcome = self.round_trip(&group, &key).await;
        let cleanup = self.finish_removal(&group).await;
        if let Err(err) = &cleanup {
            warn!(%group, error = %err, "backend check left its scratch group marked");
        }
        outcome.and(cleanup)
    }

    async fn round_trip(&self, group: &AccountGroup, key: &str) -> Result<()> {
        self.backend.set(group, key, CHECK_VALUE).await?;
        let read = self.backend.get(group, key).await?;
        if read != CHECK_VALUE {
            return Err(KeeperError::BackendUnavailable {
                backend: self.backend.name().to_string(),
                reason: "read back a different value than was written".to_string(),
            });
        }
        Ok(())
    }

    async fn write_attribute(&self, group: &AccountGroup, key: &str, value: &Value) -> Result<()> {
        self.ensure_live(group)?;
        if matches!(key, MANAGER_KEY | PROTOCOL_KEY | PENDING_REMOVAL_KEY) {
            return Err(KeeperError::InvalidValue {
                kind: "writable attribute key",
                input: key.to_string(),
            });
        }

        let raw = value.to_keyfile();
        if self.config.is_secret_key(key) {
            self.backend.set(group, key, &raw).await
        } else {
            self.store.set(group, key, &raw)
        }
    }

    async fn read_attribute(&self, group: &AccountGroup, key: &str) -> Result<String> {
        self.ensure_live(group)?;
        if self.config.is_secret_key(key) {
            self.backend.get(group, key).await
        } else {
            self.store.get(group, key)
        }
    }

    fn ensure_live(&self, group: &AccountGroup) -> Result<()> {
        if self.store.contains_group(group)? {
            Ok(())
        } else {
            Err(KeeperError::unknown_group(group))
        }
    }

    fn find_equivalent(
        &self,
        manager: &str,
        protocol: &str,
        plain: &Attributes,
    ) -> Result<Option<AccountGroup>> {
        for group in self.store.list_groups()? {
            let entries = self.store.group_entries(&group)?;
            let same_owner = entries.get(MANAGER_KEY).map(String::as_str) == Some(manager)
                && entries.get(PROTOCOL_KEY).map(String::as_str) == Some(protocol);
            if !same_owner {
                continue;
            }
            let params: Attributes = entries
                .into_iter()
                .filter(|(key, _)| key.starts_with(PARAM_PREFIX) && !self.config.is_secret_key(key))
                .collect();
            if &params == plain {
                return Ok(Some(group));
            }
        }
        Ok(None)
    }

    fn allocate_group(&self, manager: &str, protocol: &str, identity: &str) -> Result<AccountGroup> {
        for serial in 0..u32::MAX {
            let group = AccountGroup::allocate(manager, protocol, identity, serial)?;
            if !self.store.exists(&group)? {
                return Ok(group);
            }
        }
        Err(KeeperError::Storage {
            reason: format!("no free account name for {identity}"),
        })
    }

    /// Delete the secrets, then the group. The group must already be marked.
    async fn finish_removal(&self, group: &AccountGroup) -> Result<()> {
        let partial = |err: KeeperError| KeeperError::PartialRemoval {
            group: group.to_string(),
            reason: err.to_string(),
        };

        if !self.backend.stores_inline() {
            for key in self.config.secret_keys() {
                self.backend.delete(group, &key).await.map_err(partial)?;
            }
        }
        self.store.delete_group(group).map_err(partial)?;
        debug!(%group, "group purged from all backends");
        Ok(())
    }

    async fn abandon_creation(&self, group: &AccountGroup) {
        if let Err(err) = self.finish_removal(group).await {
            warn!(%group, error = %err, "incomplete account left marked for cleanup");
        }
    }

    async fn migrate_inline_secrets(&self) -> Result<()> {
        if self.backend.stores_inline() {
            return Ok(());
        }
        for (group, entries) in self.store.snapshot()? {
            for (key, value) in entries
                .iter()
                .filter(|(key, _)| self.config.is_secret_key(key))
            {
                self.backend.set(&group, key, value).await?;
                self.store.delete(&group, key)?;
                info!(%group, key = %key, backend = self.backend.name(), "moved inline secret to backend");
            }
        }
        Ok(())
    }

    async fn retry_pending_removals(&self) {
        let pending = match self.store.pending_groups() {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "could not list pending groups");
                return;
            }
        };
        for group in pending {
            match self.finish_removal(&group).await {
                Ok(()) => info!(%group, "completed interrupted account cleanup"),
                Err(err) => warn!(%group, error = %err, "account cleanup still incomplete"),
            }
        }
    }

    fn emit(&self, event: AccountEvent) {
        // Sending only fails when nobody is subscribed.
        let _ = self.events.send(event);
    }
}
