use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use keeper_core::{secret::SecretBackend, AccountGroup, KeeperError, Result};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::secret_service::{ServiceError, SecretService};

/// Upper bound on a single secret-service call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Secrets kept in an external secret service under one collection.
///
/// Service calls block, so each runs on the blocking pool and the caller
/// gets `BackendUnavailable` once the timeout expires. An abandoned call
/// keeps running and may still land. Calls therefore run one at a time in
/// the order they were issued: a delete issued after a timed-out write can
/// only take effect once that write has finished.
pub struct KeyringBackend {
    service: Arc<dyn SecretService>,
    collection: String,
    timeout: Duration,
    order: Arc<Mutex<()>>,
}

impl KeyringBackend {
    pub fn new(service: Arc<dyn SecretService>, collection: impl Into<String>) -> Self {
        Self {
            service,
            collection: collection.into(),
            timeout: DEFAULT_TIMEOUT,
            order: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fresh collection identifier for a store that was not given one.
    pub fn generate_collection_id() -> String {
        format!("keeper-{}", Uuid::new_v4().simple())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn entry_key(group: &AccountGroup, key: &str) -> String {
        format!("{group}/{key}")
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<Result<T, ServiceError>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecretService, &str) -> Result<T, ServiceError> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let collection = self.collection.clone();
        let order = Arc::clone(&self.order);
        let task = async move {
            // tokio's mutex is fair, so queued calls keep their issue order.
            let turn = order.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                let _turn = turn;
                f(service.as_ref(), &collection)
            })
            .await
        };

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(join)) => Err(self.unavailable(format!("{op} task failed: {join}"))),
            Err(_) => Err(self.unavailable(format!(
                "{op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    fn unavailable(&self, reason: String) -> KeeperError {
        KeeperError::BackendUnavailable {
            backend: self.name().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl SecretBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn description(&self) -> &'static str {
        "secrets stored in the OS keyring / secret service"
    }

    fn stores_inline(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(%group, %key, collection = %self.collection))]
    async fn get(&self, group: &AccountGroup, key: &str) -> Result<String> {
        let entry = Self::entry_key(group, key);
        match self
            .call("get", move |service, collection| service.get(collection, &entry))
            .await?
        {
            Ok(value) => Ok(value),
            Err(ServiceError::NoEntry) => Err(KeeperError::not_found(group, key)),
            Err(ServiceError::Unavailable(reason)) => Err(self.unavailable(reason)),
        }
    }

    #[instrument(skip_all, fields(%group, %key, collection = %self.collection))]
    async fn set(&self, group: &AccountGroup, key: &str, value: &str) -> Result<()> {
        let entry = Self::entry_key(group, key);
        let value = value.to_string();
        match self
            .call("set", move |service, collection| {
                service.put(collection, &entry, &value)
            })
            .await?
        {
            Ok(()) => {
                debug!("stored secret");
                Ok(())
            }
            Err(ServiceError::NoEntry) => Err(self.unavailable("entry vanished during write".into())),
            Err(ServiceError::Unavailable(reason)) => Err(self.unavailable(reason)),
        }
    }

    #[instrument(skip_all, fields(%group, %key, collection = %self.collection))]
    async fn delete(&self, group: &AccountGroup, key: &str) -> Result<()> {
        let entry = Self::entry_key(group, key);
        match self
            .call("delete", move |service, collection| {
                service.delete(collection, &entry)
            })
            .await?
        {
            Ok(()) | Err(ServiceError::NoEntry) => Ok(()),
            Err(ServiceError::Unavailable(reason)) => Err(self.unavailable(reason)),
        }
    }
}
