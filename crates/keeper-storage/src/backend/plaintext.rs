use async_trait::async_trait;
use keeper_core::{secret::SecretBackend, AccountGroup, Result};
use tracing::instrument;

use crate::attribute_store::AttributeStore;

/// Default backend: secrets are ordinary attributes in the account file.
#[derive(Debug, Clone)]
pub struct PlaintextBackend {
    store: AttributeStore,
}

impl PlaintextBackend {
    pub fn new(store: AttributeStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretBackend for PlaintextBackend {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn description(&self) -> &'static str {
        "secrets stored inline in the account file"
    }

    fn stores_inline(&self) -> bool {
        true
    }

    async fn get(&self, group: &AccountGroup, key: &str) -> Result<String> {
        self.store.get(group, key)
    }

    #[instrument(skip_all, fields(%group, %key))]
    async fn set(&self, group: &AccountGroup, key: &str, value: &str) -> Result<()> {
        self.store.set(group, key, value)
    }

    #[instrument(skip_all, fields(%group, %key))]
    async fn delete(&self, group: &AccountGroup, key: &str) -> Result<()> {
        self.store.delete(group, key)
    }
}
