use async_trait::async_trait;

use crate::{error::Result, group::AccountGroup};

/// Contract for storing sensitive account parameters (passwords and the like).
///
/// Implementations:
/// - plaintext: secrets are ordinary attributes in the account file
/// - keyring: secrets live in an external secret service
///
/// Failures to reach the underlying store surface as
/// [`KeeperError::BackendUnavailable`](crate::KeeperError::BackendUnavailable);
/// callers must not fall back to another backend.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Short name used for logging and configuration.
    fn name(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> &'static str;

    /// True when secrets are kept inline in the plaintext account file,
    /// i.e. this is the default backend.
    fn stores_inline(&self) -> bool;

    /// Retrieve the secret stored under `(group, key)`.
    async fn get(&self, group: &AccountGroup, key: &str) -> Result<String>;

    /// Persist a secret, overwriting any existing value.
    async fn set(&self, group: &AccountGroup, key: &str, value: &str) -> Result<()>;

    /// Remove a secret (idempotent).
    async fn delete(&self, group: &AccountGroup, key: &str) -> Result<()>;
}
