use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use color_eyre::Result;
use dirs::data_dir;
use keeper_core::secret::SecretBackend;
use keeper_registry::{AccountRegistry, RegistryConfig};
use keeper_storage::{
    backend::{KeyringBackend, PlaintextBackend},
    secret_service::OsKeyring,
    AttributeStore,
};
use tracing::{debug, info};

use crate::config::{BackendKind, Config};

/// Resolve the default account directory for keeper.
pub fn default_account_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("keeper"))
}

/// Account directory from config, falling back to the platform default.
pub fn account_dir(config: &Config) -> Result<PathBuf> {
    match &config.account_dir {
        Some(dir) => Ok(dir.clone()),
        None => default_account_dir(),
    }
}

/// File next to `accounts.cfg` remembering a generated keyring collection.
pub const COLLECTION_FILE: &str = "keyring-collection";

/// Keyring collection for the account directory `dir`.
///
/// A configured collection wins. Otherwise the one saved in `dir` is reused,
/// and on first use a fresh id is generated and saved there.
pub fn keyring_collection(config: &Config, dir: &Path) -> Result<String> {
    if let Some(collection) = &config.secrets.collection {
        return Ok(collection.clone());
    }

    let path = dir.join(COLLECTION_FILE);
    match fs::read_to_string(&path) {
        Ok(saved) if !saved.trim().is_empty() => return Ok(saved.trim().to_string()),
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let generated = KeyringBackend::generate_collection_id();
    fs::create_dir_all(dir)?;
    fs::write(&path, format!("{generated}\n"))?;
    info!(%generated, path = %path.display(), "saved new keyring collection");
    Ok(generated)
}

/// Build the configured secret backend over `store`, whose file lives in `dir`.
pub fn backend_from_config(
    config: &Config,
    dir: &Path,
    store: &AttributeStore,
) -> Result<Arc<dyn SecretBackend>> {
    let backend: Arc<dyn SecretBackend> = match config.secrets.backend {
        BackendKind::Plaintext => Arc::new(PlaintextBackend::new(store.clone())),
        BackendKind::Keyring => Arc::new(
            KeyringBackend::new(Arc::new(OsKeyring), keyring_collection(config, dir)?)
                .with_timeout(Duration::from_millis(config.secrets.timeout_ms)),
        ),
    };
    Ok(backend)
}

/// Open the account store and registry described by `config`.
pub async fn registry_from_config(config: &Config) -> Result<AccountRegistry> {
    let dir = account_dir(config)?;
    debug!(?dir, backend = ?config.secrets.backend, "opening account store");
    let store = AttributeStore::open_in(&dir).map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let backend = backend_from_config(config, &dir, &store)?;
    let registry_config = RegistryConfig::with_secret_params(config.secrets.params.iter().cloned());
    AccountRegistry::open(store, backend, registry_config)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))
}

/// Helper for tests: a plaintext registry rooted at a temp dir.
#[cfg(test)]
pub async fn test_registry(root: impl Into<PathBuf>) -> AccountRegistry {
    let config = Config {
        account_dir: Some(root.into()),
        ..Config::default()
    };
    registry_from_config(&config)
        .await
        .expect("test registry should open")
}
