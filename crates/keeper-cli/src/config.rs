use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// Environment override for the account directory.
pub const ACCOUNT_DIR_ENV: &str = "KEEPER_ACCOUNT_DIR";
/// Environment override for the keyring collection.
pub const KEYRING_NAME_ENV: &str = "KEEPER_KEYRING_NAME";

/// User-level configuration loaded from `~/.config/keeper/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the directory holding `accounts.cfg`.
    pub account_dir: Option<PathBuf>,
    /// Where secret parameters are stored.
    #[serde(default)]
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecretsConfig {
    pub backend: BackendKind,
    /// Keyring collection; a fresh one is generated when absent.
    pub collection: Option<String>,
    /// Per-call limit for keyring operations.
    pub timeout_ms: u64,
    /// Parameter names treated as secret.
    pub params: Vec<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Plaintext,
            collection: None,
            timeout_ms: 5_000,
            params: vec!["password".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Plaintext,
    Keyring,
}

impl Config {
    /// Apply environment overrides; `lookup` is `std::env::var` outside tests.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ACCOUNT_DIR_ENV).filter(|v| !v.is_empty()) {
            self.account_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = lookup(KEYRING_NAME_ENV).filter(|v| !v.is_empty()) {
            self.secrets.backend = BackendKind::Keyring;
            self.secrets.collection = Some(name);
        }
        self
    }
}

/// Load config from the default path plus environment overrides.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    Ok(load_from_path(path)?.with_env(|key| std::env::var(key).ok()))
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("keeper").join("config.toml"))
}

/// Write the given config to disk unless a file already exists there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_if_missing(config, &default_path()?)
}

fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
