//! Account registry: the single entry point daemon-facing account objects use
//! to create, mutate, read, and remove accounts. It routes secret parameters
//! to the configured secret backend and everything else to the account file.

mod registry;

use std::collections::{BTreeMap, BTreeSet};

use keeper_core::AccountGroup;
use keeper_storage::Attributes;

pub use registry::AccountRegistry;

/// Prefix of connection-manager parameters in the account file.
pub const PARAM_PREFIX: &str = "param-";
pub const MANAGER_KEY: &str = "manager";
pub const PROTOCOL_KEY: &str = "protocol";
pub const ENABLED_KEY: &str = "Enabled";

/// Parameter names treated as secret unless configured otherwise.
pub const DEFAULT_SECRET_PARAMS: &[&str] = &["password"];

/// Attribute key for a connection parameter.
pub fn param_key(name: &str) -> String {
    format!("{PARAM_PREFIX}{name}")
}

/// Registry settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    secret_params: BTreeSet<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::with_secret_params(DEFAULT_SECRET_PARAMS.iter().copied())
    }
}

impl RegistryConfig {
    /// Bare parameter names (e.g. `password`) whose values are secret.
    pub fn with_secret_params<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secret_params: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_secret_param(&self, name: &str) -> bool {
        self.secret_params.contains(name)
    }

    /// Whether an attribute key (e.g. `param-password`) holds a secret.
    pub fn is_secret_key(&self, key: &str) -> bool {
        key.strip_prefix(PARAM_PREFIX)
            .is_some_and(|name| self.is_secret_param(name))
    }

    /// Attribute keys of every secret parameter.
    pub fn secret_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.secret_params.iter().map(|name| param_key(name))
    }
}

/// Snapshot of one account's non-secret state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub group: AccountGroup,
    pub manager: String,
    pub protocol: String,
    /// Non-secret connection parameters, without the `param-` prefix.
    pub params: BTreeMap<String, String>,
    /// Daemon-level properties such as `DisplayName` or `Icon`.
    pub properties: BTreeMap<String, String>,
}

impl Account {
    fn from_entries(group: AccountGroup, entries: Attributes, config: &RegistryConfig) -> Self {
        let mut account = Account {
            group,
            manager: String::new(),
            protocol: String::new(),
            params: BTreeMap::new(),
            properties: BTreeMap::new(),
        };
        for (key, value) in entries {
            if config.is_secret_key(&key) {
                continue;
            }
            match key.as_str() {
                MANAGER_KEY => account.manager = value,
                PROTOCOL_KEY => account.protocol = value,
                _ => match key.strip_prefix(PARAM_PREFIX) {
                    Some(name) => {
                        account.params.insert(name.to_string(), value);
                    }
                    None => {
                        account.properties.insert(key, value);
                    }
                },
            }
        }
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_secret_keys() {
        let config = RegistryConfig::default();
        assert!(config.is_secret_key("param-password"));
        assert!(!config.is_secret_key("password"));
        assert!(!config.is_secret_key("param-account"));
        assert_eq!(
            config.secret_keys().collect::<Vec<_>>(),
            vec!["param-password".to_string()]
        );
    }

    #[test]
    fn account_snapshot_hides_secrets() {
        let group: AccountGroup = "fakecm/fakeprotocol/joe0".parse().expect("group");
        let entries: Attributes = [
            ("manager", "fakecm"),
            ("protocol", "fakeprotocol"),
            ("param-account", "joe"),
            ("param-password", "secrecy"),
            ("DisplayName", "Work account"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let account = Account::from_entries(group, entries, &RegistryConfig::default());
        assert_eq!(account.manager, "fakecm");
        assert_eq!(account.protocol, "fakeprotocol");
        assert_eq!(account.params.get("account").map(String::as_str), Some("joe"));
        assert!(!account.params.contains_key("password"));
        assert_eq!(
            account.properties.get("DisplayName").map(String::as_str),
            Some("Work account")
        );
    }
}
