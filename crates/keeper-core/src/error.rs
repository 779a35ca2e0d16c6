use thiserror::Error;

use crate::group::AccountGroup;

/// Errors produced by the attribute store, secret backends, and the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeeperError {
    /// Requested key does not exist in the group.
    #[error("no value for {key} in {group}")]
    NotFound { group: String, key: String },
    /// An equivalent account already exists.
    #[error("account already exists: {group}")]
    DuplicateAccount { group: String },
    /// The group was never created, or has been removed.
    #[error("unknown account group: {group}")]
    UnknownGroup { group: String },
    /// The secret backend could not be reached or did not answer in time.
    #[error("secret backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },
    /// The persisted account file is malformed. Fatal at load time.
    #[error("corrupt account store at line {line}: {reason}")]
    CorruptStore { line: usize, reason: String },
    /// Removal reached some backends but not all; retrying completes it.
    #[error("removal of {group} incomplete: {reason}")]
    PartialRemoval { group: String, reason: String },
    #[error("invalid account group identifier: {input:?}")]
    InvalidGroup { input: String },
    #[error("invalid {kind}: {input:?}")]
    InvalidValue { kind: &'static str, input: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

pub type Result<T, E = KeeperError> = std::result::Result<T, E>;

impl KeeperError {
    pub fn not_found(group: &AccountGroup, key: &str) -> Self {
        KeeperError::NotFound {
            group: group.to_string(),
            key: key.to_string(),
        }
    }

    pub fn unknown_group(group: &AccountGroup) -> Self {
        KeeperError::UnknownGroup {
            group: group.to_string(),
        }
    }

    pub fn storage<E: ToString>(err: E) -> Self {
        KeeperError::Storage {
            reason: err.to_string(),
        }
    }

    /// Whether the error only means "no such value" and may be treated as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeeperError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_group_and_key() {
        let group: AccountGroup = "fakecm/fakeprotocol/joe0".parse().expect("group");
        let err = KeeperError::not_found(&group, "param-password");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "no value for param-password in fakecm/fakeprotocol/joe0"
        );
    }
}
