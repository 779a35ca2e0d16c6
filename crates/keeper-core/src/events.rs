use crate::group::AccountGroup;

/// Change notifications emitted after a mutation has been made durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEvent {
    Created(AccountGroup),
    /// A single attribute changed.
    Altered { group: AccountGroup, key: String },
    Toggled { group: AccountGroup, enabled: bool },
    Removed(AccountGroup),
}

impl AccountEvent {
    pub fn group(&self) -> &AccountGroup {
        match self {
            AccountEvent::Created(group) | AccountEvent::Removed(group) => group,
            AccountEvent::Altered { group, .. } | AccountEvent::Toggled { group, .. } => group,
        }
    }
}
