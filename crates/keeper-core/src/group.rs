use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{KeeperError, Result};

/// Namespacing identifier for one account: `manager/protocol/account-id`.
///
/// The three components are stored already escaped, so the section name in
/// the account file is simply the components joined by `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountGroup {
    manager: String,
    protocol: String,
    account_id: String,
}

impl AccountGroup {
    /// Build a group from components that are already in their stored form.
    pub fn new(
        manager: impl Into<String>,
        protocol: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Result<Self> {
        let group = Self {
            manager: manager.into(),
            protocol: protocol.into(),
            account_id: account_id.into(),
        };
        let valid = [&group.manager, &group.protocol, &group.account_id]
            .iter()
            .all(|part| is_valid_component(part));
        if !valid {
            return Err(KeeperError::InvalidGroup {
                input: group.to_string(),
            });
        }
        Ok(group)
    }

    /// Derive the group for a new account from its manager, protocol, and
    /// identifying parameter, disambiguated by `serial`.
    ///
    /// The manager and identity are escaped with [`escape_identifier`]; the
    /// protocol only has `-` replaced by `_`.
    pub fn allocate(manager: &str, protocol: &str, identity: &str, serial: u32) -> Result<Self> {
        Self::new(
            escape_identifier(manager),
            protocol.replace('-', "_"),
            format!("{}{serial}", escape_identifier(identity)),
        )
    }

    pub fn manager(&self) -> &str {
        &self.manager
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Section name used in the account file.
    pub fn section_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AccountGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.manager, self.protocol, self.account_id)
    }
}

impl FromStr for AccountGroup {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(manager), Some(protocol), Some(account_id), None) => {
                Self::new(manager, protocol, account_id)
            }
            _ => Err(KeeperError::InvalidGroup {
                input: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for AccountGroup {
    type Error = KeeperError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AccountGroup> for String {
    fn from(group: AccountGroup) -> Self {
        group.to_string()
    }
}

fn is_valid_component(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Escape an arbitrary string into `[A-Za-z0-9_]`.
///
/// Every byte outside `[A-Za-z0-9]`, and a leading digit, becomes `_`
/// followed by two lowercase hex digits. The empty string becomes `_`.
pub fn escape_identifier(input: &str) -> String {
    if input.is_empty() {
        return "_".to_string();
    }

    let mut out = String::with_capacity(input.len());
    for (idx, byte) in input.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() && !(idx == 0 && byte.is_ascii_digit());
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

/// Reverse [`escape_identifier`]. Returns `None` for input it could not
/// have produced.
pub fn unescape_identifier(input: &str) -> Option<String> {
    if input == "_" {
        return Some(String::new());
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'_' => {
                let hex = input.get(idx + 1..idx + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                idx += 3;
            }
            byte if byte.is_ascii_alphanumeric() => {
                out.push(byte);
                idx += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_escaped_section_name() {
        let group = AccountGroup::allocate("fakecm", "fakeprotocol", "dontdivert@example.com", 0)
            .expect("allocate");
        assert_eq!(
            group.section_name(),
            "fakecm/fakeprotocol/dontdivert_40example_2ecom0"
        );

        let parsed: AccountGroup = group.section_name().parse().expect("parse");
        assert_eq!(parsed, group);
        assert_eq!(parsed.manager(), "fakecm");
        assert_eq!(parsed.protocol(), "fakeprotocol");
        assert_eq!(parsed.account_id(), "dontdivert_40example_2ecom0");
    }

    #[test]
    fn protocol_dashes_become_underscores() {
        let group = AccountGroup::allocate("gabble", "local-xmpp", "me", 3).expect("allocate");
        assert_eq!(group.to_string(), "gabble/local_xmpp/me3");
    }

    #[test]
    fn escapes_leading_digit_and_punctuation() {
        assert_eq!(escape_identifier("1a-b_c"), "_31a_2db_5fc");
        assert_eq!(escape_identifier(""), "_");
        assert_eq!(escape_identifier("é"), "_c3_a9");
    }

    #[test]
    fn unescape_reverses_escape() {
        assert_eq!(
            unescape_identifier("dontdivert_40example_2ecom").as_deref(),
            Some("dontdivert@example.com")
        );
        assert_eq!(unescape_identifier("_").as_deref(), Some(""));
        assert_eq!(unescape_identifier("_c3_a9").as_deref(), Some("é"));
        assert_eq!(unescape_identifier("bad_zz"), None);
        assert_eq!(unescape_identifier("trailing_4"), None);
    }

    #[test]
    fn rejects_malformed_section_names() {
        for input in [
            "",
            "fakecm/fakeprotocol",
            "fakecm//joe0",
            "a/b/c/d",
            "fakecm/fake protocol/joe0",
            "fakecm/fakeprotocol/joe@example.com",
        ] {
            let err = input.parse::<AccountGroup>().expect_err(input);
            assert!(matches!(err, KeeperError::InvalidGroup { .. }), "{input}");
        }
    }

    #[test]
    fn serializes_as_section_name() {
        let group: AccountGroup = "fakecm/fakeprotocol/joe0".parse().expect("group");
        let json = serde_json::to_string(&group).expect("serialize");
        assert_eq!(json, "\"fakecm/fakeprotocol/joe0\"");
        let back: AccountGroup = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, group);
    }
}
