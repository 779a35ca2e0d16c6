use std::fmt;

use crate::error::{KeeperError, Result};

/// Typed parameter value as supplied by account creators.
///
/// Values are persisted as text; [`Value::to_keyfile`] and
/// [`Value::from_keyfile`] define that encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    List(Vec<String>),
}

/// The type a stored value should be decoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Bool,
    Int,
    UInt,
    List,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::UInt => "unsigned integer",
            ValueKind::List => "string list",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::List(_) => ValueKind::List,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Encode as the text stored in the account file (before line escaping).
    /// Lists are `;`-terminated items with `\` and `;` backslash-escaped.
    pub fn to_keyfile(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::List(items) => items.iter().fold(String::new(), |mut out, item| {
                for c in item.chars() {
                    if c == '\\' || c == ';' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push(';');
                out
            }),
        }
    }

    /// Decode stored text as `kind`.
    pub fn from_keyfile(kind: ValueKind, raw: &str) -> Result<Self> {
        let invalid = || KeeperError::InvalidValue {
            kind: kind.as_str(),
            input: raw.to_string(),
        };
        match kind {
            ValueKind::String => Ok(Value::String(raw.to_string())),
            ValueKind::Bool => match raw.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            ValueKind::Int => raw.trim().parse().map(Value::Int).map_err(|_| invalid()),
            ValueKind::UInt => raw.trim().parse().map(Value::UInt).map_err(|_| invalid()),
            ValueKind::List => decode_list(raw).map(Value::List).ok_or_else(invalid),
        }
    }
}

fn decode_list(raw: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(chars.next()?),
            ';' => items.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        items.push(current);
    }
    Some(items)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_keyfile())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value)
    }
}
