//! Text codec for the account key-file.
//!
//! One `[manager/protocol/account-id]` section per account group and one
//! `key=value` line per attribute. Blank lines and `#` comments are ignored.
//! Values escape `\`, newline, tab, carriage return, and a leading space.

use std::collections::BTreeMap;

use keeper_core::{AccountGroup, KeeperError, Result};

/// Attributes of one group, keyed by attribute name.
pub type Attributes = BTreeMap<String, String>;

/// Every group in the file.
pub type Groups = BTreeMap<AccountGroup, Attributes>;

/// Separator padding skipped around `=`; any other whitespace is value data.
const BLANKS: [char; 2] = [' ', '\t'];

/// Parse key-file text. Any malformed line is a [`KeeperError::CorruptStore`].
pub fn parse(input: &str) -> Result<Groups> {
    let mut groups = Groups::new();
    let mut current: Option<AccountGroup> = None;

    for (idx, raw_line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_start_matches(BLANKS);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .trim_end()
                .strip_suffix(']')
                .ok_or_else(|| corrupt(line_no, "unterminated group header"))?;
            let group: AccountGroup = name
                .parse()
                .map_err(|_| corrupt(line_no, format!("invalid group name {name:?}")))?;
            // Repeated sections merge into the earlier one.
            groups.entry(group.clone()).or_default();
            current = Some(group);
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| corrupt(line_no, "expected key=value"))?;
        let key = key.trim_end_matches(BLANKS);
        if key.is_empty() {
            return Err(corrupt(line_no, "empty key"));
        }
        let group = current
            .as_ref()
            .ok_or_else(|| corrupt(line_no, "key outside of any group"))?;
        let value = unescape_value(value.trim_start_matches(BLANKS), line_no)?;
        groups
            .entry(group.clone())
            .or_default()
            .insert(key.to_string(), value);
    }

    Ok(groups)
}

/// Render groups as key-file text, one blank line between sections.
pub fn serialize(groups: &Groups) -> String {
    let mut out = String::new();
    for (idx, (group, attributes)) in groups.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push('[');
        out.push_str(&group.section_name());
        out.push_str("]\n");
        for (key, value) in attributes {
            out.push_str(key);
            out.push('=');
            out.push_str(&escape_value(value));
            out.push('\n');
        }
    }
    out
}

/// Whether `key` can be written as the left-hand side of a `key=value` line.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.trim() == key
        && !key.starts_with('[')
        && !key.starts_with('#')
        && !key.contains(['=', '\n', '\r'])
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (idx, c) in value.chars().enumerate() {
        match c {
            ' ' if idx == 0 => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_value(raw: &str, line_no: usize) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(corrupt(
                    line_no,
                    format!("invalid escape sequence \\{other}"),
                ))
            }
            None => return Err(corrupt(line_no, "dangling escape at end of line")),
        }
    }
    Ok(out)
}

fn corrupt(line: usize, reason: impl Into<String>) -> KeeperError {
    KeeperError::CorruptStore {
        line,
        reason: reason.into(),
    }
}
