//! Key/value property files.
//!
//! The on-disk format is the classic `key=value` property file: ISO-8859-1
//! bytes, `#`/`!` comments, backslash line continuations, and `\uXXXX`
//! escapes for anything outside printable ASCII. Object metadata and payload
//! sidecars are both stored this way, so the codec has to read files written
//! by other implementations of the same layout.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// An ordered property set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set `key` to `value`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse raw file bytes. Bytes are decoded as ISO-8859-1.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        let text: String = bytes.iter().map(|&b| b as char).collect();
        Self::parse(&text)
    }

    /// Parse property text.
    pub fn parse(text: &str) -> Result<Self, TypeError> {
        let mut props = Self::new();
        for (line_no, line) in logical_lines(text) {
            let (key, value) = split_entry(&line, line_no)?;
            props.entries.insert(key, value);
        }
        Ok(props)
    }

    /// Render the property file. Each comment becomes a `#` line at the top.
    ///
    /// The output is pure ASCII, so it is also valid ISO-8859-1.
    pub fn to_file_string(&self, comments: &[&str]) -> String {
        let mut out = String::new();
        for comment in comments {
            out.push('#');
            escape_into(&mut out, &comment.replace(['\r', '\n'], " "), Escape::Comment);
            out.push('\n');
        }
        for (key, value) in &self.entries {
            escape_into(&mut out, key, Escape::Key);
            out.push('=');
            escape_into(&mut out, value, Escape::Value);
            out.push('\n');
        }
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

/// Join continuation lines and drop comments and blank lines.
///
/// Yields `(first natural line number, logical line)`.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.split('\n').enumerate() {
        let trimmed = raw.trim_start_matches(is_blank);
        let (line_no, mut buf) = match pending.take() {
            Some(p) => p,
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                (idx + 1, String::new())
            }
        };

        let trailing = trimmed.chars().rev().take_while(|&c| c == '\\').count();
        if trailing % 2 == 1 {
            buf.push_str(&trimmed[..trimmed.len() - 1]);
            pending = Some((line_no, buf));
        } else {
            buf.push_str(trimmed);
            lines.push((line_no, buf));
        }
    }
    if let Some(p) = pending {
        lines.push(p);
    }
    lines
}

fn split_entry(line: &str, line_no: usize) -> Result<(String, String), TypeError> {
    let chars: Vec<char> = line.chars().collect();
    let mut key_end = chars.len();
    let mut value_start = chars.len();
    let mut has_sep = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' || c == ':' {
            key_end = i;
            value_start = i + 1;
            has_sep = true;
            break;
        } else if is_blank(c) {
            key_end = i;
            value_start = i + 1;
            break;
        }
    }

    while value_start < chars.len() {
        let c = chars[value_start];
        if !is_blank(c) {
            if !has_sep && (c == '=' || c == ':') {
                has_sep = true;
            } else {
                break;
            }
        }
        value_start += 1;
    }

    let key = unescape(&chars[..key_end], line_no)?;
    let value = unescape(&chars[value_start..], line_no)?;
    Ok((key, value))
}

fn unescape(chars: &[char], line_no: usize) -> Result<String, TypeError> {
    let mut out = String::with_capacity(chars.len());
    let mut units: Vec<u16> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '\\' {
            flush_units(&mut out, &mut units);
            out.push(c);
            continue;
        }
        let Some(&next) = chars.get(i) else {
            break;
        };
        i += 1;
        if next == 'u' {
            if chars.len() < i + 4 {
                return Err(TypeError::MalformedProperty {
                    line: line_no,
                    reason: "truncated \\uXXXX escape".into(),
                });
            }
            let digits: String = chars[i..i + 4].iter().collect();
            let unit = u16::from_str_radix(&digits, 16).map_err(|_| TypeError::MalformedProperty {
                line: line_no,
                reason: format!("invalid \\uXXXX escape '{digits}'"),
            })?;
            units.push(unit);
            i += 4;
            continue;
        }
        flush_units(&mut out, &mut units);
        out.push(match next {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'f' => '\x0c',
            other => other,
        });
    }
    flush_units(&mut out, &mut units);
    Ok(out)
}

/// Decode buffered UTF-16 escape units; lone surrogates become U+FFFD.
fn flush_units(out: &mut String, units: &mut Vec<u16>) {
    if units.is_empty() {
        return;
    }
    out.extend(char::decode_utf16(units.drain(..)).map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER)));
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Escape {
    Key,
    Value,
    Comment,
}

fn escape_into(out: &mut String, s: &str, mode: Escape) {
    for (i, c) in s.chars().enumerate() {
        if mode == Escape::Comment {
            push_ascii_or_unicode(out, c);
            continue;
        }
        match c {
            '\\' => out.push_str("\\\\"),
            ' ' if mode == Escape::Key || i == 0 => out.push_str("\\ "),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            _ => push_ascii_or_unicode(out, c),
        }
    }
}

fn push_ascii_or_unicode(out: &mut String, c: char) {
    if (' '..='~').contains(&c) {
        out.push(c);
    } else {
        let mut buf = [0u16; 2];
        for unit in c.encode_utf16(&mut buf) {
            let _ = write!(out, "\\u{unit:04X}");
        }
    }
}
