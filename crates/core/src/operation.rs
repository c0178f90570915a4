//! Operation records and keys for the replication engine (§4.6, §6).
//!
//! An [`OperationRecord`] is the unit the replication engine proposes,
//! accepts, and commits. Its wire form is a single `|`-delimited line with
//! `\|` escaping, fixed field order: `key|target|opcode|content|origin|timestamp`.

use std::fmt;
use std::str::FromStr;

/// Origin-unique, monotonically increasing identifier of a mutation (§4.6,
/// GLOSSARY "Operation key"). Rendered as `<origin>-<counter>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationKey {
    pub origin: String,
    pub counter: u64,
}

impl OperationKey {
    pub fn new(origin: impl Into<String>, counter: u64) -> Self {
        OperationKey { origin: origin.into(), counter }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.counter)
    }
}

impl FromStr for OperationKey {
    type Err = OperationRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (origin, counter) = s
            .rsplit_once('-')
            .ok_or_else(|| OperationRecordError::MalformedKey(s.to_string()))?;
        if origin.is_empty() {
            return Err(OperationRecordError::MalformedKey(s.to_string()));
        }
        let counter = counter
            .parse::<u64>()
            .map_err(|_| OperationRecordError::MalformedKey(s.to_string()))?;
        Ok(OperationKey::new(origin, counter))
    }
}

/// The closed set of mutation kinds a replica can apply (§4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Write-like: `target -> content`.
    Put,
    /// Delete-like: remove `target`. Idempotent — a missing key is not an error.
    Delete,
}

impl Opcode {
    fn to_token(self) -> &'static str {
        match self {
            Opcode::Put => "PUT",
            Opcode::Delete => "DELETE",
        }
    }

    fn from_token(token: &str) -> Result<Self, OperationRecordError> {
        match token {
            "PUT" => Ok(Opcode::Put),
            "DELETE" => Ok(Opcode::Delete),
            other => Err(OperationRecordError::UnknownOpcode(other.to_string())),
        }
    }
}

/// A proposed or committed mutation against one replica's local state (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub key: OperationKey,
    pub target: String,
    pub opcode: Opcode,
    pub content: String,
    pub origin: String,
    pub timestamp: u64,
}

/// Failure modes when parsing a wire-encoded operation record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OperationRecordError {
    #[error("expected 6 `|`-separated fields, found {0}")]
    WrongFieldCount(usize),
    #[error("malformed operation key: {0}")]
    MalformedKey(String),
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
}

/// Escape `|` as `\|` within one field.
fn escape_field(field: &str) -> String {
    field.replace('\\', "\\\\").replace('|', "\\|")
}

/// Split a `|`-delimited, `\|`-escaped line into exactly `n` fields.
fn split_escaped(line: &str, n: usize) -> Result<Vec<String>, OperationRecordError> {
    let mut fields = Vec::with_capacity(n);
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(&next) = chars.peek() {
                    if next == '|' || next == '\\' {
                        current.push(next);
                        chars.next();
                        continue;
                    }
                }
                current.push('\\');
            }
            '|' => {
                fields.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    fields.push(current);

    if fields.len() != n {
        return Err(OperationRecordError::WrongFieldCount(fields.len()));
    }
    Ok(fields)
}

impl OperationRecord {
    /// Encode as `key|target|opcode|content|origin|timestamp` (§4.6, §6).
    pub fn encode_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            escape_field(&self.key.to_string()),
            escape_field(&self.target),
            self.opcode.to_token(),
            escape_field(&self.content),
            escape_field(&self.origin),
            self.timestamp,
        )
    }

    /// Decode a line produced by [`OperationRecord::encode_line`].
    pub fn decode_line(line: &str) -> Result<Self, OperationRecordError> {
        let fields = split_escaped(line, 6)?;
        let key = fields[0].parse::<OperationKey>()?;
        let target = fields[1].clone();
        let opcode = Opcode::from_token(&fields[2])?;
        let content = fields[3].clone();
        let origin = fields[4].clone();
        let timestamp = fields[5]
            .parse::<u64>()
            .map_err(|_| OperationRecordError::MalformedTimestamp(fields[5].clone()))?;
        Ok(OperationRecord { key, target, opcode, content, origin, timestamp })
    }
}
