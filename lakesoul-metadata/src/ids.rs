//! Identifier and partition-descriptor model.
//!
//! `TableId` and `CommitId` are stable UUIDs; `PartitionDescriptor` is the
//! canonical `col1=v1,col2=v2` string used as the primary key of a
//! partition within a table, built and parsed with values URL-safe and
//! `,`/`=` percent-escaped.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub Uuid);

impl TableId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TableId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub Uuid);

impl CommitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A partition descriptor: the canonical string `col1=v1,col2=v2` in
/// declared range-column order. The empty string denotes the
/// unpartitioned singleton.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionDescriptor(pub String);

impl PartitionDescriptor {
    pub const UNPARTITIONED: &'static str = "";

    pub fn unpartitioned() -> Self {
        Self(String::new())
    }

    /// Builds the canonical descriptor from an ordered list of
    /// `(column, value)` pairs, percent-escaping `,` and `=` in values.
    pub fn build(bindings: &[(&str, &str)]) -> Self {
        if bindings.is_empty() {
            return Self::unpartitioned();
        }
        let desc = bindings
            .iter()
            .map(|(col, val)| format!("{col}={}", escape_value(val)))
            .collect::<Vec<_>>()
            .join(",");
        Self(desc)
    }

    /// Parses a canonical descriptor back into its ordered `(column,
    /// value)` bindings. Returns an empty vec for the unpartitioned
    /// singleton.
    pub fn parse(&self) -> Vec<(String, String)> {
        if self.0.is_empty() {
            return vec![];
        }
        self.0
            .split(',')
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), unescape_value(v)))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PartitionDescriptor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PartitionDescriptor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn escape_value(v: &str) -> String {
    v.replace('%', "%25").replace(',', "%2C").replace('=', "%3D")
}

fn unescape_value(v: &str) -> String {
    v.replace("%3D", "=").replace("%2C", ",").replace("%25", "%")
}
