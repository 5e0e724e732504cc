//! Hierarchical blocks: a key line followed by labelled fields.
//!
//! ```text
//! my-host.default.service.arpa.
//!     deleted: false
//!     addresses: [fdde:ad00:beef:0:0:ff:fe00:fc10, 2001::1]
//! ```
//!
//! A record marked `deleted: true` carries no further fields; lines up to the
//! next key line are dropped.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use super::content;
use crate::error::ParseSkipped;

const DECODER: &str = "block";

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_\-]*)\s*:\s*(.*)$").expect("field regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    List(Vec<String>),
}

impl Value {
    fn parse(raw: &str) -> Value {
        match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            Some(items) => Value::List(
                items
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            None => Value::Text(raw.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            Value::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub key: String,
    pub deleted: bool,
    pub fields: BTreeMap<String, Value>,
}

impl BlockRecord {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            deleted: false,
            fields: BTreeMap::new(),
        }
    }

    /// First dot-separated label of the key, e.g. the host name of a host
    /// record or the instance name of a service.
    pub fn first_label(&self) -> &str {
        self.key.split('.').next().unwrap_or_default()
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.fields.get(label)
    }

    pub fn text(&self, label: &str) -> Option<&str> {
        self.get(label)?.as_text()
    }

    pub fn list(&self, label: &str) -> Option<&[String]> {
        self.get(label)?.as_list()
    }
}

pub fn decode<S: AsRef<str>>(lines: &[S]) -> Vec<BlockRecord> {
    let mut records: Vec<BlockRecord> = Vec::new();

    for line in content(lines) {
        let Some(caps) = FIELD.captures(line) else {
            records.push(BlockRecord::new(line));
            continue;
        };

        let Some(current) = records.last_mut() else {
            ParseSkipped::new(DECODER, line, "field before any key line").log();
            continue;
        };
        if current.deleted {
            trace!(key = %current.key, line, "field of deleted record dropped");
            continue;
        }

        let label = &caps[1];
        let value = caps[2].trim();
        if label == "deleted" {
            current.deleted = value == "true";
            continue;
        }
        current.fields.insert(label.to_string(), Value::parse(value));
    }

    records
}
