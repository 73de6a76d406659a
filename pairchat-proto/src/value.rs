//! The JSON-like value tree held by the realtime store.
//!
//! The whole keyspace is one [`Value`]. Writing [`Value::Null`] at a path
//! deletes it, and maps that become empty collapse to `Null`, so "absent"
//! and "null" are the same thing everywhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::Path;

static NULL: Value = Value::Null;

/// A node of the store tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf (timestamps are milliseconds since the UNIX epoch).
    Int(i64),
    /// Text leaf.
    Text(String),
    /// Interior node; children are ordered by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean leaf, if this is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer leaf, if this is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text leaf, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the children of an interior node.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the direct child `key`, or `Null`.
    #[must_use]
    pub fn field(&self, key: &str) -> &Self {
        self.as_map().and_then(|m| m.get(key)).unwrap_or(&NULL)
    }

    /// Returns the node at `path`, or `Null` if nothing is stored there.
    #[must_use]
    pub fn get(&self, path: &Path) -> &Self {
        let mut node = self;
        for segment in path.segments() {
            match node {
                Self::Map(map) => match map.get(segment) {
                    Some(child) => node = child,
                    None => return &NULL,
                },
                _ => return &NULL,
            }
        }
        node
    }

    /// Replaces the node at `path`, creating interior maps as needed.
    ///
    /// Writing `Null` removes the node and prunes parents left empty.
    pub fn set(&mut self, path: &Path, value: Self) {
        set_in(self, path.segments(), value.normalized());
    }

    /// Merges `fields` into the node at `path`, child by child.
    ///
    /// Children not named in `fields` are left untouched; a `Null` field
    /// removes that child.
    pub fn merge(&mut self, path: &Path, fields: BTreeMap<String, Self>) {
        for (key, value) in fields {
            let mut segments = path.segments().to_vec();
            segments.push(key);
            set_in(self, &segments, value.normalized());
        }
    }

    /// Drops `Null` children and collapses empty maps to `Null`.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Map(map) => {
                let map: BTreeMap<String, Self> = map
                    .into_iter()
                    .map(|(k, v)| (k, v.normalized()))
                    .filter(|(_, v)| !v.is_null())
                    .collect();
                if map.is_empty() {
                    Self::Null
                } else {
                    Self::Map(map)
                }
            }
            leaf => leaf,
        }
    }
}

fn set_in(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !matches!(node, Value::Map(_)) {
        if value.is_null() {
            return;
        }
        *node = Value::Map(BTreeMap::new());
    }
    let now_empty = if let Value::Map(map) = node {
        let child = map.entry(head.clone()).or_default();
        set_in(child, rest, value);
        if child.is_null() {
            map.remove(head);
        }
        map.is_empty()
    } else {
        false
    };
    if now_empty {
        *node = Value::Null;
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
        .normalized()
    }
}
