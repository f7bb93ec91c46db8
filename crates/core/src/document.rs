//! Document representation
//!
//! A [`Document`] is an opaque JSON object with three mandatory fields
//! (`_id`, `_class`, `space`) plus business attributes. Mixin facets are
//! nested objects keyed by the mixin's class identifier:
//!
//! ```json
//! { "_id": "i1", "_class": "tracker:class:Issue", "title": "Crash",
//!   "tracker:mixin:Estimated": { "estimate": 5 },
//!   "%hash%": "b64digest|1a2" }
//! ```
//!
//! Which top-level keys are facets is decided by the hierarchy, not by the
//! document itself.

use crate::clock::Timestamp;
use crate::path::get_path;
use crate::types::{fields, ClassId, Ref};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Schema-flexible stored document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create a document carrying only its identity fields
    pub fn new(id: &Ref, class: &ClassId, space: &Ref) -> Self {
        let mut map = Map::new();
        map.insert(fields::ID.to_string(), Value::from(id.as_str()));
        map.insert(fields::CLASS.to_string(), Value::from(class.as_str()));
        map.insert(fields::SPACE.to_string(), Value::from(space.as_str()));
        Document(map)
    }

    /// Wrap a raw JSON object
    pub fn from_map(map: Map<String, Value>) -> Self {
        Document(map)
    }

    /// Build from a JSON value; non-objects yield `None`
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Document(map)),
            _ => None,
        }
    }

    /// Unwrap into the raw JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Borrow the raw JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Document identifier
    pub fn id(&self) -> Option<&str> {
        self.0.get(fields::ID).and_then(Value::as_str)
    }

    /// Concrete class
    pub fn class(&self) -> Option<&str> {
        self.0.get(fields::CLASS).and_then(Value::as_str)
    }

    /// Owning space
    pub fn space(&self) -> Option<&str> {
        self.0.get(fields::SPACE).and_then(Value::as_str)
    }

    /// Last modification time
    pub fn modified_on(&self) -> Option<Timestamp> {
        self.0
            .get(fields::MODIFIED_ON)
            .and_then(Value::as_i64)
            .map(Timestamp::from_millis)
    }

    /// Mixin facet payload, if the document carries the mixin
    pub fn mixin(&self, mixin: &ClassId) -> Option<&Map<String, Value>> {
        self.0.get(mixin.as_str()).and_then(Value::as_object)
    }

    /// Attached lookup result under `$lookup.<key>`
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.0
            .get(fields::LOOKUP)
            .and_then(Value::as_object)
            .and_then(|l| l.get(key))
    }

    /// Value at a dotted path
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        get_path(&self.0, path)
    }

    /// Cached hash metadata; `None` when not yet computed
    pub fn hash_meta(&self) -> Option<HashMeta> {
        self.0
            .get(fields::HASH)
            .and_then(Value::as_str)
            .and_then(HashMeta::parse)
    }
}

impl Deref for Document {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.0)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

/// Cached content hash and approximate serialized size
///
/// Stored in the `%hash%` field as `"<hash>|<size in hex>"`. A null or empty
/// field means "not computed", which is distinct from any computed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashMeta {
    /// Content digest
    pub hash: String,
    /// Approximate serialized size in bytes
    pub size: u64,
}

impl HashMeta {
    /// Parse the stored representation. Empty or malformed input is "not computed".
    pub fn parse(raw: &str) -> Option<Self> {
        let (hash, size) = raw.rsplit_once('|')?;
        if hash.is_empty() {
            return None;
        }
        let size = u64::from_str_radix(size, 16).ok()?;
        Some(HashMeta {
            hash: hash.to_string(),
            size,
        })
    }

    /// Stored representation
    pub fn encode(&self) -> String {
        format!("{}|{:x}", self.hash, self.size)
    }
}

impl fmt::Display for HashMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
