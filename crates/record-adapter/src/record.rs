//! Plain stored records and their keys.
//!
//! A [`Record`] is the codec's output: a JSON object that carries an `id`
//! once persisted. Resolved relationships live beside the stored fields under
//! the reserved [`EMBEDDED_KEY`] and never reach the engine.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AdapterError;

/// Field that holds a record's key.
pub const ID_FIELD: &str = "id";

/// Reserved field holding resolved relationships.
pub const EMBEDDED_KEY: &str = "_embedded";

/// Key of a record within its collection.
///
/// Integers sort before strings, mirroring the key ordering of
/// browser object stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Read a key out of a JSON value. Only integers and strings qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RecordKey::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(RecordKey::Int),
            _ => None,
        }
    }

    /// The key as it is stored in the record's `id` field.
    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(i) => Value::from(*i),
            RecordKey::Text(s) => Value::String(s.clone()),
        }
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RecordKey::Int(a), RecordKey::Int(b)) => a.cmp(b),
            (RecordKey::Text(a), RecordKey::Text(b)) => a.cmp(b),
            (RecordKey::Int(_), RecordKey::Text(_)) => Ordering::Less,
            (RecordKey::Text(_), RecordKey::Int(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{}", i),
            RecordKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        RecordKey::Text(s.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        RecordKey::Text(s)
    }
}

impl From<i64> for RecordKey {
    fn from(i: i64) -> Self {
        RecordKey::Int(i)
    }
}

impl From<&RecordKey> for RecordKey {
    fn from(key: &RecordKey) -> Self {
        key.clone()
    }
}

/// A plain storable record: field name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing JSON object
    pub fn from_map(map: Map<String, Value>) -> Self {
        Record(map)
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// The record's key, if its `id` field holds an integer or string.
    pub fn key(&self) -> Option<RecordKey> {
        self.0.get(ID_FIELD).and_then(RecordKey::from_value)
    }

    /// Whether a caller already set a non-null `id`.
    pub fn has_id(&self) -> bool {
        self.0.get(ID_FIELD).is_some_and(|v| !v.is_null())
    }

    pub fn set_key(&mut self, key: &RecordKey) {
        self.0.insert(ID_FIELD.to_string(), key.to_value());
    }

    /// Resolved relationships, if any were embedded.
    pub fn embedded(&self) -> Option<&Map<String, Value>> {
        self.0.get(EMBEDDED_KEY).and_then(Value::as_object)
    }

    /// Attach a resolved relationship under `_embedded[name]`.
    pub fn embed(&mut self, name: impl Into<String>, related: Value) {
        let slot = self
            .0
            .entry(EMBEDDED_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(map) = slot {
            map.insert(name.into(), related);
        }
    }

    /// Drop any embedded relationships, leaving only stored fields.
    pub fn without_embedded(mut self) -> Self {
        self.0.remove(EMBEDDED_KEY);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Record(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = AdapterError;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Record(map)),
            other => Err(AdapterError::Codec(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_keys_sort_before_text_keys() {
        let mut keys = vec![
            RecordKey::from("b"),
            RecordKey::from(10),
            RecordKey::from("a"),
            RecordKey::from(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                RecordKey::Int(2),
                RecordKey::Int(10),
                RecordKey::Text("a".into()),
                RecordKey::Text("b".into()),
            ]
        );
    }

    #[test]
    fn key_requires_integer_or_string_id() {
        assert_eq!(Record::new().with("id", "u1").key(), Some(RecordKey::from("u1")));
        assert_eq!(Record::new().with("id", 7).key(), Some(RecordKey::Int(7)));
        assert_eq!(Record::new().with("id", 1.5).key(), None);
        assert_eq!(Record::new().with("id", Value::Null).key(), None);
        assert!(!Record::new().with("id", Value::Null).has_id());
    }

    #[test]
    fn embed_creates_side_map_once() {
        let mut record = Record::new().with("id", "u1");
        record.embed("author", json!({"id": "a1"}));
        record.embed("posts", json!([{"id": "p1"}]));

        let embedded = record.embedded().unwrap();
        assert_eq!(embedded.len(), 2);
        assert_eq!(embedded["author"], json!({"id": "a1"}));

        let stripped = record.without_embedded();
        assert!(stripped.embedded().is_none());
        assert_eq!(stripped.len(), 1);
    }

    #[test]
    fn try_from_rejects_non_objects() {
        assert!(Record::try_from(json!([1, 2])).is_err());
        let record = Record::try_from(json!({"id": 1})).unwrap();
        assert_eq!(record.key(), Some(RecordKey::Int(1)));
    }
}
