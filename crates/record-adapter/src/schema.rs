//! Model relationship descriptions.
//!
//! The adapter asks a [`SchemaProvider`] which relationships a type declares;
//! it never inspects model definitions itself. [`StaticSchema`] is a provider
//! built in code or loaded from JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AdapterResult;

/// Kind of a relationship between two model types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipKind {
    /// The field holds the id of one parent record
    BelongsTo,
    /// The field holds the id of one owned record
    HasOne,
    /// The field holds a list of ids
    HasMany,
}

/// One declared relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDescriptor {
    /// Field on the record holding the reference(s)
    pub name: String,
    pub kind: RelationshipKind,
    /// Type (and collection) of the related records
    pub target_type: String,
}

impl RelationshipDescriptor {
    pub fn new(name: impl Into<String>, kind: RelationshipKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target_type: target.into(),
        }
    }
}

/// A type's relationships, partitioned by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationships {
    pub belongs_to: Vec<RelationshipDescriptor>,
    pub has_one: Vec<RelationshipDescriptor>,
    pub has_many: Vec<RelationshipDescriptor>,
}

impl Relationships {
    /// Descriptors in resolution order: belongsTo, then hasOne, then hasMany.
    pub fn ordered(&self) -> impl Iterator<Item = &RelationshipDescriptor> {
        self.belongs_to
            .iter()
            .chain(self.has_one.iter())
            .chain(self.has_many.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.belongs_to.is_empty() && self.has_one.is_empty() && self.has_many.is_empty()
    }
}

impl FromIterator<RelationshipDescriptor> for Relationships {
    fn from_iter<I: IntoIterator<Item = RelationshipDescriptor>>(iter: I) -> Self {
        let mut relationships = Relationships::default();
        for descriptor in iter {
            match descriptor.kind {
                RelationshipKind::BelongsTo => relationships.belongs_to.push(descriptor),
                RelationshipKind::HasOne => relationships.has_one.push(descriptor),
                RelationshipKind::HasMany => relationships.has_many.push(descriptor),
            }
        }
        relationships
    }
}

/// Source of relationship metadata for model types.
pub trait SchemaProvider: Send + Sync {
    /// Relationships declared by `type_name` (empty for unknown types).
    fn relationships(&self, type_name: &str) -> Relationships;

    /// Kind of the named relationship on `type_name`.
    fn kind_of(&self, type_name: &str, relation: &str) -> Option<RelationshipKind> {
        self.relationships(type_name)
            .ordered()
            .find(|d| d.name == relation)
            .map(|d| d.kind)
    }
}

/// Schema declared up front: type name → relationship list.
///
/// JSON form:
///
/// ```json
/// { "types": { "User": [{ "name": "posts", "kind": "hasMany", "targetType": "Post" }],
///              "Post": [] } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSchema {
    #[serde(default)]
    types: BTreeMap<String, Vec<RelationshipDescriptor>>,
}

impl StaticSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON form.
    pub fn from_json(json: &str) -> AdapterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Declare a type with no relationships (yet).
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.types.entry(type_name.into()).or_default();
        self
    }

    pub fn belongs_to(
        self,
        type_name: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.relate(type_name, RelationshipDescriptor::new(name, RelationshipKind::BelongsTo, target))
    }

    pub fn has_one(
        self,
        type_name: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.relate(type_name, RelationshipDescriptor::new(name, RelationshipKind::HasOne, target))
    }

    pub fn has_many(
        self,
        type_name: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.relate(type_name, RelationshipDescriptor::new(name, RelationshipKind::HasMany, target))
    }

    /// Add a relationship; target types are declared implicitly.
    pub fn relate(mut self, type_name: impl Into<String>, descriptor: RelationshipDescriptor) -> Self {
        self.types.entry(descriptor.target_type.clone()).or_default();
        self.types.entry(type_name.into()).or_default().push(descriptor);
        self
    }

    /// Every declared type, sorted by name.
    pub fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }
}

impl SchemaProvider for StaticSchema {
    fn relationships(&self, type_name: &str) -> Relationships {
        self.types
            .get(type_name)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }
}
