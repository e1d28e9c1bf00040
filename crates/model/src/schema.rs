//! Per-type model metadata supplied by the server
//!
//! A [`Schema`] is read once at boot and never mutated afterwards. It can be
//! deserialized from the server's JSON export (snake_case or camelCase keys)
//! or assembled in code:
//!
//! ```
//! use quarry_model::{CastKind, RelationDefinition, Schema};
//!
//! let post = Schema::new("post")
//!     .fillable(["title", "body", "published_at"])
//!     .cast("published_at", CastKind::DateTime)
//!     .relation("author", RelationDefinition::belongs_to("user"))
//!     .relation("comments", RelationDefinition::has_many("comment"));
//!
//! assert_eq!(post.route_base(), "api.posts");
//! assert!(post.is_fillable("title"));
//! ```

use crate::cast::CastKind;
use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Set by the server on create
pub const CREATED_AT: &str = "created_at";
/// Set by the server on every write
pub const UPDATED_AT: &str = "updated_at";
/// Trash mark for soft-deleting types
pub const DELETED_AT: &str = "deleted_at";

/// Relation variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationKind {
    /// Owner through a local foreign key
    #[serde(alias = "belongsTo")]
    BelongsTo,
    /// One child
    #[serde(alias = "hasOne")]
    HasOne,
    /// Many children
    #[serde(alias = "hasMany")]
    HasMany,
    /// Many through a pivot
    #[serde(alias = "belongsToMany")]
    BelongsToMany,
    /// One polymorphic child
    #[serde(alias = "morphOne")]
    MorphOne,
    /// Many polymorphic children
    #[serde(alias = "morphMany")]
    MorphMany,
    /// Polymorphic owner
    #[serde(alias = "morphTo")]
    MorphTo,
    /// Many polymorphic through a pivot
    #[serde(alias = "morphToMany")]
    MorphToMany,
}

impl RelationKind {
    /// Name as exported, e.g. `BelongsTo`
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "BelongsTo",
            RelationKind::HasOne => "HasOne",
            RelationKind::HasMany => "HasMany",
            RelationKind::BelongsToMany => "BelongsToMany",
            RelationKind::MorphOne => "MorphOne",
            RelationKind::MorphMany => "MorphMany",
            RelationKind::MorphTo => "MorphTo",
            RelationKind::MorphToMany => "MorphToMany",
        }
    }

    /// Resolves to at most one model
    pub fn is_single(&self) -> bool {
        matches!(
            self,
            RelationKind::BelongsTo | RelationKind::HasOne | RelationKind::MorphOne | RelationKind::MorphTo
        )
    }

    /// Resolves to a collection
    pub fn is_multiple(&self) -> bool {
        !self.is_single()
    }

    /// Related type is read per instance from `{relation}_type`
    pub fn is_polymorphic_target(&self) -> bool {
        matches!(self, RelationKind::MorphTo)
    }

    /// Supports attach/detach/sync through a pivot
    pub fn has_pivot(&self) -> bool {
        matches!(self, RelationKind::BelongsToMany | RelationKind::MorphToMany)
    }

    /// Kinds that may point back from the related side
    pub fn inverse_kinds(&self) -> &'static [RelationKind] {
        match self {
            RelationKind::HasOne | RelationKind::HasMany => &[RelationKind::BelongsTo],
            RelationKind::MorphOne | RelationKind::MorphMany => &[RelationKind::MorphTo],
            RelationKind::BelongsTo => &[RelationKind::HasOne, RelationKind::HasMany],
            RelationKind::MorphTo => &[RelationKind::MorphOne, RelationKind::MorphMany],
            RelationKind::BelongsToMany => &[RelationKind::BelongsToMany],
            RelationKind::MorphToMany => &[RelationKind::MorphToMany, RelationKind::BelongsToMany],
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Related model type; absent only for `MorphTo`
    #[serde(default)]
    pub model: Option<String>,
    /// Kind of relation
    pub kind: RelationKind,
    /// Column holding the key, guessed when absent
    #[serde(default, alias = "foreignKey")]
    pub foreign_key: Option<String>,
    /// Name of the relation on the related type pointing back here
    #[serde(default)]
    pub inverse: Option<String>,
    /// Prefix of the `{name}_id` / `{name}_type` pair for morph relations
    #[serde(default, alias = "morphName")]
    pub morph_name: Option<String>,
}

impl RelationDefinition {
    /// Declaration of `kind` against `model`
    pub fn new(kind: RelationKind, model: Option<&str>) -> Self {
        Self {
            model: model.map(str::to_string),
            kind,
            foreign_key: None,
            inverse: None,
            morph_name: None,
        }
    }

    /// `BelongsTo` declaration
    pub fn belongs_to(model: &str) -> Self {
        Self::new(RelationKind::BelongsTo, Some(model))
    }

    /// `HasOne` declaration
    pub fn has_one(model: &str) -> Self {
        Self::new(RelationKind::HasOne, Some(model))
    }

    /// `HasMany` declaration
    pub fn has_many(model: &str) -> Self {
        Self::new(RelationKind::HasMany, Some(model))
    }

    /// `BelongsToMany` declaration
    pub fn belongs_to_many(model: &str) -> Self {
        Self::new(RelationKind::BelongsToMany, Some(model))
    }

    /// `MorphOne` declaration
    pub fn morph_one(model: &str) -> Self {
        Self::new(RelationKind::MorphOne, Some(model))
    }

    /// `MorphMany` declaration
    pub fn morph_many(model: &str) -> Self {
        Self::new(RelationKind::MorphMany, Some(model))
    }

    /// `MorphTo` declaration
    pub fn morph_to() -> Self {
        Self::new(RelationKind::MorphTo, None)
    }

    /// `MorphToMany` declaration
    pub fn morph_to_many(model: &str) -> Self {
        Self::new(RelationKind::MorphToMany, Some(model))
    }

    /// Explicit foreign key column
    pub fn foreign_key(mut self, key: &str) -> Self {
        self.foreign_key = Some(key.to_string());
        self
    }

    /// Explicit inverse relation
    pub fn inverse(mut self, name: &str) -> Self {
        self.inverse = Some(name.to_string());
        self
    }

    /// Explicit morph prefix
    pub fn morph_name(mut self, name: &str) -> Self {
        self.morph_name = Some(name.to_string());
        self
    }
}

fn default_primary_key() -> Option<String> {
    Some("id".to_string())
}

fn default_true() -> bool {
    true
}

/// Static metadata for one model type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Model type key, e.g. `"post"`
    #[serde(default)]
    pub name: String,
    /// Attributes writable through fill
    #[serde(default)]
    pub fillable: Vec<String>,
    /// Attribute casts
    #[serde(default)]
    pub casts: BTreeMap<String, CastKind>,
    /// Declared relations
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDefinition>,
    /// `null` in the export means the type has no primary key
    #[serde(default = "default_primary_key", alias = "primaryKey")]
    pub primary_key: Option<String>,
    /// Whether the server maintains timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Whether deletes are soft
    #[serde(default, alias = "softDeletes")]
    pub soft_deletes: bool,
    /// Human readable name
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
    /// Route name prefix, defaults to the plural type key
    #[serde(default, alias = "routeBase")]
    pub route_base: Option<String>,
    /// Route parameter name, defaults to the type key
    #[serde(default, alias = "routeKey")]
    pub route_key: Option<String>,
    /// Value written to morph type columns
    #[serde(default, alias = "morphClass")]
    pub morph_class: Option<String>,
}

impl Schema {
    /// Schema with defaults: primary key `id`, timestamps on, no soft deletes
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fillable: Vec::new(),
            casts: BTreeMap::new(),
            relations: BTreeMap::new(),
            primary_key: default_primary_key(),
            timestamps: true,
            soft_deletes: false,
            display_name: None,
            route_base: None,
            route_key: None,
            morph_class: None,
        }
    }

    /// Add fillable attributes
    pub fn fillable<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declare a cast
    pub fn cast(mut self, key: &str, kind: CastKind) -> Self {
        self.casts.insert(key.to_string(), kind);
        self
    }

    /// Declare a relation
    pub fn relation(mut self, name: &str, definition: RelationDefinition) -> Self {
        self.relations.insert(name.to_string(), definition);
        self
    }

    /// Set or clear the primary key
    pub fn primary_key(mut self, key: Option<&str>) -> Self {
        self.primary_key = key.map(str::to_string);
        self
    }

    /// Toggle timestamps
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Toggle soft deletes
    pub fn soft_deletes(mut self, enabled: bool) -> Self {
        self.soft_deletes = enabled;
        self
    }

    /// Override the route prefix
    pub fn with_route_base(mut self, base: &str) -> Self {
        self.route_base = Some(base.to_string());
        self
    }

    /// Override the morph class
    pub fn with_morph_class(mut self, class: &str) -> Self {
        self.morph_class = Some(class.to_string());
        self
    }

    /// Whether `key` may be filled
    pub fn is_fillable(&self, key: &str) -> bool {
        self.fillable.iter().any(|k| k == key)
    }

    /// Cast declared for `key`
    pub fn cast_for(&self, key: &str) -> Option<CastKind> {
        self.casts.get(key).copied()
    }

    /// Declaration of relation `name`
    pub fn relation_definition(&self, name: &str) -> Result<&RelationDefinition, SchemaError> {
        self.relations
            .get(name)
            .ok_or_else(|| SchemaError::UnknownRelation {
                model: self.name.clone(),
                relation: name.to_string(),
            })
    }

    /// Whether relation `name` is declared
    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Primary key, or an error for keyless types
    pub fn require_primary_key(&self) -> Result<&str, SchemaError> {
        self.primary_key
            .as_deref()
            .ok_or_else(|| SchemaError::MissingPrimaryKey(self.name.clone()))
    }

    /// Route name prefix, `api.{name}s` unless declared
    pub fn route_base(&self) -> String {
        self.route_base
            .clone()
            .unwrap_or_else(|| format!("api.{}s", self.name))
    }

    /// Route parameter carrying this model's key
    pub fn route_key(&self) -> &str {
        self.route_key.as_deref().unwrap_or(&self.name)
    }

    /// Type string written to `{relation}_type` columns
    pub fn morph_class(&self) -> &str {
        self.morph_class.as_deref().unwrap_or(&self.name)
    }

    /// Declared display name, or the type key
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Timestamp columns this type carries
    pub fn timestamp_columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::new();
        if self.timestamps {
            columns.push(CREATED_AT);
            columns.push(UPDATED_AT);
        }
        if self.soft_deletes {
            columns.push(DELETED_AT);
        }
        columns
    }

    /// Whether `key` is one of the maintained timestamp columns
    pub fn is_timestamp_column(&self, key: &str) -> bool {
        self.timestamp_columns().contains(&key)
    }

    /// Attributes that get per-attribute reducer chains at boot:
    /// fillable keys, cast keys and the primary key
    pub fn declared_attributes(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.fillable.clone();
        for key in self.casts.keys().chain(self.primary_key.iter()) {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys.retain(|k| !self.relations.contains_key(k) && !self.is_timestamp_column(k));
        keys
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::Invalid("schema has no name".to_string()));
        }
        for (name, relation) in &self.relations {
            if relation.model.is_none() && relation.kind != RelationKind::MorphTo {
                return Err(SchemaError::MissingRelatedModel {
                    model: self.name.clone(),
                    relation: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parse a server export: either an array of schemas or an object keyed
    /// by model type (the key fills in a missing `name`)
    pub fn parse_export(export: &serde_json::Value) -> Result<Vec<Schema>, SchemaError> {
        let invalid = |e: serde_json::Error| SchemaError::Invalid(e.to_string());
        match export {
            serde_json::Value::Array(_) => {
                serde_json::from_value::<Vec<Schema>>(export.clone()).map_err(invalid)
            }
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(name, value)| {
                    let mut schema: Schema = serde_json::from_value(value.clone()).map_err(invalid)?;
                    if schema.name.is_empty() {
                        schema.name = name.clone();
                    }
                    Ok(schema)
                })
                .collect(),
            other => Err(SchemaError::Invalid(format!(
                "expected an array or object of schemas, found {}",
                other
            ))),
        }
    }
}
