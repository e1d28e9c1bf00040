//! Relations between model types
//!
//! A [`Relation`] is a short-lived handle obtained from
//! [`Model::relation`]. Loaded items live in the parent model, so handles can
//! be created and dropped freely and never keep the parent alive.
//!
//! | Kind | Cardinality | Constraint written (locked) |
//! |------|-------------|-----------------------------|
//! | BelongsTo | single | related key = parent foreign key |
//! | HasOne / HasMany | single / multi | inverse foreign key = parent key |
//! | BelongsToMany / MorphToMany | multi | inverse relation = parent key |
//! | MorphOne / MorphMany | single / multi | `{morph}_id` and `{morph}_type` |
//! | MorphTo | single | related key = `{name}_id`, type from `{name}_type` |
//!
//! Relations that need the other side's declaration find it with
//! [`RelationBase::guess_inverse_relation`], which fails loudly rather than
//! inventing a column name.

/// Typed relation struct wrapping a [`RelationBase`]
macro_rules! relation_struct {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            base: $crate::relation::RelationBase,
        }

        impl $name {
            pub(crate) fn new(base: $crate::relation::RelationBase) -> Self {
                Self { base }
            }
        }

        impl std::ops::Deref for $name {
            type Target = $crate::relation::RelationBase;

            fn deref(&self) -> &Self::Target {
                &self.base
            }
        }
    };
}

mod belongs_to;
mod has_one_or_many;
mod morph;
mod pivot;

pub use belongs_to::BelongsTo;
pub use has_one_or_many::{HasMany, HasOne};
pub use morph::{MorphMany, MorphOne, MorphTo};
pub use pivot::{BelongsToMany, MorphToMany};

use crate::builder::Builder;
use crate::error::{RelationError, Result, SchemaError};
use crate::hooks::{InverseContext, RelationContext, GUESS_INVERSE, RESOLVE_RELATION};
use crate::model::{same_json, Items, Model};
use crate::schema::{RelationDefinition, RelationKind};
use crate::service::{ModelService, ModelType};
use quarry_core::JsonValue;
use serde_json::Map;
use std::sync::Arc;
use tracing::debug;

/// Relation kind after the [`RESOLVE_RELATION`] hook
pub(crate) fn resolve_kind(
    service: &ModelService,
    model: &str,
    relation: &str,
    definition: &RelationDefinition,
) -> Result<RelationKind> {
    let context = RelationContext {
        model: model.to_string(),
        relation: relation.to_string(),
        definition: definition.clone(),
    };
    Ok(service.registry().reduce(RESOLVE_RELATION, definition.kind, &context)?)
}

/// Related model given either as an instance or as a bare key
#[derive(Debug, Clone)]
pub enum RelatedRef {
    /// Model already in hand
    Model(Model),
    /// Bare primary key
    Key(JsonValue),
}

impl From<Model> for RelatedRef {
    fn from(model: Model) -> Self {
        RelatedRef::Model(model)
    }
}

impl From<&Model> for RelatedRef {
    fn from(model: &Model) -> Self {
        RelatedRef::Model(model.clone())
    }
}

impl From<JsonValue> for RelatedRef {
    fn from(key: JsonValue) -> Self {
        RelatedRef::Key(key)
    }
}

impl From<i64> for RelatedRef {
    fn from(key: i64) -> Self {
        RelatedRef::Key(JsonValue::from(key))
    }
}

impl From<&str> for RelatedRef {
    fn from(key: &str) -> Self {
        RelatedRef::Key(JsonValue::from(key))
    }
}

impl From<String> for RelatedRef {
    fn from(key: String) -> Self {
        RelatedRef::Key(JsonValue::from(key))
    }
}

// ============================================================================
// RelationBase
// ============================================================================

/// State and behavior shared by every relation kind
#[derive(Debug, Clone)]
pub struct RelationBase {
    parent: Model,
    name: String,
    kind: RelationKind,
    definition: RelationDefinition,
}

impl RelationBase {
    /// Relation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Model the relation hangs off
    pub fn parent(&self) -> &Model {
        &self.parent
    }

    /// Declaration from the schema
    pub fn definition(&self) -> &RelationDefinition {
        &self.definition
    }

    /// Whether the relation holds one model
    pub fn is_single(&self) -> bool {
        self.kind.is_single()
    }

    /// Whether the relation holds many models
    pub fn is_multiple(&self) -> bool {
        self.kind.is_multiple()
    }

    /// Whether items are loaded
    pub fn is_loaded(&self) -> bool {
        self.parent.relation_loaded(&self.name)
    }

    /// Loaded items, if any
    pub fn get_loaded_items(&self) -> Option<Items> {
        self.parent.loaded_relation(&self.name)
    }

    /// Related model type name
    pub fn related_model(&self) -> Result<String> {
        Ok(self.related_type()?.name().to_string())
    }

    /// Related type; for `MorphTo` read from the parent's `{name}_type`
    pub(crate) fn related_type(&self) -> Result<Arc<ModelType>> {
        let service = self.parent.service();
        if self.kind.is_polymorphic_target() {
            let morph = self
                .parent
                .morph_type_of(&self.name)
                .ok_or_else(|| RelationError::MissingMorphType {
                    model: self.parent.model_type().to_string(),
                    relation: self.name.clone(),
                })?;
            return service.resolve_morph(&morph);
        }
        let model = self
            .definition
            .model
            .as_deref()
            .ok_or_else(|| SchemaError::MissingRelatedModel {
                model: self.parent.model_type().to_string(),
                relation: self.name.clone(),
            })?;
        service.model_type(model)
    }

    /// Name of the relation on the related type that points back here.
    ///
    /// A declared `inverse` wins. Otherwise the related schema is searched
    /// for a relation of a structurally inverse kind targeting the parent
    /// type (a `MorphTo` targets any type), and the result goes through the
    /// [`GUESS_INVERSE`] hook.
    pub fn guess_inverse_relation(&self) -> Result<String> {
        if let Some(inverse) = &self.definition.inverse {
            return Ok(inverse.clone());
        }
        let related = self.related_type()?;
        let parent_type = self.parent.model_type();
        let inverse_kinds = self.kind.inverse_kinds();
        let candidates: Vec<&String> = related
            .schema
            .relations
            .iter()
            .filter(|(_, d)| {
                inverse_kinds.contains(&d.kind)
                    && (d.kind.is_polymorphic_target() || d.model.as_deref() == Some(parent_type))
            })
            .map(|(name, _)| name)
            .collect();
        let preferred = self
            .definition
            .morph_name
            .as_ref()
            .and_then(|morph| candidates.iter().find(|c| **c == morph.as_str()));
        let guess = preferred.or(candidates.first()).map(|name| name.to_string());

        let context = InverseContext {
            model: parent_type.to_string(),
            relation: self.name.clone(),
            kind: self.kind,
            related: related.name().to_string(),
        };
        let guess: Option<String> = self.parent.service().registry().reduce(GUESS_INVERSE, guess, &context)?;
        guess.ok_or_else(|| {
            RelationError::InverseNotFound {
                model: context.model,
                relation: context.relation,
                related: context.related,
            }
            .into()
        })
    }

    // ========================================================================
    // Shared helpers for the variants
    // ========================================================================

    pub(crate) fn new_query(&self) -> Result<Builder> {
        Builder::new(self.parent.service().clone(), self.related_type()?)
    }

    /// Parent key; the parent must be persisted
    pub(crate) fn parent_key(&self) -> Result<JsonValue> {
        self.parent.schema().require_primary_key()?;
        match self.parent.get_key() {
            Some(key) if !key.is_null() => Ok(key),
            _ => Err(RelationError::UnpersistedParent {
                model: self.parent.model_type().to_string(),
                relation: self.name.clone(),
            }
            .into()),
        }
    }

    /// Reject items of another type than the relation targets
    pub(crate) fn check_related(&self, item: &Model) -> Result<()> {
        let expected = self.related_type()?;
        if item.model_type() != expected.name() {
            return Err(RelationError::WrongRelatedType {
                relation: self.name.clone(),
                expected: expected.name().to_string(),
                actual: item.model_type().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Key of a related item; the item must be persisted
    pub(crate) fn related_key(&self, item: &Model) -> Result<JsonValue> {
        item.schema().require_primary_key()?;
        match item.get_key() {
            Some(key) if !key.is_null() => Ok(key),
            _ => Err(RelationError::UnpersistedRelated {
                relation: self.name.clone(),
                related: item.model_type().to_string(),
            }
            .into()),
        }
    }

    pub(crate) fn store_items(&self, items: Items) {
        self.parent.set_relation(&self.name, items);
    }

    /// Write `columns` on the parent, point the relation at `items` and save
    /// the parent. A failed save puts the columns and loaded items back.
    pub(crate) async fn write_parent(&self, columns: Map<String, JsonValue>, items: Items) -> Result<()> {
        let previous: Vec<(String, Option<JsonValue>)> =
            columns.keys().map(|key| (key.clone(), self.parent.raw(key))).collect();
        let loaded = self.parent.loaded_relation(&self.name);

        self.parent.force_fill(&JsonValue::Object(columns))?;
        self.store_items(items);
        match self.parent.save().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.parent.restore_raw(previous)?;
                match loaded {
                    Some(items) => self.store_items(items),
                    None => self.parent.unset_relation(&self.name),
                }
                debug!(
                    target: "quarry::relation",
                    model = %self.parent.model_type(),
                    relation = %self.name,
                    "Rolled back relation write after failed save"
                );
                Err(e)
            }
        }
    }

    /// Run a relation query and keep the result on the parent
    pub(crate) async fn load(&self, query: Builder) -> Result<Items> {
        let items = if self.is_single() {
            Items::One(query.first().await?)
        } else {
            Items::Many(query.all().await?)
        };
        debug!(
            target: "quarry::relation",
            model = %self.parent.model_type(),
            relation = %self.name,
            count = items.len(),
            "Loaded relation"
        );
        self.store_items(items.clone());
        Ok(items)
    }

    /// Save a child after writing its constraint columns
    pub(crate) async fn save_child(&self, child: &Model, columns: serde_json::Map<String, JsonValue>) -> Result<()> {
        self.check_related(child)?;
        child.force_fill(&JsonValue::Object(columns))?;
        child.save().await
    }

    /// Reflect written children in loaded items.
    ///
    /// Re-fetches when a quiet write left the relation stale, otherwise
    /// upserts into loaded items. Unloaded relations stay unloaded.
    pub(crate) async fn after_write(&self, written: &[Model], query: impl FnOnce() -> Result<Builder>) -> Result<()> {
        if self.parent.relation_stale(&self.name) {
            self.load(query()?).await?;
            return Ok(());
        }
        self.parent.patch_relation(&self.name, |items| upsert(items, written));
        Ok(())
    }

    pub(crate) fn mark_stale(&self) {
        self.parent.mark_relation_stale(&self.name);
    }
}

fn upsert(items: &mut Items, written: &[Model]) {
    match items {
        Items::One(item) => {
            if let Some(last) = written.last() {
                *item = Some(last.clone());
            }
        }
        Items::Many(list) => {
            for model in written {
                match list.iter_mut().find(|existing| existing.is_same_record(model)) {
                    Some(existing) => *existing = model.clone(),
                    None => list.push(model.clone()),
                }
            }
        }
    }
}

/// Whether `model`'s key equals `key`
pub(crate) fn has_key(model: &Model, key: &JsonValue) -> bool {
    model.get_key().is_some_and(|k| !k.is_null() && same_json(&k, key))
}

// ============================================================================
// Relation
// ============================================================================

/// Any relation, dispatched by kind
#[derive(Debug, Clone)]
pub enum Relation {
    /// See [`BelongsTo`]
    BelongsTo(BelongsTo),
    /// See [`HasOne`]
    HasOne(HasOne),
    /// See [`HasMany`]
    HasMany(HasMany),
    /// See [`BelongsToMany`]
    BelongsToMany(BelongsToMany),
    /// See [`MorphOne`]
    MorphOne(MorphOne),
    /// See [`MorphMany`]
    MorphMany(MorphMany),
    /// See [`MorphTo`]
    MorphTo(MorphTo),
    /// See [`MorphToMany`]
    MorphToMany(MorphToMany),
}

macro_rules! dispatch {
    ($self:expr, $r:ident => $body:expr) => {
        match $self {
            Relation::BelongsTo($r) => $body,
            Relation::HasOne($r) => $body,
            Relation::HasMany($r) => $body,
            Relation::BelongsToMany($r) => $body,
            Relation::MorphOne($r) => $body,
            Relation::MorphMany($r) => $body,
            Relation::MorphTo($r) => $body,
            Relation::MorphToMany($r) => $body,
        }
    };
}

macro_rules! into_variant {
    ($($method:ident => $variant:ident),* $(,)?) => {
        $(
            #[doc = concat!("Narrow to [`", stringify!($variant), "`], failing with `WrongKind` otherwise")]
            pub fn $method(self) -> Result<$variant> {
                match self {
                    Relation::$variant(r) => Ok(r),
                    other => Err(RelationError::WrongKind {
                        relation: other.name().to_string(),
                        expected: RelationKind::$variant.as_str(),
                        actual: other.kind().as_str(),
                    }
                    .into()),
                }
            }
        )*
    };
}

impl Relation {
    /// Handle for relation `name` declared on `parent`'s schema
    pub(crate) fn for_model(parent: &Model, name: &str) -> Result<Relation> {
        let definition = parent.schema().relation_definition(name)?.clone();
        let kind = resolve_kind(parent.service(), parent.model_type(), name, &definition)?;
        let base = RelationBase {
            parent: parent.clone(),
            name: name.to_string(),
            kind,
            definition,
        };
        if !kind.is_polymorphic_target() {
            base.related_type()?;
        }
        Ok(match kind {
            RelationKind::BelongsTo => Relation::BelongsTo(BelongsTo::new(base)),
            RelationKind::HasOne => Relation::HasOne(HasOne::new(base)),
            RelationKind::HasMany => Relation::HasMany(HasMany::new(base)),
            RelationKind::BelongsToMany => Relation::BelongsToMany(BelongsToMany::new(base)),
            RelationKind::MorphOne => Relation::MorphOne(MorphOne::new(base)),
            RelationKind::MorphMany => Relation::MorphMany(MorphMany::new(base)),
            RelationKind::MorphTo => Relation::MorphTo(MorphTo::new(base)),
            RelationKind::MorphToMany => Relation::MorphToMany(MorphToMany::new(base)),
        })
    }

    /// Shared state behind every kind
    pub fn base(&self) -> &RelationBase {
        dispatch!(self, r => &**r)
    }

    /// Relation name
    pub fn name(&self) -> &str {
        self.base().name()
    }

    /// Declared kind
    pub fn kind(&self) -> RelationKind {
        self.base().kind()
    }

    /// Whether the relation holds one model
    pub fn is_single(&self) -> bool {
        self.base().is_single()
    }

    /// Whether the relation holds many models
    pub fn is_multiple(&self) -> bool {
        self.base().is_multiple()
    }

    /// Whether items are loaded
    pub fn is_loaded(&self) -> bool {
        self.base().is_loaded()
    }

    /// Loaded items, if any
    pub fn get_loaded_items(&self) -> Option<Items> {
        self.base().get_loaded_items()
    }

    /// Name of the relation on the related type pointing back here
    pub fn guess_inverse_relation(&self) -> Result<String> {
        self.base().guess_inverse_relation()
    }

    /// Constraining column of this relation
    pub fn get_foreign_key(&self) -> Result<String> {
        dispatch!(self, r => r.get_foreign_key())
    }

    /// Builder over the related type with this relation's constraints locked
    pub fn query(&self) -> Result<Builder> {
        dispatch!(self, r => r.query())
    }

    /// Load items from the server and keep them on the parent
    pub async fn get(&self) -> Result<Items> {
        Ok(match self {
            Relation::BelongsTo(r) => Items::One(r.get().await?),
            Relation::HasOne(r) => Items::One(r.get().await?),
            Relation::MorphOne(r) => Items::One(r.get().await?),
            Relation::MorphTo(r) => Items::One(r.get().await?),
            Relation::HasMany(r) => Items::Many(r.get().await?),
            Relation::BelongsToMany(r) => Items::Many(r.get().await?),
            Relation::MorphMany(r) => Items::Many(r.get().await?),
            Relation::MorphToMany(r) => Items::Many(r.get().await?),
        })
    }

    /// Loaded items, fetching them first if needed
    pub async fn get_results(&self) -> Result<Items> {
        match self.get_loaded_items() {
            Some(items) if !self.base().parent.relation_stale(self.name()) => Ok(items),
            _ => self.get().await,
        }
    }

    into_variant! {
        into_belongs_to => BelongsTo,
        into_has_one => HasOne,
        into_has_many => HasMany,
        into_belongs_to_many => BelongsToMany,
        into_morph_one => MorphOne,
        into_morph_many => MorphMany,
        into_morph_to => MorphTo,
        into_morph_to_many => MorphToMany,
    }
}
