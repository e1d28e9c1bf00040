//! Model: one runtime record of a booted type
//!
//! A [`Model`] is a cheap handle (`Arc`) around:
//! - an [`AttributeStore`] with the plain attributes
//! - the `original` snapshot taken at the last load/save boundary
//! - the ordered list of dirty keys
//! - parsed timestamps and loaded relation items
//! - a per-instance [`EventBus`]
//!
//! Clones share state. No lock is held across an `.await` or while listeners
//! and reducers run.

mod attributes;
mod persistence;

pub use attributes::same_json;
pub use persistence::SaveOptions;

use crate::cast::{self, CastKind};
use crate::config::Environment;
use crate::error::{Error, RelationError, Result, SchemaError};
use crate::events::{EventBus, EventKind, ListenerId, ModelEvent};
use crate::hooks;
use crate::relation::{self, Relation};
use crate::schema::{Schema, CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::service::{ModelService, ModelType};
use parking_lot::RwLock;
use quarry_core::{
    validate_limits, value_type_name, AttributeStore, ChangeEvent, JsonPath, JsonValue, Snapshot,
    StoreError, SubscriptionId, UnsafeValue, Value,
};
use serde_json::Map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loaded relation content
#[derive(Debug, Clone)]
pub enum Items {
    /// At most one model
    One(Option<Model>),
    /// Any number of models
    Many(Vec<Model>),
}

impl Items {
    /// Whether this is [`Items::One`]
    pub fn is_single(&self) -> bool {
        matches!(self, Items::One(_))
    }

    /// Number of models held
    pub fn len(&self) -> usize {
        match self {
            Items::One(item) => usize::from(item.is_some()),
            Items::Many(items) => items.len(),
        }
    }

    /// Whether no model is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single item, or the first of a collection
    pub fn first(&self) -> Option<&Model> {
        match self {
            Items::One(item) => item.as_ref(),
            Items::Many(items) => items.first(),
        }
    }

    /// Clone the models out
    pub fn to_vec(&self) -> Vec<Model> {
        match self {
            Items::One(item) => item.iter().cloned().collect(),
            Items::Many(items) => items.clone(),
        }
    }

    /// Single model, or the first of many
    pub fn into_one(self) -> Option<Model> {
        match self {
            Items::One(item) => item,
            Items::Many(items) => items.into_iter().next(),
        }
    }

    /// Every model held
    pub fn into_many(self) -> Vec<Model> {
        match self {
            Items::One(item) => item.into_iter().collect(),
            Items::Many(items) => items,
        }
    }

    /// Serialized models, `null` for an empty `One`
    pub fn to_json(&self) -> JsonValue {
        match self {
            Items::One(Some(model)) => model.to_json(),
            Items::One(None) => JsonValue::Null,
            Items::Many(items) => JsonValue::Array(items.iter().map(Model::to_json).collect()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RelationSlot {
    pub items: Option<Items>,
    /// A quiet write happened since the last load
    pub stale: bool,
}

#[derive(Debug)]
pub(crate) struct ModelState {
    pub original: Arc<Snapshot>,
    pub changed: Vec<String>,
    pub exists: bool,
    pub recently_created: bool,
    pub timestamps: BTreeMap<&'static str, Value>,
    pub relations: BTreeMap<String, RelationSlot>,
}

struct ModelInner {
    service: ModelService,
    ty: Arc<ModelType>,
    store: AttributeStore,
    state: RwLock<ModelState>,
    events: EventBus,
}

/// One record of a booted model type
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Model")
            .field("type", &self.model_type())
            .field("exists", &state.exists)
            .field("attributes", &self.inner.store.snapshot())
            .field("changed", &state.changed)
            .field("relations", &state.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Record split into its plain attributes, relation payloads and timestamps
struct Parts {
    plain: Map<String, JsonValue>,
    relations: Vec<(String, JsonValue)>,
    timestamps: Vec<(&'static str, JsonValue)>,
}

/// `fill_defaults` adds null for fillable keys missing from the record
fn split(schema: &Schema, record: Map<String, JsonValue>, fill_defaults: bool) -> Parts {
    let mut parts = Parts {
        plain: Map::new(),
        relations: Vec::new(),
        timestamps: Vec::new(),
    };
    for (key, value) in record {
        if schema.has_relation(&key) {
            parts.relations.push((key, value));
        } else if let Some(column) = [CREATED_AT, UPDATED_AT, DELETED_AT].into_iter().find(|c| *c == key) {
            parts.timestamps.push((column, value));
        } else {
            parts.plain.insert(key, value);
        }
    }
    for key in schema.fillable.iter().filter(|_| fill_defaults) {
        if !schema.has_relation(key) && !parts.plain.contains_key(key) {
            parts.plain.insert(key.clone(), JsonValue::Null);
        }
    }
    parts
}

impl Model {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Build a model from a JSON record.
    ///
    /// `exists` overrides the default, which is "has a non-null key".
    pub(crate) fn build(
        service: &ModelService,
        ty: Arc<ModelType>,
        attributes: JsonValue,
        exists: Option<bool>,
    ) -> Result<Model> {
        let record = match attributes {
            JsonValue::Object(map) => map,
            other => return Err(StoreError::RootNotObject(value_type_name(&other)).into()),
        };
        let parts = split(&ty.schema, record, true);
        check_limits(service.config().environment, &ty.schema, &parts.plain)?;

        let exists = exists.unwrap_or_else(|| {
            ty.schema
                .primary_key
                .as_ref()
                .and_then(|pk| parts.plain.get(pk))
                .is_some_and(|key| !key.is_null())
        });
        let store = AttributeStore::from_snapshot(Snapshot::from_object(parts.plain));
        let model = Model {
            inner: Arc::new(ModelInner {
                service: service.clone(),
                ty,
                state: RwLock::new(ModelState {
                    original: store.snapshot(),
                    changed: Vec::new(),
                    exists,
                    recently_created: false,
                    timestamps: BTreeMap::new(),
                    relations: BTreeMap::new(),
                }),
                store,
                events: EventBus::new(),
            }),
        };
        for (column, value) in model.timestamp_values(parts.timestamps)? {
            model.set_timestamp(column, value);
        }
        for (name, items) in model.relation_items(parts.relations)? {
            model.set_relation(&name, items);
        }
        Ok(model)
    }

    fn timestamp_values(&self, columns: Vec<(&'static str, JsonValue)>) -> Result<Vec<(&'static str, Value)>> {
        columns
            .into_iter()
            .map(|(column, raw)| Ok((column, self.timestamp_value(column, &raw)?)))
            .collect()
    }

    fn timestamp_value(&self, column: &str, raw: &JsonValue) -> Result<Value> {
        let value = cast::cast(CastKind::DateTime, raw);
        let hook = hooks::timestamp_getter(self.model_type(), column);
        let registry = self.inner.service.registry();
        if registry.has(&hook) {
            Ok(registry.reduce(&hook, value, self.schema())?)
        } else {
            Ok(value)
        }
    }

    /// Instantiate nested relation payloads into related models
    fn relation_items(&self, relations: Vec<(String, JsonValue)>) -> Result<Vec<(String, Items)>> {
        let mut hydrated = Vec::with_capacity(relations.len());
        for (name, payload) in relations {
            let definition = self.schema().relation_definition(&name)?.clone();
            let kind = relation::resolve_kind(&self.inner.service, self.model_type(), &name, &definition)?;

            let related = if kind.is_polymorphic_target() {
                match self.morph_type_of(&name) {
                    Some(morph) => self.inner.service.resolve_morph(&morph)?,
                    None => {
                        debug!(
                            target: "quarry::model",
                            model = %self.model_type(),
                            relation = %name,
                            "Skipping morph relation without a type"
                        );
                        continue;
                    }
                }
            } else {
                let target = definition.model.as_deref().ok_or_else(|| SchemaError::MissingRelatedModel {
                    model: self.model_type().to_string(),
                    relation: name.clone(),
                })?;
                self.inner.service.model_type(target)?
            };

            let cardinality = |found: &'static str| RelationError::Cardinality {
                model: self.model_type().to_string(),
                relation: name.clone(),
                expected: if kind.is_single() { "single" } else { "multi" },
                found,
            };
            let service = &self.inner.service;
            let items = match (kind.is_single(), payload) {
                (true, JsonValue::Null) => Items::One(None),
                (true, record @ JsonValue::Object(_)) => {
                    Items::One(Some(Model::build(service, Arc::clone(&related), record, None)?))
                }
                (false, JsonValue::Null) => Items::Many(Vec::new()),
                (false, JsonValue::Array(records)) => Items::Many(
                    records
                        .into_iter()
                        .map(|record| Model::build(service, Arc::clone(&related), record, None))
                        .collect::<Result<Vec<_>>>()?,
                ),
                (_, other) => return Err(cardinality(value_type_name(&other)).into()),
            };
            hydrated.push((name, items));
        }
        Ok(hydrated)
    }

    /// Non-empty `{relation}_type` attribute
    pub(crate) fn morph_type_of(&self, relation: &str) -> Option<String> {
        match self.raw(&format!("{}_type", relation))? {
            JsonValue::String(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Model type name
    pub fn model_type(&self) -> &str {
        self.inner.ty.name()
    }

    /// Static metadata of this model's type
    pub fn schema(&self) -> &Schema {
        &self.inner.ty.schema
    }

    /// Service this model was made by
    pub fn service(&self) -> &ModelService {
        &self.inner.service
    }

    pub(crate) fn type_handle(&self) -> Arc<ModelType> {
        Arc::clone(&self.inner.ty)
    }

    pub(crate) fn store(&self) -> &AttributeStore {
        &self.inner.store
    }

    /// Whether both handles point at the same instance
    pub fn is(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Same instance, or same type with equal non-null keys
    pub fn is_same_record(&self, other: &Model) -> bool {
        if self.is(other) {
            return true;
        }
        if self.model_type() != other.model_type() {
            return false;
        }
        match (self.get_key(), other.get_key()) {
            (Some(a), Some(b)) if !a.is_null() => same_json(&a, &b),
            _ => false,
        }
    }

    /// Primary key column, if the type has one
    pub fn get_key_name(&self) -> Option<&str> {
        self.schema().primary_key.as_deref()
    }

    /// Raw primary key value; `None` when the type has no primary key
    pub fn get_key(&self) -> Option<JsonValue> {
        let key = self.get_key_name()?;
        Some(self.raw(key).unwrap_or(JsonValue::Null))
    }

    /// Primary key as a route parameter; `None` when unset
    pub(crate) fn key_param(&self) -> Option<String> {
        self.get_key().as_ref().and_then(quarry_http::query_value)
    }

    /// Whether the server knows this model
    pub fn exists(&self) -> bool {
        self.inner.state.read().exists
    }

    /// Whether the last save created it
    pub fn was_recently_created(&self) -> bool {
        self.inner.state.read().recently_created
    }

    /// Soft-deleted: the type uses soft deletes and `deleted_at` is set
    pub fn trashed(&self) -> bool {
        self.schema().soft_deletes && !self.deleted_at().is_null()
    }

    /// Parsed `created_at`
    pub fn created_at(&self) -> Value {
        self.timestamp(CREATED_AT)
    }

    /// Parsed `updated_at`
    pub fn updated_at(&self) -> Value {
        self.timestamp(UPDATED_AT)
    }

    /// Parsed `deleted_at`
    pub fn deleted_at(&self) -> Value {
        self.timestamp(DELETED_AT)
    }

    fn timestamp(&self, column: &str) -> Value {
        self.inner
            .state
            .read()
            .timestamps
            .get(column)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub(crate) fn set_timestamp(&self, column: &'static str, value: Value) {
        let mut state = self.inner.state.write();
        if value.is_null() {
            state.timestamps.remove(column);
        } else {
            state.timestamps.insert(column, value);
        }
    }

    pub(crate) fn set_exists(&self, exists: bool) {
        self.inner.state.write().exists = exists;
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Plain attributes as a JSON object
    pub fn attributes(&self) -> JsonValue {
        self.inner.store.all()
    }

    /// Attributes, timestamps and loaded relations
    pub fn to_json(&self) -> JsonValue {
        let mut out = self.inner.store.snapshot().to_map();
        let (timestamps, relations) = {
            let state = self.inner.state.read();
            (state.timestamps.clone(), state.relations.clone())
        };
        for (column, value) in timestamps {
            let json = match value.to_iso_string() {
                Some(iso) => JsonValue::String(iso),
                None => value.to_json().unwrap_or(JsonValue::Null),
            };
            out.insert(column.to_string(), json);
        }
        for (name, slot) in relations {
            if let Some(items) = slot.items {
                out.insert(name, items.to_json());
            }
        }
        JsonValue::Object(out)
    }

    /// Attributes restricted to `keys`
    pub fn only<I, S>(&self, keys: I) -> JsonValue
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = self.inner.store.snapshot();
        let out: Map<String, JsonValue> = keys
            .into_iter()
            .filter_map(|k| {
                let k = k.as_ref();
                snapshot.get_key(k).map(|v| (k.to_string(), v.clone()))
            })
            .collect();
        JsonValue::Object(out)
    }

    /// Attributes without `keys`
    pub fn except<I, S>(&self, keys: I) -> JsonValue
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = self.inner.store.snapshot().to_map();
        for key in keys {
            out.remove(key.as_ref());
        }
        JsonValue::Object(out)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Listen to this instance's events named `name` (see [`EventKind::name`])
    pub fn on(&self, name: &'static str, listener: impl Fn(&ModelEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on(name, listener)
    }

    /// Listen to every event of this instance
    pub fn listen(&self, listener: impl Fn(&ModelEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.listen(listener)
    }

    /// Remove a listener; false when it was already gone
    pub fn forget(&self, id: ListenerId) -> bool {
        self.inner.events.forget(id)
    }

    /// Raw store change notifications
    pub fn subscribe_attributes(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.store.subscribe(listener)
    }

    /// Emit on this instance, then on the global bus
    pub(crate) fn emit(&self, kind: EventKind, detail: Option<JsonValue>) {
        let mut event = ModelEvent::new(kind, self.clone());
        event.detail = detail;
        self.inner.events.emit(&event);
        self.inner.service.events().emit(&event);
    }

    // ========================================================================
    // Relations
    // ========================================================================

    /// Relation handle for a declared relation
    pub fn relation(&self, name: &str) -> Result<Relation> {
        Relation::for_model(self, name)
    }

    /// Loaded items of a relation, if any
    pub fn loaded_relation(&self, name: &str) -> Option<Items> {
        self.inner
            .state
            .read()
            .relations
            .get(name)
            .and_then(|slot| slot.items.clone())
    }

    /// Whether `name` holds loaded items
    pub fn relation_loaded(&self, name: &str) -> bool {
        self.loaded_relation(name).is_some()
    }

    /// Replace the loaded items of a relation
    pub fn set_relation(&self, name: &str, items: Items) {
        let mut state = self.inner.state.write();
        let slot = state.relations.entry(name.to_string()).or_default();
        slot.items = Some(items);
        slot.stale = false;
    }

    /// Forget loaded items of a relation
    pub fn unset_relation(&self, name: &str) {
        self.inner.state.write().relations.remove(name);
    }

    pub(crate) fn relation_stale(&self, name: &str) -> bool {
        self.inner
            .state
            .read()
            .relations
            .get(name)
            .is_some_and(|slot| slot.stale)
    }

    pub(crate) fn mark_relation_stale(&self, name: &str) {
        self.inner
            .state
            .write()
            .relations
            .entry(name.to_string())
            .or_default()
            .stale = true;
    }

    /// Patch loaded items in place; returns false when nothing is loaded
    pub(crate) fn patch_relation(&self, name: &str, patch: impl FnOnce(&mut Items)) -> bool {
        let mut state = self.inner.state.write();
        match state.relations.get_mut(name).and_then(|slot| slot.items.as_mut()) {
            Some(items) => {
                patch(items);
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Macros
    // ========================================================================

    /// Run a macro registered on the service
    pub fn call_macro(&self, name: &str, args: &[Value]) -> Result<Value> {
        let callback = self.inner.service.macro_named(name)?;
        Ok(callback(self, args))
    }

    // ========================================================================
    // Internal state access
    // ========================================================================

    pub(crate) fn raw(&self, key: &str) -> Option<JsonValue> {
        self.inner.store.snapshot().get_key(key).cloned()
    }

    pub(crate) fn state(&self) -> &RwLock<ModelState> {
        &self.inner.state
    }

    /// Take the current attributes as the new clean baseline
    pub(crate) fn sync_original(&self) {
        let snapshot = self.inner.store.snapshot();
        let mut state = self.inner.state.write();
        state.original = snapshot;
        state.changed.clear();
    }

    /// Put raw attribute values back; `None` removes the key
    pub(crate) fn restore_raw(&self, previous: Vec<(String, Option<JsonValue>)>) -> Result<()> {
        let mut present = Map::new();
        for (key, value) in &previous {
            match value {
                Some(value) => {
                    present.insert(key.clone(), value.clone());
                }
                None => {
                    self.inner.store.delete_path(&attribute_path(key))?;
                }
            }
        }
        self.inner.store.assign(present)?;
        let current = self.inner.store.snapshot();
        let mut state = self.inner.state.write();
        for (key, _) in &previous {
            state.track(key, current.get_key(key));
        }
        Ok(())
    }

    /// Validate a server record and hydrate its relations without touching state
    pub(crate) fn prepare_record(&self, record: Map<String, JsonValue>, wholesale: bool) -> Result<Absorbed> {
        let parts = split(self.schema(), record, wholesale);
        check_limits(self.inner.service.config().environment, self.schema(), &parts.plain)?;
        Ok(Absorbed {
            timestamps: self.timestamp_values(parts.timestamps)?,
            relations: self.relation_items(parts.relations)?,
            plain: parts.plain,
            wholesale,
        })
    }

    /// Apply a prepared record and take the result as the clean baseline
    pub(crate) fn commit_record(&self, absorbed: Absorbed) -> Result<()> {
        if absorbed.wholesale {
            self.inner
                .store
                .replace(Arc::new(Snapshot::from_object(absorbed.plain)))?;
            self.inner.state.write().timestamps.clear();
        } else {
            self.inner.store.assign(absorbed.plain)?;
        }
        self.sync_original();
        self.apply_derived(absorbed.timestamps, absorbed.relations);
        Ok(())
    }

    /// Apply a prepared record as the server's view of the returned keys only.
    ///
    /// Returned keys become the baseline. Clean keys take the server value;
    /// locally edited keys keep their value and stay dirty unless it now
    /// matches. Keys the server did not return are left alone.
    pub(crate) fn merge_record(&self, absorbed: Absorbed) -> Result<()> {
        let edited: Vec<String> = self.inner.state.read().changed.clone();
        let incoming: Map<String, JsonValue> = absorbed
            .plain
            .iter()
            .filter(|(key, _)| !edited.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.inner.store.assign(incoming)?;

        let current = self.inner.store.snapshot();
        {
            let mut state = self.inner.state.write();
            let mut baseline = state.original.to_map();
            baseline.extend(absorbed.plain.clone());
            state.original = Arc::new(Snapshot::from_object(baseline));
            for key in absorbed.plain.keys() {
                state.track(key, current.get_key(key));
            }
        }
        self.apply_derived(absorbed.timestamps, absorbed.relations);
        Ok(())
    }

    fn apply_derived(&self, timestamps: Vec<(&'static str, Value)>, relations: Vec<(String, Items)>) {
        for (column, value) in timestamps {
            self.set_timestamp(column, value);
        }
        for (name, items) in relations {
            self.set_relation(&name, items);
        }
    }
}

/// Server record checked and hydrated, ready to apply
pub(crate) struct Absorbed {
    plain: Map<String, JsonValue>,
    timestamps: Vec<(&'static str, Value)>,
    relations: Vec<(String, Items)>,
    wholesale: bool,
}

impl ModelState {
    /// Recompute dirty membership of `key` against `original`.
    ///
    /// A key absent from `original` is dirty whenever it is present now,
    /// even as null.
    pub(crate) fn track(&mut self, key: &str, current: Option<&JsonValue>) {
        let clean = match (self.original.get_key(key), current) {
            (Some(original), Some(current)) => same_json(original, current),
            (None, None) => true,
            _ => false,
        };
        let listed = self.changed.iter().position(|k| k == key);
        match (clean, listed) {
            (true, Some(index)) => {
                self.changed.remove(index);
            }
            (false, None) => self.changed.push(key.to_string()),
            _ => {}
        }
    }
}

/// Structural limits of a plain attribute set
fn check_limits(environment: Environment, schema: &Schema, plain: &Map<String, JsonValue>) -> Result<()> {
    for value in plain.values() {
        if let Err(e) = validate_limits(value) {
            if environment.is_production_like() {
                return Err(Error::UnsafeAttributes {
                    model: schema.name.clone(),
                    reason: UnsafeValue::Limit(e),
                });
            }
            warn!(
                target: "quarry::model",
                model = %schema.name,
                error = %e,
                "Attributes exceed structural limits"
            );
        }
    }
    Ok(())
}

pub(crate) fn attribute_path(key: &str) -> JsonPath {
    JsonPath::root().key(key)
}
