//! Attribute read/write pipeline and dirty tracking

use super::{attribute_path, Model};
use crate::cast;
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::hooks;
use crate::schema::{CREATED_AT, DELETED_AT, UPDATED_AT};
use quarry_core::{value_type_name, JsonValue, Value};
use serde_json::Map;
use tracing::{debug, warn};

/// Structural JSON equality that compares numbers by value (`1 == 1.0`)
pub fn same_json(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_json(a, b))
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| same_json(v, other)))
        }
        _ => a == b,
    }
}

impl Model {
    // ========================================================================
    // Read side
    // ========================================================================

    /// Read an attribute: raw value, then cast, then the getter chain.
    ///
    /// Timestamp columns not held as plain attributes read from the parsed
    /// timestamps.
    pub fn get_attribute(&self, key: &str) -> Result<Value> {
        let raw = self.store().get_path(&attribute_path(key));
        let value = match raw {
            Some(raw) => match self.schema().cast_for(key) {
                Some(kind) => cast::cast(kind, &raw),
                None => Value::from(raw),
            },
            None => match key {
                CREATED_AT => self.created_at(),
                UPDATED_AT => self.updated_at(),
                DELETED_AT => self.deleted_at(),
                _ => Value::Null,
            },
        };
        self.run_hook(&hooks::getter(self.model_type(), key), key, value)
    }

    /// Declared attributes must have a chain; others use one if registered
    fn run_hook(&self, hook: &str, key: &str, value: Value) -> Result<Value> {
        let registry = self.service().registry();
        if self.type_handle().is_declared(key) || registry.has(hook) {
            Ok(registry.reduce(hook, value, self)?)
        } else {
            Ok(value)
        }
    }

    /// Value recorded at the last load/save boundary
    pub fn get_original(&self, key: &str) -> Option<JsonValue> {
        self.state().read().original.get_key(key).cloned()
    }

    // ========================================================================
    // Dirty tracking
    // ========================================================================

    /// Whether `key` (or any key) differs from the original
    pub fn is_dirty(&self, key: Option<&str>) -> bool {
        let state = self.state().read();
        match key {
            Some(key) => state.changed.iter().any(|k| k == key),
            None => !state.changed.is_empty(),
        }
    }

    /// No attribute changed since the last sync
    pub fn is_clean(&self) -> bool {
        !self.is_dirty(None)
    }

    /// Dirty keys in first-write order
    pub fn dirty_keys(&self) -> Vec<String> {
        self.state().read().changed.clone()
    }

    /// Current value of every dirty key
    pub fn diff(&self) -> JsonValue {
        let snapshot = self.store().snapshot();
        let out: Map<String, JsonValue> = self
            .dirty_keys()
            .into_iter()
            .map(|key| {
                let value = snapshot.get_key(&key).cloned().unwrap_or(JsonValue::Null);
                (key, value)
            })
            .collect();
        JsonValue::Object(out)
    }

    // ========================================================================
    // Write side
    // ========================================================================

    /// Write one fillable attribute; non-fillable keys are ignored
    pub fn set_attribute(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.write(vec![(key.to_string(), value.into())], true)
    }

    /// Write the fillable subset of a JSON object as one change
    pub fn fill(&self, attributes: &JsonValue) -> Result<()> {
        self.write(entries(attributes)?, true)
    }

    /// Write rich values as one change, fillable keys only
    pub fn fill_values<I, K>(&self, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.write(attributes.into_iter().map(|(k, v)| (k.into(), v)).collect(), true)
    }

    /// Write a JSON object without the fillable guard
    pub fn force_fill(&self, attributes: &JsonValue) -> Result<()> {
        self.write(entries(attributes)?, false)
    }

    /// mutate, setter chain, JSON-safety, single store write, dirty update.
    ///
    /// A batch that fails the JSON-safety check is rejected as a whole.
    fn write(&self, entries: Vec<(String, Value)>, guarded: bool) -> Result<()> {
        let schema = self.schema();
        let mut fragment = Map::new();
        for (key, value) in entries {
            if guarded && !schema.is_fillable(&key) {
                debug!(
                    target: "quarry::model",
                    model = %self.model_type(),
                    key = %key,
                    "Ignoring write to non-fillable attribute"
                );
                continue;
            }
            let value = cast::mutate(schema.cast_for(&key), value);
            let value = self.run_hook(&hooks::setter(self.model_type(), &key), &key, value)?;
            match value.to_json() {
                Ok(json) => {
                    fragment.insert(key, json);
                }
                Err(reason) => {
                    if self.service().config().environment.is_production_like() {
                        return Err(Error::UnsafeAttributes {
                            model: self.model_type().to_string(),
                            reason,
                        });
                    }
                    warn!(
                        target: "quarry::model",
                        model = %self.model_type(),
                        key = %key,
                        error = %reason,
                        "Dropping write with unsafe attribute value"
                    );
                    return Ok(());
                }
            }
        }
        if fragment.is_empty() {
            return Ok(());
        }

        self.store().assign(fragment.clone())?;
        {
            let mut state = self.state().write();
            for (key, value) in &fragment {
                state.track(key, Some(value));
            }
        }
        self.emit(EventKind::Changed, Some(JsonValue::Object(fragment)));
        Ok(())
    }
}

fn entries(attributes: &JsonValue) -> Result<Vec<(String, Value)>> {
    match attributes {
        JsonValue::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()),
        other => Err(Error::Config(format!(
            "attributes must be an object, found {}",
            value_type_name(other)
        ))),
    }
}
