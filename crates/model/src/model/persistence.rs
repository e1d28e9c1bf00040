//! Remote lifecycle: save, delete, restore, force delete, refresh
//!
//! Each operation resolves `{route_base}.{action}` through the service, so
//! the HTTP verb always comes from the route table. A failed round trip
//! leaves local state untouched and emits `Failed` on the model and the
//! global bus.

use super::{Absorbed, Model};
use crate::error::{Error, Operation, Result, SchemaError};
use crate::events::EventKind;
use crate::schema::DELETED_AT;
use crate::service::Call;
use chrono::Utc;
use quarry_core::{value_type_name, JsonValue, Value};
use serde_json::Map;
use tracing::{debug, info, warn};

/// Options for [`Model::save_with`]
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Send every fillable attribute, not only the dirty ones
    pub full: bool,
    /// Extra keys merged over the attribute payload
    pub payload: Option<JsonValue>,
    /// Error bag for 422 responses (defaults to the configured bag)
    pub error_bag: Option<String>,
}

impl SaveOptions {
    /// Send every attribute, not only the changed ones
    pub fn full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    /// Send this payload instead of the attributes
    pub fn payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Error bag for validation messages
    pub fn error_bag(mut self, bag: &str) -> Self {
        self.error_bag = Some(bag.to_string());
        self
    }
}

impl Model {
    /// Persist with default options: POST when new, PUT/PATCH of the diff otherwise
    pub async fn save(&self) -> Result<()> {
        self.save_with(SaveOptions::default()).await
    }

    /// Save with explicit options
    pub async fn save_with(&self, options: SaveOptions) -> Result<()> {
        let exists = self.exists();
        let diff = match self.diff() {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        if exists && !options.full && diff.is_empty() && options.payload.is_none() {
            debug!(target: "quarry::model", model = %self.model_type(), "Nothing to save");
            return Ok(());
        }

        let mut data = if exists && !options.full {
            Map::new()
        } else {
            self.only(&self.schema().fillable)
                .as_object()
                .cloned()
                .unwrap_or_default()
        };
        data.extend(diff);
        match options.payload {
            Some(JsonValue::Object(extra)) => data.extend(extra),
            Some(other) => {
                return Err(Error::Config(format!(
                    "save payload must be an object, found {}",
                    value_type_name(&other)
                )))
            }
            None => {}
        }

        let (operation, action, pending) = if exists {
            (Operation::Update, "update", EventKind::Updating)
        } else {
            (Operation::Create, "store", EventKind::Creating)
        };
        self.emit(EventKind::Saving, None);
        self.emit(pending, None);

        let call = self
            .call(operation, action)
            .data(JsonValue::Object(data))
            .error_bag(options.error_bag);
        let body = match self.service().send(call).await {
            Ok(response) => response.into_body(),
            Err(e) => return Err(self.fail(operation, e)),
        };
        let applied = self.prepare_reply(operation, body).and_then(|reply| match reply {
            Some(absorbed) => self.commit_record(absorbed),
            None => {
                self.sync_original();
                Ok(())
            }
        });
        if let Err(e) = applied {
            return Err(self.fail(operation, e));
        }

        let done = if exists {
            EventKind::Updated
        } else {
            let mut state = self.state().write();
            state.exists = true;
            state.recently_created = true;
            EventKind::Created
        };
        info!(
            target: "quarry::model",
            model = %self.model_type(),
            %operation,
            "Saved model"
        );
        self.emit(done, None);
        self.emit(EventKind::Saved, None);
        Ok(())
    }

    /// Delete on the server.
    ///
    /// Soft-deleting types keep `exists` and record `deleted_at`; others
    /// become unpersisted. No-op for a model that was never saved.
    pub async fn delete(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let operation = Operation::Delete;
        self.emit(EventKind::Deleting, None);
        let body = match self.service().send(self.call(operation, "destroy")).await {
            Ok(response) => response.into_body(),
            Err(e) => return Err(self.fail(operation, e)),
        };

        if self.schema().soft_deletes {
            if let Err(e) = self.merge_reply(operation, body) {
                return Err(self.fail(operation, e));
            }
            if self.deleted_at().is_null() {
                self.set_timestamp(DELETED_AT, Value::from(Utc::now()));
            }
        } else {
            self.set_exists(false);
        }
        info!(target: "quarry::model", model = %self.model_type(), "Deleted model");
        self.emit(EventKind::Deleted, None);
        Ok(())
    }

    /// Undo a soft delete
    pub async fn restore(&self) -> Result<()> {
        if !self.schema().soft_deletes {
            return Err(SchemaError::SoftDeletesDisabled(self.model_type().to_string()).into());
        }
        if !self.exists() {
            return Ok(());
        }
        let operation = Operation::Restore;
        self.emit(EventKind::Restoring, None);
        let body = match self.service().send(self.call(operation, "restore")).await {
            Ok(response) => response.into_body(),
            Err(e) => return Err(self.fail(operation, e)),
        };
        let reply = match self.prepare_reply(operation, body) {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(operation, e)),
        };
        self.set_timestamp(DELETED_AT, Value::Null);
        if let Some(absorbed) = reply {
            if let Err(e) = self.merge_record(absorbed) {
                return Err(self.fail(operation, e));
            }
        }
        self.emit(EventKind::Restored, None);
        Ok(())
    }

    /// Delete permanently, bypassing soft deletes
    pub async fn force_delete(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let operation = Operation::ForceDelete;
        let action = if self.schema().soft_deletes {
            "forceDelete"
        } else {
            "destroy"
        };
        self.emit(EventKind::Deleting, None);
        if let Err(e) = self.service().send(self.call(operation, action)).await {
            return Err(self.fail(operation, e));
        }
        self.set_exists(false);
        info!(target: "quarry::model", model = %self.model_type(), "Force deleted model");
        self.emit(EventKind::ForceDeleted, None);
        self.emit(EventKind::Deleted, None);
        Ok(())
    }

    /// Reload every attribute from the server, discarding local changes
    pub async fn refresh(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let operation = Operation::Refresh;
        let body = match self.service().send(self.call(operation, "show")).await {
            Ok(response) => response.into_body(),
            Err(e) => return Err(self.fail(operation, e)),
        };
        let result = match record(body) {
            Some(Ok(record)) => self
                .prepare_record(record, true)
                .and_then(|absorbed| self.commit_record(absorbed)),
            Some(Err(found)) => Err(invalid(operation, found)),
            None => Err(invalid(operation, "null")),
        };
        if let Err(e) = result {
            return Err(self.fail(operation, e));
        }
        self.emit(EventKind::Refreshed, None);
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Call on `{route_base}.{action}`, keyed by this model except for `store`
    fn call(&self, operation: Operation, action: &str) -> Call {
        let schema = self.schema();
        let mut call = Call::new(operation, format!("{}.{}", schema.route_base(), action)).model(self.model_type());
        if action != "store" {
            if let Some(key) = self.key_param() {
                call = call.param(schema.route_key(), key);
            }
        }
        call
    }

    /// Check a success body (`null`, a record, or `{data: record}`) before
    /// anything is applied; `None` for an empty body
    fn prepare_reply(&self, operation: Operation, body: JsonValue) -> Result<Option<Absorbed>> {
        match record(body) {
            None => Ok(None),
            Some(Ok(record)) => self.prepare_record(record, false).map(Some),
            Some(Err(found)) => Err(invalid(operation, found)),
        }
    }

    /// Apply a reply that only reports server state; local edits stay dirty
    fn merge_reply(&self, operation: Operation, body: JsonValue) -> Result<()> {
        match self.prepare_reply(operation, body)? {
            Some(absorbed) => self.merge_record(absorbed),
            None => Ok(()),
        }
    }

    /// Log and broadcast a failed operation, handing the error back
    pub(crate) fn fail(&self, operation: Operation, error: Error) -> Error {
        warn!(
            target: "quarry::model",
            model = %self.model_type(),
            %operation,
            error = %error,
            "Model operation failed"
        );
        self.emit(
            EventKind::Failed { operation },
            Some(JsonValue::String(error.to_string())),
        );
        error
    }
}

/// Record in a response body; `None` for an empty body
fn record(body: JsonValue) -> Option<std::result::Result<Map<String, JsonValue>, &'static str>> {
    match body {
        JsonValue::Null => None,
        JsonValue::Object(mut map) => match map.remove("data") {
            Some(JsonValue::Object(data)) => Some(Ok(data)),
            Some(other) => {
                map.insert("data".to_string(), other);
                Some(Ok(map))
            }
            None => Some(Ok(map)),
        },
        other => Some(Err(value_type_name(&other))),
    }
}

fn invalid(operation: Operation, found: &str) -> Error {
    Error::InvalidResponse {
        operation,
        reason: format!("expected a record, found {}", found),
    }
}
