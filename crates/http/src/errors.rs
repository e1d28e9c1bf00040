//! Named validation error bags
//!
//! A 422 response carries `{ message, errors: { field: [messages] } }`.
//! The model layer flattens `errors` into `field -> message` and stores it in
//! a named bag before surfacing the failure, so form code can read messages
//! per field without parsing responses.

use parking_lot::RwLock;
use quarry_core::JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Field name to flattened message
pub type Bag = BTreeMap<String, String>;

/// Flatten a server `errors` object to one message per field.
///
/// Arrays of messages are joined with a single space; a plain string is
/// kept as is; anything else uses its JSON text.
pub fn flatten(errors: &JsonValue) -> Bag {
    let JsonValue::Object(map) = errors else {
        return Bag::new();
    };
    map.iter()
        .map(|(field, messages)| {
            let text = match messages {
                JsonValue::Array(items) => items
                    .iter()
                    .map(|m| match m {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            (field.clone(), text)
        })
        .collect()
}

/// Split a 422 body into its `message` and raw `errors` object
pub fn validation_parts(body: &JsonValue) -> (String, JsonValue) {
    let message = body
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or("The given data was invalid.")
        .to_string();
    let errors = body
        .get("errors")
        .cloned()
        .unwrap_or_else(|| JsonValue::Object(Default::default()));
    (message, errors)
}

/// Shared, named error bags
///
/// Clones share the same bags.
#[derive(Debug, Clone, Default)]
pub struct ErrorBags {
    bags: Arc<RwLock<BTreeMap<String, Bag>>>,
}

impl ErrorBags {
    /// Empty set of bags
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of `bag`
    pub fn put(&self, bag: &str, errors: Bag) {
        self.bags.write().insert(bag.to_string(), errors);
    }

    /// Copy of `bag`; empty when never written
    pub fn get(&self, bag: &str) -> Bag {
        self.bags.read().get(bag).cloned().unwrap_or_default()
    }

    /// Message for one field
    pub fn first(&self, bag: &str, field: &str) -> Option<String> {
        self.bags.read().get(bag).and_then(|b| b.get(field).cloned())
    }

    /// Whether `bag` holds any message
    pub fn has(&self, bag: &str) -> bool {
        self.bags.read().get(bag).is_some_and(|b| !b.is_empty())
    }

    /// Drop every message in `bag`
    pub fn clear(&self, bag: &str) {
        self.bags.write().remove(bag);
    }

    /// Drop every bag
    pub fn clear_all(&self) {
        self.bags.write().clear();
    }

    /// Names of bags holding at least one message
    pub fn names(&self) -> Vec<String> {
        self.bags.read().keys().cloned().collect()
    }
}
