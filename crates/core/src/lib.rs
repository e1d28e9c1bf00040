//! Core building blocks for Quarry
//!
//! This crate defines the state primitives the model layer is built on:
//! - JsonPath: dot/bracket paths into JSON documents, with path operations
//! - AttributeStore: copy-on-write JSON container with locks and change events
//! - ReducerRegistry: named, priority-ordered transform chains
//! - Value: rich attribute value produced by casts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod json;
pub mod reducer;
pub mod store;
pub mod value;

pub use json::{
    deep_merge, delete_at_path, get_at_path, set_at_path, validate_limits, value_type_name, JsonPath,
    JsonPathError, LimitError, PathParseError, PathSegment, MAX_NESTING_DEPTH, MAX_PATH_LENGTH,
};
pub use reducer::{ReducerError, ReducerRegistry, DEFAULT_PRIORITY};
pub use store::{AttributeStore, ChangeEvent, ChangeKind, Snapshot, StoreError, SubscriptionId};
pub use value::{iso_string, UnsafeValue, Value};

/// Re-exported so downstream crates share one JSON type
pub use serde_json::Value as JsonValue;
