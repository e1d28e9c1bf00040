//! Reactive model layer for Quarry
//!
//! Server-defined record types become [`Model`] instances backed by an
//! attribute store, with casting, dirty tracking, relation traversal and a
//! fluent [`Builder`] that compiles to constrained HTTP requests.
//!
//! - [`ModelService`]: model-type registry, reducers, macros, routes and transport
//! - [`Schema`]: per-type metadata from the server export
//! - [`Model`]: attributes, dirty tracking, persistence and events
//! - [`Relation`]: eight relation kinds with inverse inference
//! - [`Builder`]: filters with path locking, pagination into a [`Page`]
//! - [`ClientConfig`]: `quarry.toml` configuration
//! - [`hooks`]: named reducer chains applications can extend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod cast;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod model;
pub mod page;
pub mod relation;
pub mod schema;
pub mod service;

pub use builder::{Builder, Direction, Operator};
pub use cast::CastKind;
pub use config::{ClientConfig, Environment, CONFIG_FILE_NAME};
pub use error::{Error, Operation, QueryError, RelationError, Result, SchemaError};
pub use events::{EventBus, EventKind, ListenerId, ModelEvent};
pub use model::{same_json, Items, Model, SaveOptions};
pub use page::Page;
pub use relation::{
    BelongsTo, BelongsToMany, HasMany, HasOne, MorphMany, MorphOne, MorphTo, MorphToMany, RelatedRef,
    Relation, RelationBase,
};
pub use schema::{RelationDefinition, RelationKind, Schema, CREATED_AT, DELETED_AT, UPDATED_AT};
pub use service::{Macro, ModelService, ModelType, RESERVED_NAMES};
