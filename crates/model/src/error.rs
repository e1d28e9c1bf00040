//! Error types for the model layer
//!
//! One enum per concern, collected under [`Error`]:
//!
//! | Category | Type | Raised |
//! |----------|------|--------|
//! | Schema | [`SchemaError`] | unknown model type or relation, missing primary key |
//! | Relation integrity | [`RelationError`] | wrong related type, unpersisted model, no inverse |
//! | Query | [`QueryError`] | locked filter, bad operator, malformed page |
//! | Attribute safety | `Error::UnsafeAttributes` | non-JSON-safe write in production-like environments |
//! | Remote | `Error::Remote`, `Error::Validation`, `Error::Transport` | failed round trip |
//!
//! Nothing in this crate retries; callers decide.

use quarry_core::{JsonValue, ReducerError, StoreError, UnsafeValue};
use quarry_http::{Bag, RouteError, TransportError};
use std::fmt;
use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Remote operation that produced a failure or event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Save of a new model
    Create,
    /// Save of an existing model
    Update,
    /// Delete, soft when the type supports it
    Delete,
    /// Restore of a trashed model
    Restore,
    /// Permanent delete
    ForceDelete,
    /// Reload from the server
    Refresh,
    /// Query
    Fetch,
    /// Pivot attach
    Attach,
    /// Pivot detach
    Detach,
    /// Pivot sync
    Sync,
}

impl Operation {
    /// Lowercase name used in logs and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Restore => "restore",
            Operation::ForceDelete => "forceDelete",
            Operation::Refresh => "refresh",
            Operation::Fetch => "fetch",
            Operation::Attach => "attach",
            Operation::Detach => "detach",
            Operation::Sync => "sync",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema lookup and declaration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Type was never booted
    #[error("unknown model type '{0}'")]
    UnknownModel(String),

    /// Relation not declared on the type
    #[error("model '{model}' has no relation named '{relation}'")]
    UnknownRelation {
        /// Type looked up
        model: String,
        /// Relation name
        relation: String,
    },

    /// Operation needs a primary key the type does not declare
    #[error("model '{0}' does not declare a primary key")]
    MissingPrimaryKey(String),

    /// Relation declared without a related model
    #[error("relation '{model}.{relation}' must declare a related model")]
    MissingRelatedModel {
        /// Type holding the relation
        model: String,
        /// Relation name
        relation: String,
    },

    /// Type does not use soft deletes
    #[error("model '{0}' does not use soft deletes")]
    SoftDeletesDisabled(String),

    /// Schema export could not be read
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// Relation integrity errors, raised before any request is sent
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelationError {
    #[error(
        "no inverse relation found for '{model}.{relation}': model '{related}' declares no relation back to '{model}'"
    )]
    /// No relation on the related type points back
    InverseNotFound {
        /// Type holding the relation
        model: String,
        /// Relation name
        relation: String,
        /// Related type
        related: String,
    },

    /// Related model is of another type
    #[error("relation '{relation}' expects a '{expected}' model, got '{actual}'")]
    WrongRelatedType {
        /// Relation name
        relation: String,
        /// Type the relation declares
        expected: String,
        /// Type of the model given
        actual: String,
    },

    /// Parent has not been saved
    #[error("'{model}' must be persisted before using relation '{relation}'")]
    UnpersistedParent {
        /// Parent type
        model: String,
        /// Relation name
        relation: String,
    },

    /// Related model has not been saved
    #[error("related '{related}' model must be persisted before use in relation '{relation}'")]
    UnpersistedRelated {
        /// Relation name
        relation: String,
        /// Related type
        related: String,
    },

    /// Morph type column is empty
    #[error("relation '{model}.{relation}' has no '{relation}_type' attribute to resolve its target")]
    MissingMorphType {
        /// Type holding the relation
        model: String,
        /// Relation name
        relation: String,
    },

    /// One where many was expected, or the reverse
    #[error("relation '{model}.{relation}' is {expected}-valued but was given {found}")]
    Cardinality {
        /// Type holding the relation
        model: String,
        /// Relation name
        relation: String,
        /// Cardinality the relation needs
        expected: &'static str,
        /// Cardinality found
        found: &'static str,
    },

    /// Relation is of another kind
    #[error("relation '{relation}' is {actual}, not {expected}")]
    WrongKind {
        /// Relation name
        relation: String,
        /// Kind asked for
        expected: &'static str,
        /// Kind declared
        actual: &'static str,
    },
}

/// Query builder errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Filter fixed by a relation scope
    #[error("filter on '{column}' is locked and cannot be changed")]
    LockedFilter {
        /// Scoped column
        column: String,
    },

    /// Operator text not recognised
    #[error("unknown query operator '{0}'")]
    InvalidOperator(String),

    /// Direction text not recognised
    #[error("unknown sort direction '{0}'")]
    InvalidDirection(String),

    /// Range operator without a two element array
    #[error("'{column}' {operator} needs a two element array")]
    RangeArity {
        /// Filtered column
        column: String,
        /// Range operator
        operator: &'static str,
    },

    /// Payload was not a JSON object
    #[error("unexpected index response: {0}")]
    UnexpectedPayload(String),
}

/// Model layer error
#[derive(Debug, Error)]
pub enum Error {
    /// Schema lookup failure
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Relation failure
    #[error(transparent)]
    Relation(#[from] RelationError),

    /// Query builder failure
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Attribute write that cannot be represented as JSON
    #[error("unsafe attributes on '{model}': {reason}")]
    UnsafeAttributes {
        /// Type of the model written to
        model: String,
        /// Why the value was refused
        #[source]
        reason: UnsafeValue,
    },

    /// Non-2xx response other than 422
    #[error("{operation} failed with status {status}")]
    Remote {
        /// Failed operation
        operation: Operation,
        /// HTTP status
        status: u16,
        /// Response body
        body: JsonValue,
    },

    /// 422 response; messages were written to the named error bag
    #[error("{operation} failed validation: {message}")]
    Validation {
        /// Failed operation
        operation: Operation,
        /// Server message
        message: String,
        /// Field messages
        errors: Bag,
    },

    /// No response at all
    #[error("{operation} could not reach the server: {source}")]
    Transport {
        /// Failed operation
        operation: Operation,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// Successful status with a body the operation cannot use
    #[error("{operation} returned an unusable body: {reason}")]
    InvalidResponse {
        /// Operation whose reply was unusable
        operation: Operation,
        /// What was wrong with the body
        reason: String,
    },

    /// Route lookup or substitution failure
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Reducer chain failure
    #[error(transparent)]
    Reducer(#[from] ReducerError),

    /// Attribute store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Config file unreadable or invalid
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the server answered with a non-success status
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote { .. } | Error::Validation { .. })
    }

    /// Operation of a remote, validation or transport failure
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::Remote { operation, .. }
            | Error::Validation { operation, .. }
            | Error::Transport { operation, .. }
            | Error::InvalidResponse { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// HTTP status of a remote failure
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            Error::Validation { .. } => Some(422),
            _ => None,
        }
    }
}
