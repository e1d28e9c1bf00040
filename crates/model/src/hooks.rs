//! Named extension points
//!
//! Each hook is a reducer chain in the service's [`ReducerRegistry`]
//! (`quarry_core::ReducerRegistry`). Defaults are registered at priority 0,
//! so application reducers at [`DEFAULT_PRIORITY`](quarry_core::DEFAULT_PRIORITY)
//! run after them and see their output.
//!
//! | Hook | Value | Arguments |
//! |------|-------|-----------|
//! | `{type}.get.{attr}` | `Value` | `Model` |
//! | `{type}.set.{attr}` | `Value` | `Model` |
//! | `{type}.get_created_at` (also updated/deleted) | `Value` | `Schema` |
//! | [`RESOLVE_RELATION`] | `RelationKind` | [`RelationContext`] |
//! | [`GUESS_INVERSE`] | `Option<String>` | [`InverseContext`] |
//! | [`FORMAT_ERRORS`] | `Bag` | raw `errors` JSON |
//! | [`ROUTE_PARAMETERS`] | `BTreeMap<String, String>` | [`RouteContext`] |

use crate::schema::{RelationDefinition, RelationKind};

/// Pick the relation variant built for a declaration
pub const RESOLVE_RELATION: &str = "relations.resolve";

/// Name the relation on the related type that points back
pub const GUESS_INVERSE: &str = "relations.guess_inverse";

/// Turn a 422 `errors` object into an error bag
pub const FORMAT_ERRORS: &str = "http.format_errors";

/// Adjust route parameters before URL substitution
pub const ROUTE_PARAMETERS: &str = "routes.parameters";

/// Read hook for one attribute of one model type
pub fn getter(model_type: &str, attribute: &str) -> String {
    format!("{}.get.{}", model_type, attribute)
}

/// Write hook for one attribute of one model type
pub fn setter(model_type: &str, attribute: &str) -> String {
    format!("{}.set.{}", model_type, attribute)
}

/// Hook applied to a parsed timestamp column at hydration
pub fn timestamp_getter(model_type: &str, column: &str) -> String {
    format!("{}.get_{}", model_type, column)
}

/// Arguments of [`RESOLVE_RELATION`]
#[derive(Debug, Clone)]
pub struct RelationContext {
    /// Type declaring the relation
    pub model: String,
    /// Relation name
    pub relation: String,
    /// Declaration as exported
    pub definition: RelationDefinition,
}

/// Arguments of [`GUESS_INVERSE`]
#[derive(Debug, Clone)]
pub struct InverseContext {
    /// Type declaring the relation
    pub model: String,
    /// Relation name
    pub relation: String,
    /// Kind of the relation
    pub kind: RelationKind,
    /// Related type
    pub related: String,
}

/// Arguments of [`ROUTE_PARAMETERS`]
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Route name
    pub route: String,
    /// Type of the model being routed, if any
    pub model: Option<String>,
}
