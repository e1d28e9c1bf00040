//! Query builder
//!
//! A [`Builder`] accumulates constraints in its own [`AttributeStore`] bag:
//!
//! ```text
//! { filters: { column: { operator: value } }, order_by: [{column, direction}],
//!   q, minified, page, per_page }
//! ```
//!
//! Relations lock the filter paths they write, so caller code cannot widen a
//! relation-scoped query: a later `where_*` on a locked column fails with
//! [`QueryError::LockedFilter`]. Cloning a builder keeps its locks.
//!
//! Execution sends `GET {route_base}.index` with the bag as query parameters
//! and hydrates every returned record as an existing model.

use crate::error::{Error, Operation, QueryError, Result};
use crate::events::EventKind;
use crate::model::Model;
use crate::page::Page;
use crate::service::{Call, ModelService, ModelType};
use quarry_core::{value_type_name, AttributeStore, JsonPath, JsonValue, StoreError};
use serde_json::{json, Map};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Filter operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `like`
    Like,
    /// `not like`
    NotLike,
    /// `between`, takes a two element array
    Between,
    /// `not between`, takes a two element array
    NotBetween,
    /// `null`
    Null,
    /// `not null`
    NotNull,
}

impl Operator {
    /// Key used under `filters.{column}`
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::Between => "between",
            Operator::NotBetween => "not between",
            Operator::Null => "null",
            Operator::NotNull => "not null",
        }
    }

    /// Takes a `[low, high]` pair
    pub fn is_range(&self) -> bool {
        matches!(self, Operator::Between | Operator::NotBetween)
    }

    /// Takes no operand
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::Null | Operator::NotNull)
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', " ");
        Ok(match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "like" => Operator::Like,
            "not like" | "notlike" => Operator::NotLike,
            "between" => Operator::Between,
            "not between" | "notbetween" => Operator::NotBetween,
            "null" => Operator::Null,
            "not null" | "notnull" => Operator::NotNull,
            _ => return Err(QueryError::InvalidOperator(s.to_string())),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl Direction {
    /// Wire form, `asc` or `desc`
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

impl FromStr for Direction {
    type Err = QueryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            _ => Err(QueryError::InvalidDirection(s.to_string())),
        }
    }
}

fn filter_path(column: &str) -> JsonPath {
    JsonPath::root().key("filters").key(column)
}

/// Fluent query over one model type
#[derive(Clone)]
pub struct Builder {
    service: ModelService,
    ty: Arc<ModelType>,
    bag: AttributeStore,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("model", &self.ty.name())
            .field("bag", &self.bag.all())
            .field("locked", &self.bag.locked_paths())
            .finish()
    }
}

impl Builder {
    pub(crate) fn new(service: ModelService, ty: Arc<ModelType>) -> Result<Self> {
        let bag = AttributeStore::from_json(json!({
            "filters": {},
            "order_by": [],
            "q": null,
            "minified": false,
            "page": null,
            "per_page": null,
        }))?;
        Ok(Self { service, ty, bag })
    }

    /// Type key of the models this query returns
    pub fn model_type(&self) -> &str {
        self.ty.name()
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// `column = value`
    pub fn where_eq(self, column: &str, value: impl Into<JsonValue>) -> Result<Self> {
        self.where_op(column, Operator::Eq, value)
    }

    /// `column {operator} value`; range operators need a two element array
    pub fn where_op(self, column: &str, operator: Operator, value: impl Into<JsonValue>) -> Result<Self> {
        let value = if operator.is_unary() {
            JsonValue::Bool(true)
        } else {
            value.into()
        };
        if operator.is_range() && !matches!(&value, JsonValue::Array(pair) if pair.len() == 2) {
            return Err(QueryError::RangeArity {
                column: column.to_string(),
                operator: operator.as_str(),
            }
            .into());
        }
        self.write_filter(column, filter_path(column).key(operator.as_str()), value)?;
        Ok(self)
    }

    /// Operator given as text, e.g. `">="` or `"not like"`
    pub fn where_str(self, column: &str, operator: &str, value: impl Into<JsonValue>) -> Result<Self> {
        let operator: Operator = operator.parse()?;
        self.where_op(column, operator, value)
    }

    /// `column` is null
    pub fn where_null(self, column: &str) -> Result<Self> {
        self.where_op(column, Operator::Null, JsonValue::Null)
    }

    /// `column` is not null
    pub fn where_not_null(self, column: &str) -> Result<Self> {
        self.where_op(column, Operator::NotNull, JsonValue::Null)
    }

    /// `low <= column <= high`
    pub fn where_between(self, column: &str, low: impl Into<JsonValue>, high: impl Into<JsonValue>) -> Result<Self> {
        self.where_op(column, Operator::Between, JsonValue::Array(vec![low.into(), high.into()]))
    }

    /// `column` outside `low..=high`
    pub fn where_not_between(
        self,
        column: &str,
        low: impl Into<JsonValue>,
        high: impl Into<JsonValue>,
    ) -> Result<Self> {
        self.where_op(column, Operator::NotBetween, JsonValue::Array(vec![low.into(), high.into()]))
    }

    /// Bulk form: `{column: value}` means equality, `{column: {op: value}}`
    /// applies each operator
    pub fn with_filters(mut self, filters: &JsonValue) -> Result<Self> {
        let filters = filters.as_object().ok_or_else(|| {
            QueryError::UnexpectedPayload(format!("filters must be an object, found {}", value_type_name(filters)))
        })?;
        for (column, spec) in filters {
            self = match spec {
                JsonValue::Object(ops) => {
                    let mut builder = self;
                    for (op, value) in ops {
                        builder = builder.where_str(column, op, value.clone())?;
                    }
                    builder
                }
                value => self.where_eq(column, value.clone())?,
            };
        }
        Ok(self)
    }

    fn write_filter(&self, column: &str, path: JsonPath, value: JsonValue) -> Result<()> {
        self.bag.set_path(&path, value).map_err(|e| match e {
            StoreError::LockedPath { .. } => {
                warn!(
                    target: "quarry::query",
                    model = %self.ty.name(),
                    column = %column,
                    "Rejected write to locked filter"
                );
                Error::from(QueryError::LockedFilter {
                    column: column.to_string(),
                })
            }
            other => other.into(),
        })
    }

    /// Append a sort column
    pub fn order_by(self, column: &str, direction: Direction) -> Result<Self> {
        let mut order = match self.bag.get("order_by") {
            Some(JsonValue::Array(order)) => order,
            _ => Vec::new(),
        };
        order.push(json!({"column": column, "direction": direction.as_str()}));
        self.bag.set("order_by", JsonValue::Array(order))?;
        Ok(self)
    }

    /// Full-text search term (`q`)
    pub fn search_by(self, term: &str) -> Result<Self> {
        self.bag.set("q", JsonValue::String(term.to_string()))?;
        Ok(self)
    }

    /// Ask the server for the minified resource
    pub fn minified(self) -> Result<Self> {
        self.bag.set("minified", JsonValue::Bool(true))?;
        Ok(self)
    }

    /// Page size for subsequent fetches
    pub fn limit(self, per_page: u64) -> Result<Self> {
        self.bag.set("per_page", JsonValue::from(per_page))?;
        Ok(self)
    }

    /// Freeze every filter on `column`
    pub fn lock_filter(self, column: &str) -> Result<Self> {
        self.bag.lock_path(&filter_path(column))?;
        Ok(self)
    }

    /// Whether filters on `column` are frozen
    pub fn is_locked(&self, column: &str) -> bool {
        self.bag.is_locked(&filter_path(column))
    }

    /// Current `filters` object
    pub fn filters(&self) -> JsonValue {
        self.bag.get("filters").unwrap_or_else(|| json!({}))
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Query parameters for one request.
    ///
    /// `filters` and `order_by` are sent as JSON text; unset entries are
    /// omitted. Without a page, no pagination parameters are sent unless a
    /// limit was set.
    pub fn to_query(&self, page: Option<u64>, per_page: Option<u64>) -> JsonValue {
        let bag = self.bag.snapshot();
        let mut out = Map::new();
        for key in ["filters", "order_by"] {
            match bag.get_key(key) {
                Some(JsonValue::Object(v)) if v.is_empty() => {}
                Some(JsonValue::Array(v)) if v.is_empty() => {}
                Some(value) => {
                    out.insert(key.to_string(), JsonValue::String(value.to_string()));
                }
                None => {}
            }
        }
        if let Some(JsonValue::String(q)) = bag.get_key("q") {
            out.insert("q".to_string(), JsonValue::String(q.clone()));
        }
        if let Some(JsonValue::Bool(true)) = bag.get_key("minified") {
            out.insert("minified".to_string(), JsonValue::Bool(true));
        }

        let limit = bag.get_key("per_page").and_then(JsonValue::as_u64);
        match page {
            Some(page) => {
                let per_page = per_page
                    .or(limit)
                    .unwrap_or(u64::from(self.service.config().default_per_page));
                out.insert("page".to_string(), JsonValue::from(page));
                out.insert("per_page".to_string(), JsonValue::from(per_page));
            }
            None => {
                if let Some(per_page) = per_page.or(limit) {
                    out.insert("per_page".to_string(), JsonValue::from(per_page));
                }
            }
        }
        JsonValue::Object(out)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Fetch one page
    pub async fn get(&self, page: u64, per_page: Option<u64>) -> Result<Page> {
        self.fetch(Some(page), per_page).await
    }

    /// Fetch one page and point its pagination links at `base`
    pub async fn get_with_links(&self, page: u64, per_page: Option<u64>, base: &str) -> Result<Page> {
        let mut result = self.fetch(Some(page), per_page).await?;
        result.replace_links(base);
        Ok(result)
    }

    /// Fetch without pagination parameters (unless limited)
    pub async fn all(&self) -> Result<Vec<Model>> {
        Ok(self.fetch(None, None).await?.into_items())
    }

    /// First model of the first page
    pub async fn first(&self) -> Result<Option<Model>> {
        Ok(self.get(1, Some(1)).await?.items.into_iter().next())
    }

    /// First record whose primary key equals `id`
    pub async fn find(self, id: impl Into<JsonValue>) -> Result<Option<Model>> {
        let key = self.ty.schema.require_primary_key()?.to_string();
        self.where_eq(&key, id)?.first().await
    }

    async fn fetch(&self, page: Option<u64>, per_page: Option<u64>) -> Result<Page> {
        let operation = Operation::Fetch;
        let call = Call::new(operation, format!("{}.index", self.ty.schema.route_base()))
            .data(self.to_query(page, per_page))
            .model(self.ty.name());
        let response = self.service.send(call).await?;

        let (records, links, meta) = match response.into_body() {
            JsonValue::Array(records) => (records, None, None),
            JsonValue::Object(mut envelope) => match envelope.remove("data") {
                Some(JsonValue::Array(records)) => (records, envelope.remove("links"), envelope.remove("meta")),
                other => {
                    let found = other.as_ref().map_or("nothing", value_type_name);
                    return Err(QueryError::UnexpectedPayload(format!("expected a data array, found {}", found)).into());
                }
            },
            other => {
                return Err(QueryError::UnexpectedPayload(format!(
                    "expected an array or a data envelope, found {}",
                    value_type_name(&other)
                ))
                .into())
            }
        };

        let items = records
            .into_iter()
            .map(|record| Model::build(&self.service, Arc::clone(&self.ty), record, Some(true)))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            target: "quarry::query",
            model = %self.ty.name(),
            count = items.len(),
            "Fetched models"
        );
        for item in &items {
            item.emit(EventKind::Fetched, None);
        }
        Ok(Page { items, links, meta })
    }
}
