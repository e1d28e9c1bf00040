//! ModelService: the model-type registry
//!
//! The service owns every piece of process-wide state the model layer uses:
//! schemas, the reducer registry, macros, routes, the transport, error bags
//! and the global event bus. Models, relations and builders hold a clone
//! (an `Arc` bump) and reach everything through it, so two services never
//! share extension state.
//!
//! Register schemas and reducers during boot, before models are in use.
//!
//! # Example
//!
//! ```
//! use quarry_http::MockClient;
//! use quarry_model::{ClientConfig, ModelService, Schema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let service = ModelService::new(ClientConfig::default(), Arc::new(MockClient::new()));
//! service.boot([Schema::new("user").fillable(["name", "email"])]).unwrap();
//!
//! let user = service.make("user", json!({"id": 1, "name": "A"})).unwrap();
//! assert!(user.exists());
//! assert_eq!(user.attributes(), json!({"id": 1, "name": "A", "email": null}));
//! ```

use crate::builder::Builder;
use crate::config::ClientConfig;
use crate::error::{Error, Operation, Result, SchemaError};
use crate::events::{EventBus, ListenerId, ModelEvent};
use crate::hooks::{
    self, InverseContext, RelationContext, RouteContext, FORMAT_ERRORS, GUESS_INVERSE,
    RESOLVE_RELATION, ROUTE_PARAMETERS,
};
use crate::model::Model;
use crate::schema::{RelationKind, Schema, CREATED_AT, DELETED_AT, UPDATED_AT};
use parking_lot::RwLock;
use quarry_core::{JsonValue, ReducerError, ReducerRegistry, Value};
use quarry_http::{flatten, validation_parts, Bag, ErrorBags, HttpClient, Request, Response, Route, RouteTable};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Names owned by [`Model`]; reducers and macros may not use them
pub const RESERVED_NAMES: &[&str] = &[
    "attributes",
    "call_macro",
    "create",
    "delete",
    "diff",
    "except",
    "exists",
    "fill",
    "find",
    "force_delete",
    "force_fill",
    "get_attribute",
    "get_key",
    "get_key_name",
    "on",
    "only",
    "query",
    "refresh",
    "relation",
    "restore",
    "save",
    "save_with",
    "set_attribute",
    "to_json",
    "update",
];

/// Macro callable on any model through [`Model::call_macro`]
pub type Macro = Arc<dyn Fn(&Model, &[Value]) -> Value + Send + Sync>;

/// Booted model type: its schema and the attributes that own reducer chains
#[derive(Debug)]
pub struct ModelType {
    /// Schema the type was booted with
    pub schema: Schema,
    pub(crate) declared: BTreeSet<String>,
}

impl ModelType {
    /// Type key
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Whether `attribute` has mandatory getter/setter chains
    pub fn is_declared(&self, attribute: &str) -> bool {
        self.declared.contains(attribute)
    }
}

/// One remote round trip
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub operation: Operation,
    pub route: String,
    pub params: BTreeMap<String, String>,
    pub data: Option<JsonValue>,
    pub error_bag: Option<String>,
    pub model: Option<String>,
}

impl Call {
    pub fn new(operation: Operation, route: String) -> Self {
        Self {
            operation,
            route,
            params: BTreeMap::new(),
            data: None,
            error_bag: None,
            model: None,
        }
    }

    pub fn param(mut self, name: &str, value: String) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error_bag(mut self, bag: Option<String>) -> Self {
        self.error_bag = bag;
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
}

struct ServiceInner {
    config: ClientConfig,
    client: Arc<dyn HttpClient>,
    types: RwLock<BTreeMap<String, Arc<ModelType>>>,
    registry: ReducerRegistry,
    macros: RwLock<HashMap<String, Macro>>,
    routes: RwLock<RouteTable>,
    error_bags: ErrorBags,
    events: EventBus,
}

/// Model-type registry and shared context (cheap to clone)
#[derive(Clone)]
pub struct ModelService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for ModelService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelService")
            .field("environment", &self.inner.config.environment)
            .field("types", &self.inner.types.read().keys().collect::<Vec<_>>())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl ModelService {
    /// Create a service with the core hooks registered and no model types
    pub fn new(config: ClientConfig, client: Arc<dyn HttpClient>) -> Self {
        let routes = config.route_table();
        let service = Self {
            inner: Arc::new(ServiceInner {
                config,
                client,
                types: RwLock::new(BTreeMap::new()),
                registry: ReducerRegistry::new(),
                macros: RwLock::new(HashMap::new()),
                routes: RwLock::new(routes),
                error_bags: ErrorBags::new(),
                events: EventBus::new(),
            }),
        };
        service.inner.registry.reserve(RESERVED_NAMES.iter().copied());
        service.register_core_hooks();
        service
    }

    fn register_core_hooks(&self) {
        let registry = &self.inner.registry;
        let results = [
            registry.register(RESOLVE_RELATION, 0, |kind: RelationKind, _: &RelationContext| kind),
            registry.register(GUESS_INVERSE, 0, |guess: Option<String>, _: &InverseContext| guess),
            registry.register(FORMAT_ERRORS, 0, |_: Bag, errors: &JsonValue| flatten(errors)),
            registry.register(ROUTE_PARAMETERS, 0, |params: BTreeMap<String, String>, _: &RouteContext| params),
        ];
        for result in results {
            if let Err(e) = result {
                warn!(target: "quarry::service", error = %e, "Failed to register core hook");
            }
        }
    }

    // ========================================================================
    // Boot
    // ========================================================================

    /// Register model types.
    ///
    /// Validates each schema, checks that every related model type is known
    /// (including types booted earlier), and registers pass-through reducer
    /// chains for declared attributes and timestamp hooks.
    pub fn boot(&self, schemas: impl IntoIterator<Item = Schema>) -> Result<()> {
        let schemas: Vec<Schema> = schemas.into_iter().collect();
        for schema in &schemas {
            schema.validate()?;
        }

        let known: BTreeSet<String> = self
            .inner
            .types
            .read()
            .keys()
            .cloned()
            .chain(schemas.iter().map(|s| s.name.clone()))
            .collect();
        for schema in &schemas {
            for relation in schema.relations.values() {
                if let Some(model) = &relation.model {
                    if !known.contains(model) {
                        return Err(SchemaError::UnknownModel(model.clone()).into());
                    }
                }
            }
        }

        for schema in schemas {
            let declared: BTreeSet<String> = schema.declared_attributes().into_iter().collect();
            self.register_attribute_hooks(&schema.name, &declared)?;
            info!(
                target: "quarry::service",
                model = %schema.name,
                relations = schema.relations.len(),
                "Booted model type"
            );
            let ty = ModelType { schema, declared };
            self.inner
                .types
                .write()
                .insert(ty.schema.name.clone(), Arc::new(ty));
        }
        Ok(())
    }

    /// Boot from a server schema export (see [`Schema::parse_export`])
    pub fn boot_from_json(&self, export: &JsonValue) -> Result<()> {
        self.boot(Schema::parse_export(export)?)
    }

    fn register_attribute_hooks(&self, model_type: &str, declared: &BTreeSet<String>) -> Result<()> {
        let registry = &self.inner.registry;
        for attribute in declared {
            for name in [hooks::getter(model_type, attribute), hooks::setter(model_type, attribute)] {
                if !registry.has(&name) {
                    registry.register(&name, 0, |value: Value, _: &Model| value)?;
                }
            }
        }
        for column in [CREATED_AT, UPDATED_AT, DELETED_AT] {
            let name = hooks::timestamp_getter(model_type, column);
            if !registry.has(&name) {
                registry.register(&name, 0, |value: Value, _: &Schema| value)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Types
    // ========================================================================

    pub(crate) fn model_type(&self, name: &str) -> Result<Arc<ModelType>> {
        self.inner
            .types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownModel(name.to_string()).into())
    }

    /// Model type whose name or morph class equals `morph`
    pub(crate) fn resolve_morph(&self, morph: &str) -> Result<Arc<ModelType>> {
        let types = self.inner.types.read();
        if let Some(ty) = types.get(morph) {
            return Ok(Arc::clone(ty));
        }
        types
            .values()
            .find(|ty| ty.schema.morph_class() == morph)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownModel(morph.to_string()).into())
    }

    /// Schema of a booted type
    pub fn schema(&self, name: &str) -> Result<Schema> {
        Ok(self.model_type(name)?.schema.clone())
    }

    /// Whether type `name` was booted
    pub fn has_type(&self, name: &str) -> bool {
        self.inner.types.read().contains_key(name)
    }

    /// Booted type keys, sorted
    pub fn type_names(&self) -> Vec<String> {
        self.inner.types.read().keys().cloned().collect()
    }

    // ========================================================================
    // Shared context
    // ========================================================================

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Reducer chains for getters and setters
    pub fn registry(&self) -> &ReducerRegistry {
        &self.inner.registry
    }

    /// Transport every call goes through
    pub fn client(&self) -> &Arc<dyn HttpClient> {
        &self.inner.client
    }

    /// Validation messages keyed by bag
    pub fn error_bags(&self) -> &ErrorBags {
        &self.inner.error_bags
    }

    /// Global model-event bus
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Listen to every model event of every type
    pub fn listen(&self, listener: impl Fn(&ModelEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.listen(listener)
    }

    /// Register a reducer on any hook
    pub fn register_reducer<T, A, F>(&self, name: &str, priority: i32, reducer: F) -> Result<()>
    where
        T: 'static,
        A: 'static,
        F: Fn(T, &A) -> T + Send + Sync + 'static,
    {
        Ok(self.inner.registry.register(name, priority, reducer)?)
    }

    /// Register a macro; reserved names are rejected
    pub fn register_macro(
        &self,
        name: &str,
        callback: impl Fn(&Model, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Result<()> {
        if self.inner.registry.is_reserved(name) {
            return Err(ReducerError::ReservedName(name.to_string()).into());
        }
        self.inner
            .macros
            .write()
            .insert(name.to_string(), Arc::new(callback));
        Ok(())
    }

    /// Whether macro `name` is registered
    pub fn has_macro(&self, name: &str) -> bool {
        self.inner.macros.read().contains_key(name)
    }

    pub(crate) fn macro_named(&self, name: &str) -> Result<Macro> {
        self.inner
            .macros
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ReducerError::MissingReducer(name.to_string()).into())
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Declare or replace a route
    pub fn add_route(&self, name: &str, route: Route) {
        self.inner.routes.write().insert(name, route);
    }

    /// Route table built from the config
    pub fn routes(&self) -> RouteTable {
        self.inner.routes.read().clone()
    }

    /// Resolve a route through the [`ROUTE_PARAMETERS`] hook
    pub fn url(&self, route: &str, params: BTreeMap<String, String>, model: Option<&str>) -> Result<String> {
        Ok(self.resolve(route, params, model)?.1)
    }

    fn resolve(
        &self,
        route: &str,
        params: BTreeMap<String, String>,
        model: Option<&str>,
    ) -> Result<(quarry_http::Method, String)> {
        let context = RouteContext {
            route: route.to_string(),
            model: model.map(str::to_string),
        };
        let params = self.inner.registry.reduce(ROUTE_PARAMETERS, params, &context)?;
        let routes = self.inner.routes.read();
        let method = routes.route(route)?.method();
        Ok((method, routes.url(route, &params)?))
    }

    // ========================================================================
    // Remote calls
    // ========================================================================

    /// Send one request and classify the outcome.
    ///
    /// 422 responses are formatted through [`FORMAT_ERRORS`] and written to
    /// the call's error bag (or the configured default) before failing.
    pub(crate) async fn send(&self, call: Call) -> Result<Response> {
        let operation = call.operation;
        let (method, url) = self.resolve(&call.route, call.params, call.model.as_deref())?;
        let request = Request::with_data(method, url, call.data);
        debug!(
            target: "quarry::http",
            %operation,
            method = %request.method,
            url = %request.url,
            "Sending request"
        );

        let response = self
            .inner
            .client
            .send(request)
            .await
            .map_err(|source| {
                warn!(target: "quarry::http", %operation, error = %source, "Request failed");
                Error::Transport { operation, source }
            })?;

        if response.successful() {
            return Ok(response);
        }

        if response.unprocessable() {
            let (message, raw) = validation_parts(response.body());
            let errors: Bag = self.inner.registry.reduce(FORMAT_ERRORS, Bag::new(), &raw)?;
            let bag = call
                .error_bag
                .unwrap_or_else(|| self.inner.config.error_bag.clone());
            self.inner.error_bags.put(&bag, errors.clone());
            warn!(
                target: "quarry::http",
                %operation,
                bag = %bag,
                fields = errors.len(),
                "Validation failed"
            );
            return Err(Error::Validation {
                operation,
                message,
                errors,
            });
        }

        warn!(
            target: "quarry::http",
            %operation,
            status = response.status(),
            "Remote operation failed"
        );
        Err(Error::Remote {
            operation,
            status: response.status(),
            body: response.into_body(),
        })
    }

    // ========================================================================
    // Factories
    // ========================================================================

    /// Construct a model from attributes.
    ///
    /// A non-null primary key marks the instance as existing server-side.
    pub fn make(&self, model_type: &str, attributes: JsonValue) -> Result<Model> {
        Model::build(self, self.model_type(model_type)?, attributes, None)
    }

    /// Construct a model known to exist server-side
    pub fn hydrate(&self, model_type: &str, attributes: JsonValue) -> Result<Model> {
        Model::build(self, self.model_type(model_type)?, attributes, Some(true))
    }

    /// Start a query for a model type
    pub fn query(&self, model_type: &str) -> Result<Builder> {
        Builder::new(self.clone(), self.model_type(model_type)?)
    }

    /// Fetch one model by primary key
    pub async fn find(&self, model_type: &str, id: impl Into<JsonValue>) -> Result<Option<Model>> {
        self.query(model_type)?.find(id).await
    }

    /// Fill a fresh model with `attributes` and POST it
    pub async fn create(&self, model_type: &str, attributes: JsonValue) -> Result<Model> {
        let model = Model::build(self, self.model_type(model_type)?, JsonValue::Object(Default::default()), Some(false))?;
        model.fill(&attributes)?;
        model.save().await?;
        Ok(model)
    }

    /// Send `attributes` as an update of the record with primary key `key`
    pub async fn update(&self, model_type: &str, key: impl Into<JsonValue>, attributes: JsonValue) -> Result<Model> {
        let ty = self.model_type(model_type)?;
        let key_name = ty.schema.require_primary_key()?.to_string();
        let key = key.into();
        let mut seed = serde_json::Map::new();
        seed.insert(key_name, key);
        let model = Model::build(self, ty, JsonValue::Object(seed), Some(true))?;
        model.fill(&attributes)?;
        model.save().await?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationDefinition;
    use quarry_http::MockClient;
    use serde_json::json;

    fn service() -> ModelService {
        ModelService::new(ClientConfig::default(), Arc::new(MockClient::new()))
    }

    #[test]
    fn test_boot_registers_attribute_hooks() {
        let service = service();
        service
            .boot([Schema::new("post").fillable(["title"]).cast("views", crate::CastKind::Integer)])
            .unwrap();

        let registry = service.registry();
        assert!(registry.has("post.get.title"));
        assert!(registry.has("post.set.views"));
        assert!(registry.has("post.get.id"));
        assert!(registry.has("post.get_created_at"));
        assert!(!registry.has("post.get.body"));
    }

    #[test]
    fn test_boot_rejects_unknown_related_type() {
        let service = service();
        let err = service
            .boot([Schema::new("post").relation("author", RelationDefinition::belongs_to("user"))])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::UnknownModel(name)) if name == "user"));
        assert!(!service.has_type("post"));
    }

    #[test]
    fn test_boot_accepts_types_in_any_order() {
        let service = service();
        service
            .boot([
                Schema::new("post").relation("author", RelationDefinition::belongs_to("user")),
                Schema::new("user").relation("posts", RelationDefinition::has_many("post")),
            ])
            .unwrap();
        assert_eq!(service.type_names(), vec!["post", "user"]);
    }

    #[test]
    fn test_unknown_type() {
        let service = service();
        assert!(matches!(
            service.make("ghost", json!({})),
            Err(Error::Schema(SchemaError::UnknownModel(_)))
        ));
    }

    #[test]
    fn test_reserved_names() {
        let service = service();
        assert!(matches!(
            service.register_reducer("save", 10, |v: Value, _: &Model| v),
            Err(Error::Reducer(ReducerError::ReservedName(_)))
        ));
        assert!(matches!(
            service.register_macro("delete", |_, _| Value::Null),
            Err(Error::Reducer(ReducerError::ReservedName(_)))
        ));
        service.register_macro("headline", |_, _| Value::Null).unwrap();
        assert!(service.has_macro("headline"));
    }

    #[test]
    fn test_route_parameters_hook() {
        let service = service();
        service.add_route("api.posts.show", Route::new("api/posts/{post}", [quarry_http::Method::Get]));
        service
            .register_reducer(ROUTE_PARAMETERS, 10, |mut params: BTreeMap<String, String>, ctx: &RouteContext| {
                if ctx.route == "api.posts.show" {
                    if let Some(id) = params.remove("id") {
                        params.insert("post".to_string(), id);
                    }
                }
                params
            })
            .unwrap();

        let params = BTreeMap::from([("id".to_string(), "9".to_string())]);
        assert_eq!(service.url("api.posts.show", params, None).unwrap(), "/api/posts/9");
    }

    #[test]
    fn test_resolve_morph_by_class() {
        let service = service();
        service
            .boot([Schema::new("video").with_morph_class("App\\Video")])
            .unwrap();
        assert_eq!(service.resolve_morph("App\\Video").unwrap().name(), "video");
        assert_eq!(service.resolve_morph("video").unwrap().name(), "video");
        assert!(service.resolve_morph("App\\Audio").is_err());
    }
}
