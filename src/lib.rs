//! Quarry - reactive models over a REST API
//!
//! Quarry represents server-defined record types as reactive models: typed
//! attribute access with casts, dirty tracking, relation traversal with
//! inverse inference, and a query builder whose relation constraints cannot
//! be widened by caller code.
//!
//! # Quick Start
//!
//! ```ignore
//! use quarry::{ClientConfig, ModelService, Schema};
//! use serde_json::json;
//!
//! let config = ClientConfig::from_file("quarry.toml".as_ref())?;
//! let service = quarry::connect(config);
//! service.boot_from_json(&schema_export)?;
//!
//! let post = service.find("post", 1).await?.unwrap();
//! post.set_attribute("title", "Hello")?;
//! post.save().await?;
//! ```
//!
//! # Architecture
//!
//! - `quarry-core`: attribute store, JSON paths, reducer chains, values
//! - `quarry-http`: transport contract, routes, error bags
//! - `quarry-model`: schemas, models, relations, builder, service

pub use quarry_core::{
    AttributeStore, ChangeEvent, ChangeKind, JsonPath, JsonValue, ReducerError, ReducerRegistry, Snapshot,
    StoreError, Value, DEFAULT_PRIORITY,
};
pub use quarry_http::{
    Bag, ErrorBags, HttpClient, Method, MockClient, Request, Response, Route, RouteError, RouteTable,
    TransportError,
};
pub use quarry_model::*;

#[cfg(feature = "ureq")]
pub use quarry_http::UreqClient;

/// Service over the blocking `ureq` transport, using the configured timeout
#[cfg(feature = "ureq")]
pub fn connect(config: ClientConfig) -> ModelService {
    let client = UreqClient::with_timeout(std::time::Duration::from_millis(config.timeout_ms));
    ModelService::new(config, std::sync::Arc::new(client))
}

/// Initialize logging with sensible defaults.
///
/// The level is read from `QUARRY_LOG` (e.g. `QUARRY_LOG=quarry::http=debug`),
/// defaulting to `info`.
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("QUARRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Initialize logging with a specific level.
pub fn init_logging_with_level(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::registry()
        .with(EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
