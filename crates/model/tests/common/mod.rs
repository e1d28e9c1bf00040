//! Shared fixtures for the model integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use quarry_http::{Method, MockClient, Request, Route};
use quarry_model::{CastKind, ClientConfig, Environment, ModelService, RelationDefinition, Schema};
pub use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BASE_URL: &str = "https://api.test";

/// Service plus the scripted transport behind it
pub struct Fixture {
    pub service: ModelService,
    pub client: MockClient,
}

/// Resource routes for `plural` keyed by `param`
fn resource(routes: &mut BTreeMap<String, Route>, plural: &str, param: &str) {
    let base = format!("api/{}", plural);
    let item = format!("{}/{{{}}}", base, param);
    let prefix = format!("api.{}", plural);
    routes.insert(format!("{}.index", prefix), Route::new(base.clone(), [Method::Get, Method::Head]));
    routes.insert(format!("{}.store", prefix), Route::new(base, [Method::Post]));
    routes.insert(format!("{}.show", prefix), Route::new(item.clone(), [Method::Get, Method::Head]));
    routes.insert(format!("{}.update", prefix), Route::new(item.clone(), [Method::Put, Method::Patch]));
    routes.insert(format!("{}.destroy", prefix), Route::new(item.clone(), [Method::Delete]));
    routes.insert(format!("{}.restore", prefix), Route::new(format!("{}/restore", item), [Method::Post]));
    routes.insert(
        format!("{}.forceDelete", prefix),
        Route::new(format!("{}/force", item), [Method::Delete]),
    );
}

fn pivot(routes: &mut BTreeMap<String, Route>, plural: &str, param: &str, relation: &str) {
    for action in ["attach", "detach", "sync"] {
        routes.insert(
            format!("api.{}.{}.{}", plural, relation, action),
            Route::new(format!("api/{}/{{{}}}/{}/{}", plural, param, relation, action), [Method::Post]),
        );
    }
}

pub fn config(environment: Environment) -> ClientConfig {
    let mut routes = BTreeMap::new();
    for (plural, param) in [
        ("users", "user"),
        ("posts", "post"),
        ("comments", "comment"),
        ("tags", "tag"),
        ("videos", "video"),
        ("profiles", "profile"),
        ("labels", "label"),
    ] {
        resource(&mut routes, plural, param);
    }
    pivot(&mut routes, "posts", "post", "tags");
    pivot(&mut routes, "videos", "video", "tags");

    ClientConfig {
        environment,
        base_url: BASE_URL.to_string(),
        routes,
        ..ClientConfig::default()
    }
}

/// Blog schema:
/// user -> posts (HasMany), profile (HasOne), labels (HasMany, no inverse)
/// post -> author (BelongsTo user), comments (MorphMany), tags (BelongsToMany)
/// comment -> commentable (MorphTo)
/// video -> comments (MorphMany), tags (MorphToMany)
pub fn schemas() -> Vec<Schema> {
    vec![
        Schema::new("user")
            .fillable(["name", "email"])
            .relation("posts", RelationDefinition::has_many("post"))
            .relation("profile", RelationDefinition::has_one("profile"))
            .relation("labels", RelationDefinition::has_many("label")),
        Schema::new("label").fillable(["name"]),
        Schema::new("profile")
            .fillable(["bio", "user_id"])
            .relation("user", RelationDefinition::belongs_to("user")),
        Schema::new("post")
            .fillable(["title", "body", "user_id", "published_at", "views"])
            .cast("published_at", CastKind::DateTime)
            .cast("views", CastKind::Integer)
            .soft_deletes(true)
            .relation("author", RelationDefinition::belongs_to("user").foreign_key("user_id"))
            .relation("comments", RelationDefinition::morph_many("comment").morph_name("commentable"))
            .relation("tags", RelationDefinition::belongs_to_many("tag")),
        Schema::new("comment")
            .fillable(["body", "commentable_id", "commentable_type"])
            .relation("commentable", RelationDefinition::morph_to()),
        Schema::new("tag")
            .fillable(["name"])
            .relation("posts", RelationDefinition::belongs_to_many("post"))
            .relation("videos", RelationDefinition::morph_to_many("video")),
        Schema::new("video")
            .fillable(["title"])
            .with_morph_class("App\\Models\\Video")
            .relation("comments", RelationDefinition::morph_many("comment"))
            .relation("tags", RelationDefinition::morph_to_many("tag")),
    ]
}

pub fn fixture_in(environment: Environment) -> Fixture {
    let client = MockClient::new();
    let service = ModelService::new(config(environment), Arc::new(client.clone()));
    service.boot(schemas()).expect("boot");
    Fixture { service, client }
}

pub fn fixture() -> Fixture {
    fixture_in(Environment::Testing)
}

/// Decoded `filters` query parameter of a request
pub fn filters_of(request: &Request) -> serde_json::Value {
    request
        .query_param("filters")
        .map(|raw| serde_json::from_str(raw).expect("filters json"))
        .unwrap_or(serde_json::Value::Null)
}
