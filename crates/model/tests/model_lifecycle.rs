//! Model lifecycle against a scripted server: attribute pipeline, dirty
//! tracking, save/delete/restore/refresh and the events they emit.

mod common;

use common::*;
use parking_lot::Mutex;
use quarry_core::Value;
use quarry_http::Method;
use quarry_model::{Environment, Error, EventKind, Operation, SaveOptions};
use std::sync::Arc;

// ============================================================================
// Attributes and dirty tracking
// ============================================================================

#[test]
fn test_diff_tracks_exactly_the_changed_keys() {
    let fx = fixture();
    let post = fx
        .service
        .hydrate("post", json!({"id": 1, "title": "A", "body": "x"}))
        .unwrap();
    assert!(post.is_clean());

    post.set_attribute("title", "B").unwrap();
    post.set_attribute("body", "x").unwrap();

    assert_eq!(post.dirty_keys(), vec!["title".to_string()]);
    assert_eq!(post.diff(), json!({"title": "B"}));
    assert_eq!(post.get_original("title"), Some(json!("A")));
}

#[test]
fn test_writing_back_the_original_clears_dirty_state() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();

    post.fill(&json!({"title": "B", "body": "new"})).unwrap();
    assert!(post.is_dirty(Some("title")));
    assert!(post.is_dirty(Some("body")));

    post.fill(&json!({"title": "A", "body": null})).unwrap();
    assert!(post.is_clean());
    assert_eq!(post.diff(), json!({}));
}

#[test]
fn test_non_fillable_write_is_ignored() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();

    post.set_attribute("secret", "x").unwrap();
    post.fill(&json!({"id": 99})).unwrap();

    assert!(post.is_clean());
    assert_eq!(post.get_attribute("secret").unwrap(), Value::Null);
    assert_eq!(post.get_key(), Some(json!(1)));
}

#[test]
fn test_force_fill_bypasses_the_fillable_guard() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();

    post.force_fill(&json!({"secret": "x"})).unwrap();

    assert_eq!(post.get_attribute("secret").unwrap(), Value::from("x"));
    assert_eq!(post.dirty_keys(), vec!["secret".to_string()]);
}

#[test]
fn test_null_write_to_a_new_key_is_dirty() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();

    post.force_fill(&json!({"secret": null})).unwrap();

    assert_eq!(post.attributes()["secret"], json!(null));
    assert_eq!(post.diff(), json!({"secret": null}));
}

#[test]
fn test_casts_apply_on_read() {
    let fx = fixture();
    let post = fx
        .service
        .hydrate("post", json!({"id": 1, "views": "42", "published_at": "2024-03-01T10:00:00Z"}))
        .unwrap();

    assert_eq!(post.get_attribute("views").unwrap(), Value::Int(42));
    let published = post.get_attribute("published_at").unwrap();
    let dt = published.as_datetime().expect("datetime");
    assert_eq!(dt.timestamp(), 1_709_287_200);
}

#[test]
fn test_datetime_write_reads_back_the_same_instant() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();
    let instant = chrono::DateTime::parse_from_rfc3339("2024-06-30T23:59:59+02:00").unwrap();

    post.set_attribute("published_at", instant).unwrap();

    let read = post.get_attribute("published_at").unwrap();
    assert_eq!(read.as_datetime().map(|d| d.timestamp()), Some(instant.timestamp()));
    assert!(post.attributes()["published_at"].is_string());
}

#[test]
fn test_timestamps_are_parsed_and_serialized() {
    let fx = fixture();
    let post = fx
        .service
        .hydrate(
            "post",
            json!({"id": 1, "created_at": "2024-01-01T00:00:00Z", "deleted_at": null}),
        )
        .unwrap();

    assert!(post.created_at().as_datetime().is_some());
    assert!(post.updated_at().is_null());
    assert!(!post.trashed());
    assert!(post.attributes().get("created_at").is_none());
    assert!(post.to_json()["created_at"].is_string());
    assert!(post.get_attribute("created_at").unwrap().as_datetime().is_some());
}

#[test]
fn test_setter_hook_transforms_writes() {
    let fx = fixture();
    fx.service
        .register_reducer("post.set.title", 10, |value: Value, _model: &quarry_model::Model| {
            match value {
                Value::String(s) => Value::String(s.to_uppercase()),
                other => other,
            }
        })
        .unwrap();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();

    post.set_attribute("title", "loud").unwrap();

    assert_eq!(post.attributes()["title"], json!("LOUD"));
}

#[test]
fn test_getter_hook_transforms_reads() {
    let fx = fixture();
    fx.service
        .register_reducer("post.get.title", 10, |value: Value, _model: &quarry_model::Model| {
            match value {
                Value::String(s) => Value::String(format!("[{}]", s)),
                other => other,
            }
        })
        .unwrap();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "t"})).unwrap();

    assert_eq!(post.get_attribute("title").unwrap(), Value::from("[t]"));
    assert_eq!(post.attributes()["title"], json!("t"));
}

#[test]
fn test_unsafe_write_fails_in_production() {
    let fx = fixture_in(Environment::Production);
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();

    let err = post
        .fill_values([("title", Value::from("B")), ("views", Value::Float(f64::NAN))])
        .unwrap_err();

    assert!(matches!(err, Error::UnsafeAttributes { .. }));
    assert_eq!(post.attributes()["title"], json!("A"));
    assert!(post.is_clean());
}

#[test]
fn test_unsafe_write_is_dropped_outside_production() {
    let fx = fixture_in(Environment::Development);
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();

    post.fill_values([("title", Value::from("B")), ("body", Value::Float(f64::INFINITY))])
        .unwrap();

    assert_eq!(post.attributes()["title"], json!("A"));
    assert!(post.is_clean());
}

#[test]
fn test_only_and_except() {
    let fx = fixture();
    let post = fx
        .service
        .hydrate("post", json!({"id": 1, "title": "A", "body": "b"}))
        .unwrap();

    assert_eq!(post.only(["title", "missing"]), json!({"title": "A"}));
    let rest = post.except(["body", "views", "published_at", "user_id"]);
    assert_eq!(rest, json!({"id": 1, "title": "A"}));
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_update_sends_only_the_diff() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A", "body": "x"})).unwrap();
    fx.client.on(Method::Put, "/api/posts/1", 200, json!({"data": {"id": 1, "title": "B"}}));

    post.set_attribute("title", "B").unwrap();
    post.save().await.unwrap();

    let request = fx.client.last_request().unwrap();
    assert_eq!(request.method, Method::Put);
    assert_eq!(request.url, format!("{}/api/posts/1", BASE_URL));
    assert_eq!(request.body, Some(json!({"title": "B"})));
    assert!(post.is_clean());
    assert_eq!(post.diff(), json!({}));
    assert_eq!(post.get_original("title"), Some(json!("B")));
}

#[tokio::test]
async fn test_clean_save_sends_nothing() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();

    post.save().await.unwrap();

    assert_eq!(fx.client.request_count(), 0);
}

#[tokio::test]
async fn test_full_save_sends_every_fillable_key() {
    let fx = fixture();
    let user = fx
        .service
        .hydrate("user", json!({"id": 3, "name": "N", "email": "e@x"}))
        .unwrap();
    fx.client.push(200, json!({"id": 3, "name": "N", "email": "e@x"}));

    user.save_with(SaveOptions::default().full(true).payload(json!({"notify": true})))
        .await
        .unwrap();

    let body = fx.client.last_request().unwrap().body.unwrap();
    assert_eq!(body, json!({"name": "N", "email": "e@x", "notify": true}));
}

#[tokio::test]
async fn test_non_object_payload_is_rejected() {
    let fx = fixture();
    let user = fx.service.hydrate("user", json!({"id": 3})).unwrap();

    let err = user
        .save_with(SaveOptions::default().payload(json!([1, 2])))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(fx.client.request_count(), 0);
}

#[tokio::test]
async fn test_create_posts_to_store_and_takes_the_server_key() {
    let fx = fixture();
    fx.client.on(
        Method::Post,
        "/api/users",
        201,
        json!({"data": {"id": 7, "name": "Ada", "email": null, "created_at": "2024-05-01T12:00:00Z"}}),
    );

    let user = fx.service.create("user", json!({"name": "Ada"})).await.unwrap();

    let request = fx.client.last_request().unwrap();
    assert_eq!(request.method, Method::Post);
    assert_eq!(request.body, Some(json!({"name": "Ada", "email": null})));
    assert!(user.exists());
    assert!(user.was_recently_created());
    assert_eq!(user.get_key(), Some(json!(7)));
    assert!(user.created_at().as_datetime().is_some());
    assert!(user.is_clean());
}

#[tokio::test]
async fn test_service_update_targets_the_key() {
    let fx = fixture();
    fx.client.on(Method::Put, "/api/users/5", 200, json!({"id": 5, "name": "Z"}));

    let user = fx.service.update("user", 5, json!({"name": "Z"})).await.unwrap();

    assert_eq!(fx.client.last_request().unwrap().body, Some(json!({"name": "Z"})));
    assert_eq!(user.attributes()["name"], json!("Z"));
    assert!(!user.was_recently_created());
}

#[tokio::test]
async fn test_lifecycle_events_fire_in_order() {
    let fx = fixture();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let user = fx.service.make("user", json!({})).unwrap();
    {
        let seen = Arc::clone(&seen);
        user.listen(move |event| seen.lock().push(event.kind));
    }
    fx.client.push(201, json!({"id": 1, "name": "A"}));

    user.set_attribute("name", "A").unwrap();
    user.save().await.unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            EventKind::Changed,
            EventKind::Saving,
            EventKind::Creating,
            EventKind::Created,
            EventKind::Saved,
        ]
    );
}

#[tokio::test]
async fn test_global_bus_sees_model_events() {
    let fx = fixture();
    let names = Arc::new(Mutex::new(Vec::new()));
    {
        let names = Arc::clone(&names);
        fx.service
            .listen(move |event| names.lock().push(format!("{}:{}", event.model.model_type(), event.kind)));
    }
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();
    post.set_attribute("title", "x").unwrap();

    assert_eq!(*names.lock(), vec!["post:change".to_string()]);
}

#[tokio::test]
async fn test_named_listener_and_forget() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();
    let count = Arc::new(Mutex::new(0));
    let id = {
        let count = Arc::clone(&count);
        post.on("change", move |_| *count.lock() += 1)
    };

    post.set_attribute("title", "a").unwrap();
    assert!(post.forget(id));
    post.set_attribute("title", "b").unwrap();

    assert_eq!(*count.lock(), 1);
}

#[tokio::test]
async fn test_validation_failure_fills_the_error_bag() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();
    let failures = Arc::new(Mutex::new(Vec::new()));
    {
        let failures = Arc::clone(&failures);
        post.listen(move |event| {
            if let EventKind::Failed { operation } = event.kind {
                failures.lock().push(operation);
            }
        });
    }
    fx.client.push(
        422,
        json!({
            "message": "The title field is required.",
            "errors": {"title": ["The title field is required.", "Too short."]}
        }),
    );

    post.set_attribute("title", "").unwrap();
    let err = post
        .save_with(SaveOptions::default().error_bag("post_form"))
        .await
        .unwrap_err();

    match err {
        Error::Validation { operation, message, errors } => {
            assert_eq!(operation, Operation::Update);
            assert_eq!(message, "The title field is required.");
            assert_eq!(errors["title"], "The title field is required. Too short.");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(
        fx.service.error_bags().first("post_form", "title").as_deref(),
        Some("The title field is required. Too short.")
    );
    assert!(!fx.service.error_bags().has("default"));
    assert_eq!(*failures.lock(), vec![Operation::Update]);
    assert!(post.is_dirty(Some("title")));
}

#[tokio::test]
async fn test_remote_failure_reports_status() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();
    fx.client.push(500, json!({"message": "boom"}));

    post.set_attribute("title", "x").unwrap();
    let err = post.save().await.unwrap_err();

    assert!(err.is_remote());
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.operation(), Some(Operation::Update));
}

#[tokio::test]
async fn test_unscripted_request_is_a_transport_error() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1})).unwrap();

    post.set_attribute("title", "x").unwrap();
    let err = post.save().await.unwrap_err();

    assert!(matches!(err, Error::Transport { operation: Operation::Update, .. }));
    assert!(!err.is_remote());
}

#[tokio::test]
async fn test_soft_delete_then_restore() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 4, "title": "A"})).unwrap();
    fx.client
        .on(Method::Delete, "/api/posts/4", 200, json!({"id": 4, "deleted_at": "2024-02-02T00:00:00Z"}))
        .on(Method::Post, "/api/posts/4/restore", 200, json!({"id": 4, "deleted_at": null}));

    post.delete().await.unwrap();
    assert!(post.exists());
    assert!(post.trashed());

    post.restore().await.unwrap();
    assert!(post.exists());
    assert!(!post.trashed());
    assert_eq!(fx.client.request_count(), 2);
}

#[tokio::test]
async fn test_soft_delete_without_timestamp_in_reply_marks_now() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 4})).unwrap();
    fx.client.push(204, json!(null));

    post.delete().await.unwrap();

    assert!(post.trashed());
}

#[tokio::test]
async fn test_hard_delete_forgets_existence() {
    let fx = fixture();
    let user = fx.service.hydrate("user", json!({"id": 2})).unwrap();
    fx.client.on(Method::Delete, "/api/users/2", 204, json!(null));

    user.delete().await.unwrap();

    assert!(!user.exists());
    user.delete().await.unwrap();
    assert_eq!(fx.client.request_count(), 1);
}

#[tokio::test]
async fn test_restore_requires_soft_deletes() {
    let fx = fixture();
    let user = fx.service.hydrate("user", json!({"id": 2})).unwrap();

    let err = user.restore().await.unwrap_err();

    assert!(matches!(err, Error::Schema(quarry_model::SchemaError::SoftDeletesDisabled(_))));
}

#[tokio::test]
async fn test_soft_delete_keeps_unsaved_edits_dirty() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();
    post.set_attribute("title", "B").unwrap();
    fx.client
        .push(200, json!(null))
        .on(Method::Put, "/api/posts/1", 200, json!({"id": 1, "title": "B"}));

    post.delete().await.unwrap();

    assert!(post.trashed());
    assert_eq!(post.diff(), json!({"title": "B"}));

    post.save().await.unwrap();
    assert_eq!(fx.client.last_request().unwrap().body, Some(json!({"title": "B"})));
    assert!(post.is_clean());
}

#[tokio::test]
async fn test_soft_delete_reply_only_rebases_returned_keys() {
    let fx = fixture();
    let post = fx
        .service
        .hydrate("post", json!({"id": 1, "title": "A", "body": "x"}))
        .unwrap();
    post.set_attribute("title", "B").unwrap();
    fx.client.push(
        200,
        json!({"id": 1, "title": "A", "body": "y", "deleted_at": "2024-02-02T00:00:00Z"}),
    );

    post.delete().await.unwrap();

    assert_eq!(post.attributes()["title"], json!("B"));
    assert_eq!(post.attributes()["body"], json!("y"));
    assert_eq!(post.diff(), json!({"title": "B"}));
    assert_eq!(post.get_original("title"), Some(json!("A")));
}

#[tokio::test]
async fn test_restore_with_unreadable_reply_keeps_the_trash_mark() {
    let fx = fixture();
    let post = fx
        .service
        .hydrate("post", json!({"id": 4, "deleted_at": "2024-02-02T00:00:00Z"}))
        .unwrap();
    assert!(post.trashed());
    let failures = Arc::new(Mutex::new(Vec::new()));
    {
        let failures = Arc::clone(&failures);
        post.listen(move |event| {
            if let EventKind::Failed { operation } = event.kind {
                failures.lock().push(operation);
            }
        });
    }
    fx.client.push(200, json!([1, 2]));

    let err = post.restore().await.unwrap_err();

    assert!(matches!(err, Error::InvalidResponse { operation: Operation::Restore, .. }));
    assert!(post.trashed());
    assert_eq!(*failures.lock(), vec![Operation::Restore]);
}

#[tokio::test]
async fn test_save_with_malformed_nested_relation_applies_nothing() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "A"})).unwrap();
    post.set_attribute("title", "B").unwrap();
    fx.client.push(200, json!({"id": 1, "title": "C", "author": [{"id": 3}]}));

    let err = post.save().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Relation(quarry_model::RelationError::Cardinality { .. })
    ));
    assert_eq!(post.attributes()["title"], json!("B"));
    assert_eq!(post.diff(), json!({"title": "B"}));
    assert!(!post.relation_loaded("author"));
}

#[tokio::test]
async fn test_force_delete_uses_the_force_route() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 4})).unwrap();
    let kinds = Arc::new(Mutex::new(Vec::new()));
    {
        let kinds = Arc::clone(&kinds);
        post.listen(move |event| kinds.lock().push(event.kind));
    }
    fx.client.on(Method::Delete, "/api/posts/4/force", 204, json!(null));

    post.force_delete().await.unwrap();

    assert!(!post.exists());
    assert_eq!(
        *kinds.lock(),
        vec![EventKind::Deleting, EventKind::ForceDeleted, EventKind::Deleted]
    );
}

#[tokio::test]
async fn test_refresh_discards_local_changes() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 4, "title": "A", "extra": 1})).unwrap();
    fx.client.on(Method::Get, "/api/posts/4", 200, json!({"data": {"id": 4, "title": "Server"}}));

    post.set_attribute("title", "Local").unwrap();
    post.refresh().await.unwrap();

    assert!(post.is_clean());
    assert_eq!(post.attributes()["title"], json!("Server"));
    assert!(post.attributes().get("extra").is_none());
}

#[tokio::test]
async fn test_refresh_rejects_a_non_record_body() {
    let fx = fixture();
    let post = fx.service.hydrate("post", json!({"id": 4})).unwrap();
    fx.client.push(200, json!([1, 2, 3]));

    let err = post.refresh().await.unwrap_err();

    assert!(matches!(err, Error::InvalidResponse { operation: Operation::Refresh, .. }));
}

#[tokio::test]
async fn test_find_hydrates_a_persisted_model() {
    let fx = fixture();
    fx.client.on(Method::Get, "/api/posts", 200, json!({"data": [{"id": 9, "title": "Found"}]}));

    let post = fx.service.find("post", 9).await.unwrap().expect("found");

    assert!(post.exists());
    assert_eq!(post.attributes()["title"], json!("Found"));
    let request = fx.client.last_request().unwrap();
    assert_eq!(filters_of(&request), json!({"id": {"=": 9}}));
    assert_eq!(request.query_param("per_page"), Some("1"));
}

// ============================================================================
// Macros
// ============================================================================

#[test]
fn test_macro_runs_against_the_model() {
    let fx = fixture();
    fx.service
        .register_macro(
            "headline",
            |model: &quarry_model::Model, args: &[Value]| {
                let title = model.get_attribute("title").unwrap_or(Value::Null);
                let suffix = args.first().and_then(Value::as_str).unwrap_or("");
                Value::String(format!("{}{}", title.as_str().unwrap_or(""), suffix))
            },
        )
        .unwrap();
    let post = fx.service.hydrate("post", json!({"id": 1, "title": "Hi"})).unwrap();

    assert!(fx.service.has_macro("headline"));
    assert_eq!(post.call_macro("headline", &[Value::from("!")]).unwrap(), Value::from("Hi!"));
    assert!(post.call_macro("missing", &[]).is_err());
}

#[test]
fn test_reserved_macro_name_is_rejected() {
    let fx = fixture();
    let result = fx
        .service
        .register_macro("save", |_: &quarry_model::Model, _: &[Value]| Value::Null);
    assert!(result.is_err());
}
