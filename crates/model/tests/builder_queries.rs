//! Query builder serialization and index fetches.

mod common;

use common::*;
use quarry_http::Method;
use quarry_model::{Direction, Error, EventKind, Operator, QueryError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_to_query_omits_unset_entries() {
    let fx = fixture();
    let query = fx.service.query("post").unwrap();

    assert_eq!(query.to_query(None, None), json!({}));
    assert_eq!(query.to_query(Some(2), None), json!({"page": 2, "per_page": 15}));
}

#[test]
fn test_to_query_serializes_every_modifier() {
    let fx = fixture();
    let query = fx
        .service
        .query("post")
        .unwrap()
        .where_eq("user_id", 3)
        .unwrap()
        .where_op("views", Operator::Gte, 10)
        .unwrap()
        .where_between("published_at", "2024-01-01", "2024-12-31")
        .unwrap()
        .where_null("deleted_at")
        .unwrap()
        .order_by("published_at", Direction::Desc)
        .unwrap()
        .search_by("rust")
        .unwrap()
        .minified()
        .unwrap()
        .limit(50)
        .unwrap();

    let params = query.to_query(Some(1), None);

    let filters: serde_json::Value = serde_json::from_str(params["filters"].as_str().unwrap()).unwrap();
    assert_eq!(
        filters,
        json!({
            "user_id": {"=": 3},
            "views": {">=": 10},
            "published_at": {"between": ["2024-01-01", "2024-12-31"]},
            "deleted_at": {"null": true}
        })
    );
    let order: serde_json::Value = serde_json::from_str(params["order_by"].as_str().unwrap()).unwrap();
    assert_eq!(order, json!([{"column": "published_at", "direction": "desc"}]));
    assert_eq!(params["q"], json!("rust"));
    assert_eq!(params["minified"], json!(true));
    assert_eq!(params["page"], json!(1));
    assert_eq!(params["per_page"], json!(50));
}

#[test]
fn test_explicit_page_size_beats_limit() {
    let fx = fixture();
    let query = fx.service.query("post").unwrap().limit(50).unwrap();

    assert_eq!(query.to_query(Some(1), Some(5))["per_page"], json!(5));
    assert_eq!(query.to_query(None, None), json!({"per_page": 50}));
}

#[test]
fn test_range_operators_need_two_values() {
    let fx = fixture();

    let err = fx
        .service
        .query("post")
        .unwrap()
        .where_op("views", Operator::Between, json!([1]))
        .unwrap_err();

    assert!(matches!(err, Error::Query(QueryError::RangeArity { .. })));
}

#[test]
fn test_text_operators_and_bulk_filters() {
    let fx = fixture();
    let query = fx
        .service
        .query("post")
        .unwrap()
        .with_filters(&json!({
            "title": "hello",
            "views": {">": 1, "<=": 9},
            "body": {"not like": "%spam%"}
        }))
        .unwrap();

    assert_eq!(
        query.filters(),
        json!({
            "title": {"=": "hello"},
            "views": {">": 1, "<=": 9},
            "body": {"not like": "%spam%"}
        })
    );

    let err = fx.service.query("post").unwrap().where_str("views", "~=", 1).unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::InvalidOperator(_))));
}

#[test]
fn test_user_locked_filter_rejects_later_writes() {
    let fx = fixture();
    let query = fx
        .service
        .query("post")
        .unwrap()
        .where_eq("user_id", 3)
        .unwrap()
        .lock_filter("user_id")
        .unwrap();

    assert!(query.clone().where_not_null("user_id").is_err());
    assert!(query.clone().with_filters(&json!({"user_id": 4})).is_err());
    assert!(query.where_eq("title", "ok").is_ok());
}

#[test]
fn test_locking_an_absent_filter_fails() {
    let fx = fixture();
    assert!(fx.service.query("post").unwrap().lock_filter("nothing").is_err());
}

#[tokio::test]
async fn test_get_reads_a_paginated_envelope() {
    let fx = fixture();
    fx.client.on(
        Method::Get,
        "/api/posts",
        200,
        json!({
            "data": [{"id": 1}, {"id": 2}],
            "links": {"first": "https://api.test/api/posts?page=1", "next": "https://api.test/api/posts?page=2"},
            "meta": {"current_page": 1, "last_page": 3, "total": 6, "per_page": 2}
        }),
    );
    let fetched = Arc::new(AtomicUsize::new(0));
    {
        let fetched = Arc::clone(&fetched);
        fx.service.listen(move |event| {
            if event.kind == EventKind::Fetched {
                fetched.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let page = fx.service.query("post").unwrap().get(1, Some(2)).await.unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page.current_page(), Some(1));
    assert_eq!(page.last_page(), Some(3));
    assert_eq!(page.total(), Some(6));
    assert!(page.has_more_pages());
    assert_eq!(fetched.load(Ordering::SeqCst), 2);
    let request = fx.client.last_request().unwrap();
    assert_eq!(request.query_param("page"), Some("1"));
    assert_eq!(request.query_param("per_page"), Some("2"));
}

#[tokio::test]
async fn test_get_with_links_points_pagination_at_the_caller() {
    let fx = fixture();
    fx.client.push(
        200,
        json!({
            "data": [{"id": 1}],
            "links": {"next": "https://api.test/api/posts?page=2", "prev": null},
            "meta": {"path": "https://api.test/api/posts", "links": [{"url": "https://api.test/api/posts?page=1", "label": "1"}]}
        }),
    );

    let page = fx
        .service
        .query("post")
        .unwrap()
        .get_with_links(1, None, "/blog")
        .await
        .unwrap();

    let links = page.links.unwrap();
    assert_eq!(links["next"], json!("/blog?page=2"));
    assert!(links["prev"].is_null());
    let meta = page.meta.unwrap();
    assert_eq!(meta["path"], json!("/blog"));
    assert_eq!(meta["links"][0]["url"], json!("/blog?page=1"));
}

#[tokio::test]
async fn test_all_accepts_a_bare_array() {
    let fx = fixture();
    fx.client.push(200, json!([{"id": 1}, {"id": 2}, {"id": 3}]));

    let posts = fx.service.query("post").unwrap().where_eq("views", 0).unwrap().all().await.unwrap();

    assert_eq!(posts.len(), 3);
    let request = fx.client.last_request().unwrap();
    assert!(request.query_param("page").is_none());
    assert!(request.query_param("per_page").is_none());
}

#[tokio::test]
async fn test_first_on_empty_result_is_none() {
    let fx = fixture();
    fx.client.push(200, json!({"data": []}));

    assert!(fx.service.query("tag").unwrap().first().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unexpected_index_payload_is_an_error() {
    let fx = fixture();
    fx.client.push(200, json!({"items": []}));

    let err = fx.service.query("post").unwrap().all().await.unwrap_err();

    assert!(matches!(err, Error::Query(QueryError::UnexpectedPayload(_))));
}

#[tokio::test]
async fn test_fetch_failure_surfaces_the_status() {
    let fx = fixture();
    fx.client.push(503, json!(null));

    let err = fx.service.query("post").unwrap().get(1, None).await.unwrap_err();

    assert_eq!(err.status(), Some(503));
}
