use anyhow::Result;
use httpmock::prelude::*;
use meal_tracker::domain::ports::{Backend, Filter, Query};
use meal_tracker::utils::error::{ErrorCategory, MealError};
use meal_tracker::utils::retry::RetryPolicy;
use meal_tracker::RestClient;
use serde_json::json;
use std::time::Duration;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20))
}

fn client(server: &MockServer) -> RestClient {
    RestClient::new(
        &server.base_url(),
        "anon-key",
        "user-token",
        fast_retry(),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_select_sends_auth_headers_and_query() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/dishes")
                .header("apikey", "anon-key")
                .header("authorization", "Bearer user-token")
                .query_param("select", "*")
                .query_param("user_id", "eq.u1")
                .query_param("order", "name.asc")
                .query_param("limit", "2")
                .query_param("offset", "0");
            then.status(200).json_body(json!([
                {"id": 1, "user_id": "u1", "name": "Arepas"},
                {"id": 2, "user_id": "u1", "name": "Borscht"}
            ]));
        })
        .await;

    let query = Query::new()
        .filter(Filter::eq("user_id", "u1"))
        .order_by("name", true)
        .page(0, 2);
    let rows = client(&server).select("dishes", &query).await?;

    mock.assert_async().await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["name"], "Borscht");
    Ok(())
}

#[tokio::test]
async fn test_insert_asks_for_representation() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/tags")
                .header("prefer", "return=representation")
                .json_body(json!([{"user_id": "u1", "name": "quick"}]));
            then.status(201)
                .json_body(json!([{"id": "t1", "user_id": "u1", "name": "quick"}]));
        })
        .await;

    let rows = client(&server)
        .insert("tags", vec![json!({"user_id": "u1", "name": "quick"})])
        .await?;

    mock.assert_async().await;
    assert_eq!(rows[0]["id"], "t1");
    Ok(())
}

#[tokio::test]
async fn test_empty_insert_skips_request() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/tags");
            then.status(201).json_body(json!([]));
        })
        .await;

    let rows = client(&server).insert("tags", vec![]).await?;

    assert!(rows.is_empty());
    mock.assert_hits_async(0).await;
    Ok(())
}

#[tokio::test]
async fn test_delete_uses_filters_and_minimal_return() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE)
                .path("/rest/v1/meal_history")
                .query_param("dish_id", "eq.d1")
                .query_param("user_id", "eq.u1")
                .header("prefer", "return=minimal");
            then.status(204);
        })
        .await;

    client(&server)
        .delete(
            "meal_history",
            &[Filter::eq("dish_id", "d1"), Filter::eq("user_id", "u1")],
        )
        .await?;

    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_unfiltered_update_is_refused() {
    let server = MockServer::start_async().await;
    let err = client(&server)
        .update("dishes", &[], json!({"name": "x"}))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/sources");
            then.status(503).body("upstream unavailable");
        })
        .await;

    let err = client(&server)
        .select("sources", &Query::new())
        .await
        .unwrap_err();

    mock.assert_hits_async(3).await;
    assert_eq!(err.category(), ErrorCategory::Server);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/rest/v1/dish_tags");
            then.status(409).json_body(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint",
                "details": null,
                "hint": null
            }));
        })
        .await;

    let err = client(&server)
        .insert("dish_tags", vec![json!({"dish_id": "1", "tag_id": "2"})])
        .await
        .unwrap_err();

    mock.assert_hits_async(1).await;
    assert_eq!(err.category(), ErrorCategory::Conflict);
    match err {
        MealError::ApiError { status, code, .. } => {
            assert_eq!(status, 409);
            assert_eq!(code.as_deref(), Some("23505"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_expired_token_is_authentication_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/profiles");
            then.status(401).json_body(json!({
                "code": "PGRST301",
                "message": "JWT expired",
                "hint": "Sign in again"
            }));
        })
        .await;

    let err = client(&server)
        .select("profiles", &Query::new())
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert_eq!(err.recovery_suggestion(), "Sign in again");
}

#[tokio::test]
async fn test_refreshed_access_token_is_sent() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/tags")
                .header("apikey", "anon-key")
                .header("authorization", "Bearer refreshed-token");
            then.status(200).json_body(json!([]));
        })
        .await;

    let rows = client(&server)
        .with_access_token("refreshed-token")
        .select("tags", &Query::new())
        .await?;

    mock.assert_async().await;
    assert!(rows.is_empty());
    Ok(())
}
