//! Integration tests for the sync API router.
//!
//! Built on lazily-connecting pools: every endpoint exercised here stays
//! off the database, so the tests verify routing, validation, and the
//! response envelope without infrastructure.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use propledger_api_sync::{sync_router, SyncApiState};
use propledger_sync::{EngineConfig, SyncEngine};
use serde_json::Value;
use tower::ServiceExt;

fn test_app() -> Router {
    let ops = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/propledger_ops_test")
        .expect("lazy pool");
    let ledger = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/propledger_ledger_test")
        .expect("lazy pool");

    let engine = SyncEngine::new(ops, ledger, EngineConfig::default());
    sync_router(SyncApiState::new(engine))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn schedules_listing_returns_builtins_in_envelope() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sync/schedules")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);

    let names: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    for builtin in [
        "hourly_sync",
        "daily_sync",
        "ledger_reconciliation",
        "failure_reprocessing",
        "weekly_audit",
        "monthly_deep_sync",
    ] {
        assert!(names.contains(&builtin), "missing builtin {builtin}");
    }

    // Nothing is enabled before start.
    let all_disabled = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["enabled"] == false);
    assert!(all_disabled);
}

#[tokio::test]
async fn status_reports_stopped_engine() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sync/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["running"], false);
    assert!(json["data"]["detection_mode"].is_null());
    assert_eq!(json["data"]["full_sync"]["in_progress"], false);
}

#[tokio::test]
async fn schedule_enable_disable_round_trip() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync/schedules/hourly_sync/enable")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync/schedules/hourly_sync/disable")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn unknown_schedule_returns_client_error_envelope() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync/schedules/nonexistent/enable")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("nonexistent"));
}

#[tokio::test]
async fn add_schedule_with_invalid_frequency_is_rejected() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync/schedules")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"name":"night_audit","frequency":"fortnightly","pass":"audit"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn add_schedule_registers_without_starting_when_disabled() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync/schedules")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"name":"night_audit","description":"late audit","frequency":"daily@01","pass":"audit","enabled":false}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["name"], "night_audit");
    assert_eq!(json["data"]["enabled"], false);
    assert_eq!(json["data"]["cron"], "0 1 * * *");
}

#[tokio::test]
async fn retry_with_unknown_entity_kind_is_rejected() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/sync/failures/lease/{}/retry",
                    uuid::Uuid::new_v4()
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn enqueue_with_unknown_operation_is_rejected() {
    let app = test_app();

    let body = serde_json::json!({
        "operation": "defragment_everything",
        "company_id": uuid::Uuid::new_v4(),
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/maintenance/jobs")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("defragment_everything"));
}

#[tokio::test]
async fn full_sync_status_starts_idle() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sync/full/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["in_progress"], false);
    assert!(json["data"]["job_id"].is_null());
}
