use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::{Extension, Router};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;
use voice_ledger::ledger::{
    start_billing_sync_worker, LedgerConfig, LedgerService, MemoryEntitlementStore,
};
use voice_ledger::routes::api_routes;

fn app() -> (Arc<MemoryEntitlementStore>, Router) {
    let store = Arc::new(MemoryEntitlementStore::new());
    let service = LedgerService::new(store.clone(), LedgerConfig::default());
    let (sync_handle, _worker) = start_billing_sync_worker(service.clone(), 4);
    let router = api_routes()
        .layer(Extension(service))
        .layer(Extension(sync_handle));
    (store, router)
}

fn json_request(method: Method, uri: String, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn admission_and_debit_round_trip_over_http() {
    let (_store, router) = app();
    let user_id = Uuid::new_v4();

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/admission"),
            json!({ "want_seconds": 90 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["seconds_left"], 180);

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/debit"),
            json!({ "actual_seconds": 200.0, "usage_type": "chat_voice" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "voice_quota_exceeded");
    assert_eq!(body["scope"], "monthly");
    assert_eq!(body["fallback"], "free_tier");

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/debit"),
            json!({
                "actual_seconds": 89.4,
                "usage_type": "live_call",
                "session_id": "call-7",
                "metadata": { "provider": "realtime" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["debited"], 90);
    assert_eq!(body["seconds_left"], 90);

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/admission"),
            json!({ "want_seconds": 100 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["reason"], "insufficient_left");
}

#[tokio::test]
async fn entitlement_view_reports_plan_flags() {
    let (_store, router) = app();
    let user_id = Uuid::new_v4();

    let (status, body) = send(
        &router,
        Request::builder()
            .uri(format!("/api/voice/{user_id}/entitlement"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan"], "free");
    assert_eq!(body["is_plus"], false);
    assert_eq!(body["voice_enabled"], true);
    assert_eq!(body["seconds_left"], 180);
    assert!(body.get("daily_left").is_none());
}

#[tokio::test]
async fn daily_limit_and_audit_endpoints() {
    let (_store, router) = app();
    let user_id = Uuid::new_v4();

    let (status, body) = send(
        &router,
        json_request(
            Method::PUT,
            format!("/api/voice/{user_id}/daily-limit"),
            json!({ "enabled": true, "seconds": 45 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["daily_limit_enabled"], true);
    assert_eq!(body["daily_left"], 45);

    let (status, _) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/debit"),
            json!({ "actual_seconds": 30, "usage_type": "chat_voice" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        Request::builder()
            .uri(format!("/api/voice/{user_id}/audit"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counter"], 30);
    assert_eq!(body["ledger_sum"], 30);
    assert_eq!(body["consistent"], true);
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let (_store, router) = app();
    let user_id = Uuid::new_v4();

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/debit"),
            json!({ "actual_seconds": -1.0, "usage_type": "chat_voice" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/debit"),
            json!({ "actual_seconds": 1e300, "usage_type": "chat_voice" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["scope"], "monthly");
    assert_eq!(body["remaining"], 180);

    let (status, _) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/billing/{user_id}/events"),
            json!({
                "external_event_id": "evt_inverted",
                "plan": "plus",
                "status": "active",
                "period_start": "2026-11-01T00:00:00Z",
                "period_end": "2026-10-01T00:00:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn billing_event_applies_once() {
    let (store, router) = app();
    let user_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let payload = json!({
        "external_event_id": "evt_http",
        "plan": "pro",
        "status": "active",
        "period_start": now.to_rfc3339(),
        "period_end": (now + chrono::Duration::days(30)).to_rfc3339()
    });

    let (status, body) = send(
        &router,
        json_request(
            Method::POST,
            format!("/api/billing/{user_id}/events"),
            payload.clone(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);

    let (_, body) = send(
        &router,
        json_request(Method::POST, format!("/api/billing/{user_id}/events"), payload),
    )
    .await;
    assert_eq!(body["applied"], false);
    assert_eq!(store.get(user_id).unwrap().voice_seconds_total, 18000);
}

#[tokio::test]
async fn provider_events_are_accepted_for_background_sync() {
    let (_store, router) = app();
    let (status, _) = send(
        &router,
        json_request(
            Method::POST,
            "/api/billing/provider-events".to_string(),
            json!({ "id": "evt_async" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn store_outage_fails_closed_with_free_tier_fallback() {
    let (store, router) = app();
    let user_id = Uuid::new_v4();
    store.set_available(false);

    for request in [
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/admission"),
            json!({ "want_seconds": 5 }),
        ),
        json_request(
            Method::POST,
            format!("/api/voice/{user_id}/debit"),
            json!({ "actual_seconds": 5.0, "usage_type": "chat_voice" }),
        ),
    ] {
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "voice_temporarily_unavailable");
        assert_eq!(body["fallback"], "free_tier");
    }
}
