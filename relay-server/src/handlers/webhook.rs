//! Webhook ingestion gateway endpoints.
//!
//! Each platform calls two endpoints: a stateless verification handshake and
//! the event receipt. Receipt acknowledges within the platform's timeout
//! budget: the envelope shape is validated inline, everything else runs on a
//! background task so a slow store or probe can never cause the platform to
//! disable the subscription.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use shared::Platform;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::ingest;

/// Query parameters of the verification handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub verify_token: String,
    #[serde(default)]
    pub challenge: String,
}

/// GET `/webhook/{platform}` — verification handshake.
///
/// Echoes the challenge iff the mode is `subscribe` and the token matches
/// the pre-shared secret; otherwise 403 with no body. Idempotent and
/// stateless.
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let Ok(platform) = platform.parse::<Platform>() else {
        return (StatusCode::NOT_FOUND, String::new());
    };

    if params.mode == "subscribe" && params.verify_token == state.config.webhook.verify_token {
        info!(%platform, "webhook verification succeeded");
        (StatusCode::OK, params.challenge)
    } else {
        warn!(%platform, mode = %params.mode, "webhook verification rejected");
        (StatusCode::FORBIDDEN, String::new())
    }
}

/// POST `/webhook/{platform}` — event receipt.
///
/// A recognized envelope is acknowledged immediately; processing continues
/// on a background task. Malformed or unrecognized payload shapes get a 404
/// and produce no event.
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    let Ok(platform) = platform.parse::<Platform>() else {
        return (StatusCode::NOT_FOUND, "UNKNOWN_PLATFORM");
    };

    let entries = match ingest::parse_envelope(platform, &body) {
        Ok(entries) => entries,
        Err(err) => {
            counter!("relay_webhooks_rejected_total", "platform" => platform.as_str())
                .increment(1);
            warn!(%platform, error = %err, "rejecting unrecognized webhook payload");
            return (StatusCode::NOT_FOUND, "IGNORED");
        }
    };

    counter!("relay_webhooks_received_total", "platform" => platform.as_str()).increment(1);

    // Ack first; persistence, retries, and fan-out happen after the
    // response is on the wire.
    let ingestor = Arc::clone(&state.ingestor);
    tokio::spawn(async move {
        ingestor.process_batch(platform, entries).await;
    });

    (StatusCode::OK, "EVENT_RECEIVED")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::server::test_support::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn verification_echoes_challenge_on_valid_token() {
        let state = test_state();
        let app = routes::webhook::create_webhook_router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/instagram?mode=subscribe&verify_token=test-secret&challenge=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "abc123");
    }

    #[tokio::test]
    async fn verification_rejects_wrong_token_with_empty_body() {
        let state = test_state();
        let app = routes::webhook::create_webhook_router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/instagram?mode=subscribe&verify_token=wrong&challenge=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn verification_rejects_wrong_mode() {
        let state = test_state();
        let app = routes::webhook::create_webhook_router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhook/instagram?mode=unsubscribe&verify_token=test-secret&challenge=x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn receipt_acknowledges_recognized_envelope() {
        let state = test_state();
        let app = routes::webhook::create_webhook_router().with_state(Arc::clone(&state));

        let envelope = json!({
            "object": "instagram",
            "entry": [{
                "id": "1000",
                "time": 100,
                "messaging": [{
                    "sender": {"id": "2000"},
                    "recipient": {"id": "1000"},
                    "timestamp": 100,
                    "message": {"mid": "m1", "text": "hi"}
                }]
            }]
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/instagram")
                    .header("content-type", "application/json")
                    .body(Body::from(envelope.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "EVENT_RECEIVED");

        // The deferred pipeline lands the event in the store.
        let mut listed = Vec::new();
        for _ in 0..50 {
            listed = state.events.list_for_user("1000").await.unwrap();
            if !listed.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "hi");
        assert_eq!(listed[0].raw_sender_id, "2000");
    }

    #[tokio::test]
    async fn receipt_rejects_missing_discriminator() {
        let state = test_state();
        let app = routes::webhook::create_webhook_router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/instagram")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"entry": []}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // No event was produced.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(state.events.list_for_user("1000").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn receipt_rejects_unknown_platform() {
        let state = test_state();
        let app = routes::webhook::create_webhook_router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/myspace")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"object": "myspace"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
