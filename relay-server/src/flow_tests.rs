//! End-to-end ingestion flow tests through the full router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tower::ServiceExt;

use crate::server::test_support::test_state_with_probe;
use crate::server::{create_app_router, metrics_handle};
use crate::services::identity_probe::ProbeIdentity;
use shared::Platform;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Prior mapping oauth "1000" ↔ recipient "1000"; sender "2000" sends
/// `{mid:"m1", text:"hi"}` at t=100. The canonical event appears in the
/// listing for "1000" and is pushed to an open stream on "1000".
#[tokio::test]
async fn instagram_message_flows_to_listing_and_stream() {
    let (state, probe) = test_state_with_probe();
    probe.on_self(
        Platform::Instagram,
        "ig-token",
        ProbeIdentity {
            account_id: "1000".into(),
            username: "owner".into(),
        },
    );
    probe.on_sender(
        Platform::Instagram,
        "2000",
        ProbeIdentity {
            account_id: "2000".into(),
            username: "jess".into(),
        },
    );

    let config = Arc::clone(&state.config);
    let app = create_app_router(Arc::clone(&state), config, metrics_handle());

    // Establish the prior OAuth mapping.
    let saved = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/identity/instagram")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"oauth_user_id": "1000", "credential": "ig-token"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(saved.status(), StatusCode::OK);

    // Open a live stream for the resolved user.
    let stream_response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/stream/1000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stream_response.status(), StatusCode::OK);

    // Deliver the webhook.
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
    let ack = app
        .clone()
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
    assert_eq!(ack.status(), StatusCode::OK);

    // The event reaches the open stream.
    let mut stream_body = stream_response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), stream_body.next())
        .await
        .expect("stream frame within deadline")
        .expect("open stream")
        .unwrap();
    let frame_text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(frame_text.contains("\"hi\""));
    assert!(frame_text.contains("\"2000\""));

    // And the listing for the resolved user.
    let mut listing = Value::Null;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/events/1000?refresh=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        listing = body_json(response).await;
        if !listing.as_array().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let events = listing.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["kind"], "message");
    assert_eq!(events[0]["resolved_user_id"], "1000");
    assert_eq!(events[0]["raw_sender_id"], "2000");
    assert_eq!(events[0]["text"], "hi");
    assert_eq!(events[0]["platform"], "instagram");

    // The opportunistic mapping refresh made the sender resolvable.
    let resolved = app
        .oneshot(
            Request::builder()
                .uri("/api/identity/instagram/username/jess")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(resolved).await["webhook_sender_id"], "2000");
}

/// Self-referential entries are acknowledged but never become events.
#[tokio::test]
async fn self_referential_webhook_produces_no_event() {
    let (state, _probe) = test_state_with_probe();
    let config = Arc::clone(&state.config);
    let app = create_app_router(Arc::clone(&state), config, metrics_handle());

    let envelope = json!({
        "object": "instagram",
        "entry": [{
            "id": "1000",
            "time": 100,
            "messaging": [{
                "sender": {"id": "1000"},
                "recipient": {"id": "1000"},
                "message": {"text": "echo"}
            }]
        }]
    });

    let ack = app
        .clone()
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
    assert_eq!(ack.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.events.list_for_user("1000").await.unwrap().is_empty());
}
