//! Event listing endpoint.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::app_state::AppState;
use crate::http::error::AppResult;
use crate::services::ingestor::EVENT_LIST_CATEGORY;

/// Query parameters of the listing endpoint.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Skip the cache for this request.
    #[serde(default)]
    pub refresh: bool,
}

/// GET `/api/events/{user_id}` — every canonical event for a resolved user,
/// oldest first, served through the response cache unless `refresh=true`.
///
/// An unknown user id is an empty array, not an error; only a storage
/// failure surfaces as one, and failures are never cached.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    if !query.refresh {
        if let Some(cached) = state.cache.get(EVENT_LIST_CATEGORY, &[&user_id]).await {
            debug!(user_id, "event listing served from cache");
            return Ok(Json(cached));
        }
    }

    let events = state.events.list_for_user(&user_id).await?;
    let payload = serde_json::to_value(&events)
        .map_err(|err| crate::http::error::ApiError::internal_server_error(err.to_string()))?;

    state
        .cache
        .set(EVENT_LIST_CATEGORY, payload.clone(), &[&user_id])
        .await;

    Ok(Json(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::server::test_support::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use shared::{CanonicalEvent, EventKind, Platform};
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn listing_returns_persisted_events() {
        let state = test_state();
        let event = CanonicalEvent::new(
            Platform::Instagram,
            EventKind::Message,
            "1000",
            "2000",
            "hi",
            100,
        );
        state.events.append(&event).await.unwrap();

        let app = routes::api::create_api_router().with_state(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events/1000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["text"], "hi");
        assert_eq!(body[0]["resolved_user_id"], "1000");
    }

    #[tokio::test]
    async fn unknown_user_lists_empty_array() {
        let state = test_state();
        let app = routes::api::create_api_router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events/nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn refresh_bypasses_a_stale_cache_entry() {
        let state = test_state();
        // Seed a stale cached listing.
        state
            .cache
            .set(EVENT_LIST_CATEGORY, serde_json::json!(["stale"]), &["1000"])
            .await;

        let event = CanonicalEvent::new(
            Platform::Instagram,
            EventKind::Message,
            "1000",
            "2000",
            "fresh",
            100,
        );
        state.events.append(&event).await.unwrap();

        let app = routes::api::create_api_router().with_state(Arc::clone(&state));

        // Without refresh the stale entry wins.
        let cached = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/events/1000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(cached).await, serde_json::json!(["stale"]));

        // With refresh the store is consulted and the cache repopulated.
        let fresh = app
            .oneshot(
                Request::builder()
                    .uri("/events/1000?refresh=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(fresh).await;
        assert_eq!(body[0]["text"], "fresh");

        assert_eq!(
            state.cache.get(EVENT_LIST_CATEGORY, &["1000"]).await.unwrap()[0]["text"],
            "fresh"
        );
    }
}
