use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app_state::AppState;
use crate::handlers::{
    events::list_events,
    identity::{list_dead_letters, resolve_by_username, save_oauth_mapping},
    streaming::stream_events,
};

/// Read and identity APIs, mounted under `/api`.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/{user_id}", get(list_events))
        .route("/stream/{user_id}", get(stream_events))
        .route("/identity/{platform}", post(save_oauth_mapping))
        .route(
            "/identity/{platform}/username/{username}",
            get(resolve_by_username),
        )
        .route("/dead-letters", get(list_dead_letters))
}
