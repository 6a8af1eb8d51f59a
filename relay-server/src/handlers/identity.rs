//! Identity mapping endpoints.
//!
//! Consumed by the surrounding system after an OAuth connect completes and
//! by the dashboard when it renders linked-account status. The relay itself
//! performs no token exchange; it receives the finished credential and
//! probes the platform with it.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use shared::Platform;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::http::error::AppResult;

/// Request body for saving an OAuth mapping.
#[derive(Debug, Deserialize)]
pub struct SaveOAuthRequest {
    pub oauth_user_id: String,
    pub credential: String,
}

/// Response after a mapping save: the canonical mapping plus the
/// platform-specific profile fields the dashboard consumes.
#[derive(Debug, Serialize)]
pub struct SaveOAuthResponse {
    pub oauth_user_id: String,
    pub username: String,
    pub profile_fields: Value,
}

/// POST `/api/identity/{platform}` — probe the platform and persist the
/// OAuth mapping.
pub async fn save_oauth_mapping(
    State(state): State<Arc<AppState>>,
    Path(platform): Path<String>,
    Json(request): Json<SaveOAuthRequest>,
) -> AppResult<Json<SaveOAuthResponse>> {
    let platform: Platform = platform.parse()?;

    let mapping = state
        .mappings
        .save_oauth_mapping(platform, &request.oauth_user_id, &request.credential)
        .await?;

    let profile_fields = state.mappings.profile_fields(platform, &mapping);
    Ok(Json(SaveOAuthResponse {
        oauth_user_id: mapping.oauth_user_id,
        username: mapping.username,
        profile_fields,
    }))
}

/// GET `/api/identity/{platform}/username/{username}` — the last-observed
/// webhook sender id for a username.
///
/// Absence is an explicit null, never an error.
pub async fn resolve_by_username(
    State(state): State<Arc<AppState>>,
    Path((platform, username)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let platform: Platform = platform.parse()?;

    let sender_id = state
        .mappings
        .resolve_webhook_id_by_username(platform, &username)
        .await;

    Ok(Json(json!({
        "platform": platform,
        "username": username,
        "webhook_sender_id": sender_id,
    })))
}

/// GET `/api/dead-letters` — events abandoned after exhausted retries.
/// Operator-facing.
pub async fn list_dead_letters(State(state): State<Arc<AppState>>) -> Json<Value> {
    let letters: Vec<Value> = state
        .dead_letters
        .snapshot()
        .into_iter()
        .map(|letter| {
            json!({
                "operation": letter.operation,
                "payload": letter.payload,
                "reason": letter.reason,
                "recorded_at": letter.recorded_at,
            })
        })
        .collect();
    Json(json!(letters))
}
