use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::app_state::AppState;
use crate::handlers::webhook::{receive_webhook, verify_webhook};

/// Per-platform webhook entry points.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook/{platform}", get(verify_webhook))
        .route("/webhook/{platform}", post(receive_webhook))
}
