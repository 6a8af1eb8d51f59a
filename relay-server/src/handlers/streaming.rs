//! Real-time event stream endpoint.
//!
//! Long-lived SSE connection per resolved user. Frames are the canonical
//! events as they are published, interleaved with `ping` heartbeats from the
//! delivery hub. No history is replayed: clients fetch backlog through the
//! listing endpoint on (re)connect. Dropping the HTTP connection releases
//! the hub registration.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::info;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::services::delivery_hub::DeliveryHub;

/// Releases the hub registration when the SSE stream is dropped.
struct SubscriptionGuard {
    hub: Arc<DeliveryHub>,
    user_id: String,
    connection_id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let hub = Arc::clone(&self.hub);
        let user_id = std::mem::take(&mut self.user_id);
        let connection_id = self.connection_id;
        tokio::spawn(async move {
            hub.unsubscribe(&user_id, connection_id).await;
        });
    }
}

/// GET `/api/stream/{user_id}` — server-sent events for a resolved user.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (connection_id, receiver) = state.hub.subscribe(&user_id).await;
    info!(user_id, %connection_id, "established event stream");

    let guard = SubscriptionGuard {
        hub: Arc::clone(&state.hub),
        user_id,
        connection_id,
    };

    let stream = ReceiverStream::new(receiver).map(move |frame| {
        // Owning the guard here ties cleanup to the stream's lifetime.
        let _held = &guard;
        Ok::<_, Infallible>(Event::default().event(frame.event).data(frame.data))
    });

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(
            state.config.stream.heartbeat_seconds.max(5),
        ))
        .text("keep-alive");

    Sse::new(stream).keep_alive(keepalive)
}
