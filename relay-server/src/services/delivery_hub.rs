//! Real-time delivery hub.
//!
//! Holds every open streaming connection, fans newly ingested events out to
//! the subscriber set of their resolved user, and emits periodic heartbeats.
//! Each connection owns a bounded outbound queue; a connection that cannot
//! keep up is dropped rather than allowed to block the publisher or its
//! peers. The hub replays no history: clients re-fetch backlog through the
//! event listing endpoint on (re)connect.

use metrics::{counter, gauge};
use serde_json::json;
use shared::CanonicalEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

/// A frame delivered to a streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Frame type: `event` or `ping`.
    pub event: String,
    /// JSON payload, already serialized.
    pub data: String,
}

impl StreamFrame {
    fn event_frame(event: &CanonicalEvent) -> Self {
        Self {
            event: "event".to_string(),
            data: serde_json::to_string(event)
                .unwrap_or_else(|_| json!({"error": "serialization_failed"}).to_string()),
        }
    }

    fn ping() -> Self {
        Self {
            event: "ping".to_string(),
            data: json!({}).to_string(),
        }
    }
}

struct Connection {
    id: Uuid,
    sender: mpsc::Sender<StreamFrame>,
}

/// Fan-out registry of open streaming connections, keyed by subscribed user.
pub struct DeliveryHub {
    capacity: usize,
    inner: Mutex<HashMap<String, Vec<Connection>>>,
}

impl DeliveryHub {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            capacity: channel_capacity.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new connection for `user_id` and returns its id plus the
    /// receiving end of its bounded queue.
    pub async fn subscribe(&self, user_id: &str) -> (Uuid, mpsc::Receiver<StreamFrame>) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let connection = Connection {
            id: Uuid::new_v4(),
            sender,
        };
        let connection_id = connection.id;

        let mut guard = self.inner.lock().await;
        guard.entry(user_id.to_string()).or_default().push(connection);
        let total: usize = guard.values().map(Vec::len).sum();
        drop(guard);

        gauge!("relay_stream_connections").set(total as f64);
        info!(user_id, %connection_id, "stream subscribed");
        (connection_id, receiver)
    }

    /// Removes a connection and releases its queue. Called by the stream
    /// handler when the client disconnects; publishing also prunes
    /// connections whose receiver is gone.
    pub async fn unsubscribe(&self, user_id: &str, connection_id: Uuid) {
        let mut guard = self.inner.lock().await;
        if let Some(connections) = guard.get_mut(user_id) {
            connections.retain(|connection| connection.id != connection_id);
            if connections.is_empty() {
                guard.remove(user_id);
            }
        }
        let total: usize = guard.values().map(Vec::len).sum();
        drop(guard);

        gauge!("relay_stream_connections").set(total as f64);
        debug!(user_id, %connection_id, "stream unsubscribed");
    }

    /// Delivers `event` to every open connection of its resolved user.
    ///
    /// Delivery uses `try_send` so one slow consumer never blocks the rest:
    /// a connection with a full queue is dropped, as is one whose client has
    /// gone away.
    pub async fn publish(&self, event: &CanonicalEvent) {
        let frame = StreamFrame::event_frame(event);
        let user_id = event.resolved_user_id.as_str();

        let mut guard = self.inner.lock().await;
        let Some(connections) = guard.get_mut(user_id) else {
            return;
        };

        connections.retain(|connection| match connection.sender.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("relay_stream_drops_total", "reason" => "overflow").increment(1);
                info!(user_id, connection_id = %connection.id, "dropping slow stream connection");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                counter!("relay_stream_drops_total", "reason" => "closed").increment(1);
                false
            }
        });
        if connections.is_empty() {
            guard.remove(user_id);
        }

        counter!("relay_events_published_total", "platform" => event.platform.as_str())
            .increment(1);
    }

    /// Spawns the heartbeat task: every interval, emits a `ping` frame on
    /// each connection and prunes the ones whose client has gone away. A
    /// full queue merely skips the ping.
    pub fn spawn_heartbeat(self: &Arc<Self>, heartbeat_seconds: u64) -> tokio::task::JoinHandle<()> {
        let cadence = Duration::from_secs(heartbeat_seconds.max(5));
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                hub.heartbeat_once().await;
            }
        })
    }

    /// Sends one round of heartbeats.
    pub async fn heartbeat_once(&self) {
        let mut guard = self.inner.lock().await;

        guard.retain(|_, connections| {
            connections.retain(|connection| {
                match connection.sender.try_send(StreamFrame::ping()) {
                    Ok(()) => true,
                    // A full queue drops the ping, not the connection.
                    Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
            !connections.is_empty()
        });
    }

    /// Number of open connections for `user_id`.
    pub async fn connection_count(&self, user_id: &str) -> usize {
        let guard = self.inner.lock().await;
        guard.get(user_id).map_or(0, Vec::len)
    }
}
