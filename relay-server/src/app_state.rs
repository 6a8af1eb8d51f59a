use shared::config::Config;
use std::sync::Arc;

use crate::services::cache::ResponseCache;
use crate::services::delivery_hub::DeliveryHub;
use crate::services::event_store::EventStore;
use crate::services::ingestor::Ingestor;
use crate::services::mapping_store::MappingStore;
use crate::services::retry::DeadLetterLog;
use crate::store::ObjectStore;

/// Shared application state: the relay's components, constructed once at
/// process start. No ambient globals.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
    pub mappings: Arc<MappingStore>,
    pub events: Arc<EventStore>,
    pub cache: Arc<ResponseCache>,
    pub hub: Arc<DeliveryHub>,
    pub ingestor: Arc<Ingestor>,
    pub dead_letters: Arc<DeadLetterLog>,
}
