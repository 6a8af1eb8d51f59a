pub mod cache;
pub mod delivery_hub;
pub mod event_store;
pub mod identity_probe;
pub mod ingestor;
pub mod mapping_store;
pub mod retry;
