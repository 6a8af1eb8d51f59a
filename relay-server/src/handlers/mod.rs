pub mod events;
pub mod identity;
pub mod streaming;
pub mod webhook;
