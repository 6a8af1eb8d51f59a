pub mod errors;
pub mod event;
pub mod identity;
pub mod platform;
