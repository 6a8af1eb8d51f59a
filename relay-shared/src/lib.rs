#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod models;

pub use models::errors::RelayError;
pub use models::event::{CanonicalEvent, EventKind, MediaRef};
pub use models::identity::{IdentityMapping, UsernameAssociation};
pub use models::platform::{Platform, PlatformDescriptor};
