// src/core/backend/mod.rs

//! Establishing, holding, and discarding a single backend session.

pub mod auth;
pub mod opener;
pub mod slot;
pub mod startup;

pub use auth::{Authenticator, CleartextAuthenticator};
pub use opener::{open_persistent, open_persistent_noerror};
pub use slot::{BackendStream, Slot};
pub use startup::{StartupRecord, MAX_STARTUP_PACKET_LEN, PROTOCOL_VERSION_3_0};
