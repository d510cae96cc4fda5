// src/core/errors.rs

//! Defines the primary error type for the connection-pool core.

use std::sync::Arc;
use thiserror::Error;

/// Which field overflowed the 1024-byte startup buffer.
///
/// The original implementation reported "user name is too long" for both the
/// `user` and `database` overflow sites; that was a copy-paste bug, not a
/// contract, so this port distinguishes them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupField {
    #[error("user name is too long")]
    User,
    #[error("database name is too long")]
    Database,
}

/// The error type for the connection-pool core.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("failed to make persistent db connection: connection to host \"{host}:{port}\" failed: {source}")]
    Connect {
        host: String,
        port: u16,
        source: Arc<std::io::Error>,
    },

    #[error("failed to make persistent db connection: {0}")]
    StartupTooLong(StartupField),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("version probe failed: {0}")]
    VersionProbe(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> Self {
        PoolError::Io(Arc::new(e))
    }
}

impl PoolError {
    /// True for the one error kind the spec requires to be fatal: any failure
    /// of the version probe terminates the process rather than propagating
    /// (see SPEC_FULL.md §4.3, §7).
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolError::VersionProbe(_))
    }
}
