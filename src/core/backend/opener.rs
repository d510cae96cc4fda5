// src/core/backend/opener.rs

//! `open_persistent`: establishes one backend session end to end, following
//! the ten-step sequence of `make_persistent_db_connection` in
//! `examples/original_source/src/protocol/pool_pg_utils.c`, reworked as
//! RAII rather than the original's scoped-allocator catch/release/rethrow.

use crate::core::backend::auth::{negotiate_tls, Authenticator};
use crate::core::backend::slot::{BackendStream, Slot};
use crate::core::backend::startup::StartupRecord;
use crate::core::errors::PoolError;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tracing::{error, info, warn};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Disarms itself on success; if dropped while still armed, closes the
/// transport. Replaces the original's scoped allocator, whose
/// `free_persisten_db_connection_memory` ran on every error path to release
/// the `Slot`/buffer pair — here that release is just "let the half-built
/// stream drop", but the guard still gives us one place to log it from.
struct ConnectGuard {
    armed: bool,
    node_id: usize,
}

impl ConnectGuard {
    fn new(node_id: usize) -> Self {
        Self {
            armed: true,
            node_id,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                node_id = self.node_id,
                "backend session open aborted, releasing partially built connection"
            );
        }
    }
}

/// Connects the transport for `host`/`port`, choosing UNIX-domain or TCP per
/// SPEC_FULL.md §4.1 step 3: a `host` beginning with `/` is a socket
/// directory path, otherwise a TCP hostname.
async fn connect_transport(host: &str, port: u16) -> Result<BackendStream, PoolError> {
    if let Some(dir) = host.strip_prefix('/') {
        let path = format!("/{dir}/.s.PGSQL.{port}");
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|e| PoolError::Connect {
                host: host.to_string(),
                port,
                source: std::sync::Arc::new(e),
            })?;
        Ok(BackendStream::Unix(stream))
    } else {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| PoolError::Connect {
                host: host.to_string(),
                port,
                source: std::sync::Arc::new(e),
            })?;
        Ok(BackendStream::Tcp(stream))
    }
}

/// Applies the opener's own retry policy: exponential backoff doubling from
/// `INITIAL_RECONNECT_DELAY` up to `MAX_RECONNECT_DELAY`, bounded at
/// `MAX_RECONNECT_ATTEMPTS` tries, mirroring the backoff shape in the
/// teacher's replication worker.
async fn connect_with_retry(host: &str, port: u16, retry: bool) -> Result<BackendStream, PoolError> {
    if !retry {
        return connect_transport(host, port).await;
    }

    let mut delay = INITIAL_RECONNECT_DELAY;
    let mut last_err = None;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match connect_transport(host, port).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(host, port, attempt, error = %e, "backend connect attempt failed");
                last_err = Some(e);
                if attempt < MAX_RECONNECT_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Opens one persistent backend session, following SPEC_FULL.md §4.1 steps
/// 1-10 in order. `tls` requests opportunistic TLS negotiation immediately
/// after the transport connects.
pub async fn open_persistent(
    node_id: usize,
    host: &str,
    port: u16,
    dbname: &str,
    user: &str,
    password: &str,
    retry: bool,
    tls: bool,
    authenticator: &dyn Authenticator,
) -> Result<Slot, PoolError> {
    let guard = ConnectGuard::new(node_id);

    let mut transport = connect_with_retry(host, port, retry).await?;
    info!(node_id, host, port, "connected to backend");

    if tls {
        if let BackendStream::Tcp(tcp) = transport {
            transport = negotiate_tls(tcp, host).await?;
            match &transport {
                BackendStream::Tls(_) => info!(node_id, "TLS negotiated with backend"),
                _ => info!(node_id, "backend refused TLS, continuing in plaintext"),
            }
        } else {
            return Err(PoolError::Tls(
                "TLS negotiation requested over a non-TCP transport".into(),
            ));
        }
    }

    let startup = StartupRecord::build(dbname, user)?;

    let mut frame = Vec::with_capacity(8 + startup.packet_len);
    frame.extend_from_slice(&startup.wire_length_prefix().to_be_bytes());
    frame.extend_from_slice(&crate::core::backend::startup::PROTOCOL_VERSION_3_0.to_be_bytes());
    frame.extend_from_slice(&startup.raw_packet);

    transport.write_all(&frame).await?;
    transport.flush().await?;

    authenticator.authenticate(&mut transport, password).await?;

    guard.disarm();
    Ok(Slot::new(transport, node_id, startup))
}

/// The noerror variant: logs failures instead of propagating them, matching
/// `make_persistent_db_connection_noerror`'s use at call sites that can't
/// themselves fail the surrounding operation.
pub async fn open_persistent_noerror(
    node_id: usize,
    host: &str,
    port: u16,
    dbname: &str,
    user: &str,
    password: &str,
    retry: bool,
    tls: bool,
    authenticator: &dyn Authenticator,
) -> Option<Slot> {
    match open_persistent(node_id, host, port, dbname, user, password, retry, tls, authenticator).await {
        Ok(slot) => Some(slot),
        Err(e) => {
            error!(node_id, host, port, error = %e, "failed to open persistent backend connection");
            None
        }
    }
}
