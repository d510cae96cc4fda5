// src/core/backend/slot.rs

//! `Slot`: an owned handle to one established backend session, and the
//! transport enum it wraps. The `BackendStream` enum and its `AsyncRead`/
//! `AsyncWrite` delegation are grounded on `ReplicaStream` in
//! `src/core/replication/worker.rs`, which abstracts over plain-TCP and
//! TLS-wrapped streams the same way for the replica-to-primary connection.

use crate::core::backend::startup::StartupRecord;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tracing::{debug, warn};

/// The terminate frame is sent best-effort with this timeout, since the peer
/// may already have closed its end (SPEC_FULL.md §9, "non-blocking flush").
const TERMINATE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Abstracts over the concrete transport a `Slot` owns, so the rest of the
/// Opener and the version probe can be generic over plain TCP, Unix-domain,
/// or TLS-wrapped TCP.
pub enum BackendStream {
    Tcp(TcpStream),
    Unix(UnixStream),
    Tls(Box<ClientTlsStream<TcpStream>>),
}

impl AsyncRead for BackendStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Unix(s) => Pin::new(s).poll_flush(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            BackendStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            BackendStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// An owned handle to one established backend session.
///
/// Invariant: the transport is open iff `close_time == 0`. `discard`
/// consumes the `Slot` by value, so once it returns there is no way to
/// observe a `Slot` whose transport has been closed but whose memory is
/// still reachable — the ownership model makes the original's "invariant"
/// unconditional rather than something callers must remember to check.
pub struct Slot {
    transport: BackendStream,
    pub backend_node_id: usize,
    close_time: u64,
    pub startup: StartupRecord,
}

impl Slot {
    pub(crate) fn new(
        transport: BackendStream,
        backend_node_id: usize,
        startup: StartupRecord,
    ) -> Self {
        Self {
            transport,
            backend_node_id,
            close_time: 0,
            startup,
        }
    }

    pub fn is_open(&self) -> bool {
        self.close_time == 0
    }

    /// Exposes the raw transport to `BackendQuerier` implementations, which
    /// need to write and read wire messages directly.
    pub fn transport_mut(&mut self) -> &mut BackendStream {
        &mut self.transport
    }

    /// Sends the graceful terminate frame (`'X'` + big-endian `4`) and
    /// releases the slot. The flush is best-effort and bounded: a peer that
    /// has already closed its side must not be able to wedge this call
    /// (SPEC_FULL.md §4.1, "Discard").
    pub async fn discard(mut self) {
        let result = tokio::time::timeout(TERMINATE_FLUSH_TIMEOUT, async {
            self.transport.write_all(b"X").await?;
            self.transport.write_all(&4u32.to_be_bytes()).await?;
            self.transport.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(node_id = self.backend_node_id, "sent terminate frame"),
            Ok(Err(e)) => {
                warn!(node_id = self.backend_node_id, error = %e, "terminate frame write failed, closing anyway")
            }
            Err(_) => {
                warn!(node_id = self.backend_node_id, "terminate frame flush timed out, closing anyway")
            }
        }

        self.close_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(1);
        // `self` drops here: the transport is closed and all owned memory
        // (the startup packet bytes, the strings) is released.
    }
}
