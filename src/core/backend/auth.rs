// src/core/backend/auth.rs

//! Authentication and opportunistic TLS negotiation, pulled behind traits so
//! the opener is testable against an in-process fake peer (SPEC_FULL.md
//! §10.4) without a real backend.

use crate::core::backend::slot::BackendStream;
use crate::core::errors::PoolError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

/// Performs the backend authentication conversation after the startup
/// packet has been sent. Abstracted so tests can supply a fake that just
/// acknowledges immediately, and so the real implementation can be swapped
/// for cleartext, md5, or SASL without touching the opener (SPEC_FULL.md
/// §4.1 step 10, "delegated").
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        transport: &mut BackendStream,
        password: &str,
    ) -> Result<(), PoolError>;
}

/// Cleartext-password authenticator: sends the password in a `PasswordMessage`
/// ('p' + length + password + NUL) and expects a single `AuthenticationOk`
/// ('R' + length 8 + code 0) in reply. This is the minimum viable exchange;
/// a full client would also dispatch md5/SASL by inspecting the backend's
/// AuthenticationRequest code, which this narrower core does not need.
pub struct CleartextAuthenticator;

#[async_trait]
impl Authenticator for CleartextAuthenticator {
    async fn authenticate(
        &self,
        transport: &mut BackendStream,
        password: &str,
    ) -> Result<(), PoolError> {
        let mut msg = Vec::with_capacity(5 + password.len() + 1);
        let len = (4 + password.len() + 1) as u32;
        msg.push(b'p');
        msg.extend_from_slice(&len.to_be_bytes());
        msg.extend_from_slice(password.as_bytes());
        msg.push(0);
        transport.write_all(&msg).await?;
        transport.flush().await?;

        let mut header = [0u8; 5];
        transport.read_exact(&mut header).await?;
        if header[0] != b'R' {
            return Err(PoolError::Auth(format!(
                "expected AuthenticationOk, got message type {:?}",
                header[0] as char
            )));
        }
        let body_len = u32::from_be_bytes(header[1..5].try_into().unwrap());
        let mut body = vec![0u8; body_len.saturating_sub(4) as usize];
        transport.read_exact(&mut body).await?;
        let code = if body.len() >= 4 {
            u32::from_be_bytes(body[0..4].try_into().unwrap())
        } else {
            return Err(PoolError::Auth("truncated AuthenticationOk".into()));
        };
        if code != 0 {
            return Err(PoolError::Auth(format!(
                "backend requested unsupported authentication method {code}"
            )));
        }
        Ok(())
    }
}

/// The special startup-packet code that asks the backend to switch to TLS
/// before any real startup packet is sent: length 8, then this code, in
/// place of the usual protocol version (see SPEC_FULL.md §4.1 step 5).
const SSL_REQUEST_CODE: u32 = 80_877_103;

/// Wraps a freshly connected TCP stream in an opportunistic TLS session,
/// first performing the PostgreSQL `SSLRequest` exchange: an 8-byte request
/// (length 8 + `SSL_REQUEST_CODE`) followed by the backend's single-byte
/// reply, `'S'` (switch to TLS) or `'N'` (stay plaintext). Skipping straight
/// to a `ClientHello` would read to the backend as a malformed startup
/// packet, since an unmodified PostgreSQL server only expects TLS bytes
/// after it has agreed to them via this reply.
///
/// The TLS setup itself — `rustls::ClientConfig` plus the bundled
/// `webpki-roots` trust anchors — is grounded on the replica-to-primary TLS
/// handshake in the teacher's replication worker.
pub async fn negotiate_tls(mut stream: TcpStream, host: &str) -> Result<BackendStream, PoolError> {
    let mut request = [0u8; 8];
    request[0..4].copy_from_slice(&8u32.to_be_bytes());
    request[4..8].copy_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply).await?;
    match reply[0] {
        b'N' => return Ok(BackendStream::Tcp(stream)),
        b'S' => {}
        other => {
            return Err(PoolError::Tls(format!(
                "unexpected SSLRequest reply byte {:?}",
                other as char
            )))
        }
    }

    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let domain = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| PoolError::Tls(format!("invalid TLS domain name {host:?}")))?;

    let tls_stream = connector
        .connect(domain, stream)
        .await
        .map_err(|e| PoolError::Tls(format!("TLS handshake failed: {e}")))?;

    Ok(BackendStream::Tls(Box::new(tls_stream)))
}
