// tests/handshake_integration_test.rs

//! End-to-end tests driving `open_persistent`/`discard` against a fake
//! in-process backend, the same "spawn a real listener, drive the real
//! client code against it" style used for the host project's own
//! integration tests, adapted to this core's narrower wire surface.

use async_trait::async_trait;
use nodepool::core::backend::{open_persistent, Authenticator, BackendStream, Slot};
use nodepool::core::PoolError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct AcceptingAuthenticator;

#[async_trait]
impl Authenticator for AcceptingAuthenticator {
    async fn authenticate(
        &self,
        transport: &mut BackendStream,
        _password: &str,
    ) -> Result<(), PoolError> {
        // AuthenticationOk: 'R' + len(8) + code(0)
        transport.write_all(b"R").await?;
        transport.write_all(&8u32.to_be_bytes()).await?;
        transport.write_all(&0u32.to_be_bytes()).await?;
        transport.flush().await?;
        Ok(())
    }
}

async fn read_startup_frame(sock: &mut tokio::net::TcpStream) -> (u32, Vec<u8>) {
    let mut header = [0u8; 8];
    sock.read_exact(&mut header).await.unwrap();
    let total_len = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let protover = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let mut payload = vec![0u8; (total_len - 8) as usize];
    sock.read_exact(&mut payload).await.unwrap();
    (protover, payload)
}

#[tokio::test]
async fn opens_authenticates_and_discards_cleanly() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();

        let (protover, payload) = read_startup_frame(&mut sock).await;
        assert_eq!(protover, 0x0003_0000);
        assert_eq!(&payload, b"user\0alice\0database\0appdb\0\0");

        // AuthenticationOk is sent by the authenticator under test, so just
        // wait for the client's terminate frame next.
        let mut term_header = [0u8; 5];
        sock.read_exact(&mut term_header).await.unwrap();
        assert_eq!(term_header[0], b'X');
        assert_eq!(u32::from_be_bytes(term_header[1..5].try_into().unwrap()), 4);
    });

    let slot = open_persistent(
        3,
        &addr.ip().to_string(),
        addr.port(),
        "appdb",
        "alice",
        "hunter2",
        false,
        false,
        &AcceptingAuthenticator,
    )
    .await
    .expect("handshake should succeed against the fake backend");

    assert!(slot.is_open());
    assert_eq!(slot.backend_node_id, 3);
    assert_eq!(slot.startup.database, "appdb");
    assert_eq!(slot.startup.user, "alice");

    slot.discard().await;
    server.await.unwrap();
}

#[tokio::test]
async fn discard_does_not_hang_when_peer_has_already_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let _ = read_startup_frame(&mut sock).await;
        sock.write_all(b"R").await.unwrap();
        sock.write_all(&8u32.to_be_bytes()).await.unwrap();
        sock.write_all(&0u32.to_be_bytes()).await.unwrap();
        sock.flush().await.unwrap();
        // Close immediately, before the client gets a chance to send its
        // terminate frame.
    });

    let slot = open_persistent(
        0,
        &addr.ip().to_string(),
        addr.port(),
        "appdb",
        "alice",
        "hunter2",
        false,
        false,
        &AcceptingAuthenticator,
    )
    .await
    .unwrap();

    server.await.unwrap();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    tokio::time::timeout_at(deadline, slot.discard())
        .await
        .expect("discard must return promptly even against a closed peer");
}
