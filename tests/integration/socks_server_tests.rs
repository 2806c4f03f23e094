//! SOCKS5 server integration tests
//!
//! Each test starts a server on a loopback port and drives it with
//! `SocksClient` against a local echo destination.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use socksveil::auth::StaticUsers;
use socksveil::connection::{Acceptor, ConnectionEvent, Negotiated, Socks5Acceptor};
use socksveil::protocol::Destination;
use socksveil::proxy::DirectUpstream;
use socksveil::{Server, Service, SocksClient, SocksError};

/// Echo every byte back until the peer closes
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn start_server(acceptor: Socks5Acceptor) -> (Server, String) {
    let server = Server::new(
        vec!["127.0.0.1:0".parse().unwrap()],
        Service::new(acceptor, DirectUpstream::default()),
    )
    .with_kill_timeout(Duration::from_secs(1));
    let addrs = server.start().await.unwrap();
    (server, addrs[0].to_string())
}

async fn wait_for_count(server: &Server, expected: usize) {
    for _ in 0..100 {
        if server.connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} live connections, found {}",
        server.connection_count()
    );
}

#[tokio::test]
async fn test_no_auth_echo() {
    let echo = spawn_echo().await;
    let (server, proxy) = start_server(Socks5Acceptor::new()).await;

    let mut stream = SocksClient::new(proxy)
        .connect(Destination::from(echo))
        .await
        .unwrap();

    stream.write_all(b"hello through socks").await.unwrap();
    let mut buf = [0u8; 19];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello through socks");

    wait_for_count(&server, 1).await;
    drop(stream);
    wait_for_count(&server, 0).await;
    server.close().await;
}

#[tokio::test]
async fn test_pipelined_payload_is_forwarded() {
    let echo = spawn_echo().await;
    let (server, proxy) = start_server(Socks5Acceptor::new()).await;

    // Handshake, connect request and payload in a single write
    let mut raw = TcpStream::connect(&proxy).await.unwrap();
    let mut request = vec![0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
    request.extend_from_slice(&echo.port().to_be_bytes());
    request.extend_from_slice(b"early");
    raw.write_all(&request).await.unwrap();

    let mut replies = [0u8; 2 + 10];
    raw.read_exact(&mut replies).await.unwrap();
    assert_eq!(&replies[..2], &[0x05, 0x00]);
    assert_eq!(&replies[2..4], &[0x05, 0x00]);

    let mut echoed = [0u8; 5];
    raw.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"early");
    server.close().await;
}

#[tokio::test]
async fn test_auth_success() {
    let echo = spawn_echo().await;
    let acceptor =
        Socks5Acceptor::new().with_authenticator(StaticUsers::new().with_user("alice", "wonderland"));
    let (server, proxy) = start_server(acceptor).await;

    let mut stream = SocksClient::new(proxy)
        .with_credentials("alice", "wonderland")
        .connect(Destination::from(echo))
        .await
        .unwrap();

    stream.write_all(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");
    server.close().await;
}

#[tokio::test]
async fn test_auth_rejects_missing_credentials() {
    let acceptor =
        Socks5Acceptor::new().with_authenticator(StaticUsers::new().with_user("alice", "wonderland"));
    let (server, proxy) = start_server(acceptor).await;

    let err = SocksClient::new(proxy)
        .connect(Destination::domain("example.org", 80))
        .await
        .unwrap_err();

    assert!(matches!(err, SocksError::AuthRejected { status: 0xff }));
    assert_eq!(err.code(), "SOCKS_AUTH_REJECTED");
    assert_eq!(server.connection_count(), 0);
    server.close().await;
}

#[tokio::test]
async fn test_closure_authenticator_sees_socket() {
    let echo = spawn_echo().await;
    let acceptor = Socks5Acceptor::new().with_authenticator(
        |user: &str, _pass: &str, socket: &TcpStream| {
            user == "local" && socket.peer_addr().map(|a| a.ip().is_loopback()).unwrap_or(false)
        },
    );
    let (server, proxy) = start_server(acceptor).await;

    let stream = SocksClient::new(proxy)
        .with_credentials("local", "")
        .connect(Destination::from(echo))
        .await;
    assert!(stream.is_ok());
    server.close().await;
}

#[tokio::test]
async fn test_no_acceptable_method() {
    let (server, proxy) = start_server(Socks5Acceptor::new()).await;

    let mut raw = TcpStream::connect(&proxy).await.unwrap();
    raw.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut reply = [0u8; 2];
    raw.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0xff]);

    // Server closes after rejecting
    let mut rest = Vec::new();
    raw.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    server.close().await;
}

#[tokio::test]
async fn test_bind_command_not_supported() {
    let (server, proxy) = start_server(Socks5Acceptor::new()).await;

    let err = SocksClient::new(proxy)
        .with_command(0x02)
        .connect(Destination::domain("example.org", 80))
        .await
        .unwrap_err();
    assert!(matches!(err, SocksError::ConnectionRejected { reply: 0x07 }));
    server.close().await;
}

#[tokio::test]
async fn test_idle_timeout_during_negotiation() {
    let (server, proxy) =
        start_server(Socks5Acceptor::new().with_idle_timeout(Duration::from_millis(100))).await;

    let mut raw = TcpStream::connect(&proxy).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), raw.read_to_end(&mut buf)).await;
    assert!(read.is_ok(), "server should drop an idle client");
    assert!(buf.is_empty());
    server.close().await;
}

#[tokio::test]
async fn test_idempotent_connection_close() {
    let echo = spawn_echo().await;
    let (server, proxy) = start_server(Socks5Acceptor::new()).await;

    let _stream = SocksClient::new(proxy)
        .connect(Destination::from(echo))
        .await
        .unwrap();
    wait_for_count(&server, 1).await;

    let key = server.connections().keys().remove(0);
    let handle = server.connections().get(&key).unwrap();
    let mut events = handle.subscribe();

    handle.close().await;
    handle.close().await;

    assert!(handle.is_closed());
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Closed);
    assert!(events.try_recv().is_err());
    assert_eq!(server.connection_count(), 0);
    server.close().await;
}

#[tokio::test]
async fn test_server_close_stops_everything() {
    let echo = spawn_echo().await;
    let (server, proxy) = start_server(Socks5Acceptor::new()).await;

    let mut stream = SocksClient::new(proxy.clone())
        .connect(Destination::from(echo))
        .await
        .unwrap();
    wait_for_count(&server, 1).await;

    server.close().await;
    server.close().await;
    assert_eq!(server.connection_count(), 0);

    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
    assert!(read.is_ok());

    let reconnect = tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(&proxy)).await;
    assert!(!matches!(reconnect, Ok(Ok(_))));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (server, _proxy) = start_server(Socks5Acceptor::new()).await;
    let first = server.local_addrs();
    let second = server.start().await.unwrap();
    assert_eq!(first, second);
    assert_ne!(first[0].port(), 0);
    server.close().await;
}

/// Sets its flag when the negotiation future is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Never finishes negotiating
struct StallingAcceptor {
    entered: Arc<Notify>,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Acceptor for StallingAcceptor {
    async fn negotiate(&self, _stream: TcpStream, _peer: SocketAddr) -> socksveil::error::Result<Negotiated> {
        let _flag = DropFlag(self.dropped.clone());
        self.entered.notify_one();
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_close_waits_for_negotiating_connections() {
    let entered = Arc::new(Notify::new());
    let dropped = Arc::new(AtomicBool::new(false));
    let server = Server::new(
        vec!["127.0.0.1:0".parse().unwrap()],
        Service::new(
            StallingAcceptor {
                entered: entered.clone(),
                dropped: dropped.clone(),
            },
            DirectUpstream::default(),
        ),
    )
    .with_kill_timeout(Duration::from_secs(1));
    let addrs = server.start().await.unwrap();

    let mut client = TcpStream::connect(addrs[0]).await.unwrap();
    entered.notified().await;
    assert_eq!(server.connection_count(), 0);

    server.close().await;
    assert!(dropped.load(Ordering::SeqCst), "close returned before the negotiating task ended");

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}

/// Requires outbound network access
#[tokio::test]
async fn test_example_org_through_proxy() {
    if std::env::var("TEST_WITH_NETWORK").is_err() {
        return;
    }

    let (server, proxy) = start_server(Socks5Acceptor::new()).await;
    let mut stream = SocksClient::new(proxy)
        .connect(Destination::domain("example.org", 80))
        .await
        .unwrap();

    stream
        .write_all(b"GET / HTTP/1.0\r\nHost: example.org\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("Content-Type:"));
    server.close().await;
}
