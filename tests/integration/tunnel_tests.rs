//! Encrypted tunnel integration tests
//!
//! client -> local (SOCKS5 + tunnel upstream) -> relay server -> echo

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use socksveil::config::Config;
use socksveil::connection::Socks5Acceptor;
use socksveil::crypto::{CipherContext, CipherMethod, CryptoStream, IvMode};
use socksveil::protocol::{Destination, Packet, RelayRequest};
use socksveil::proxy::DirectUpstream;
use socksveil::shadowsocks::{RelayAcceptor, TunnelUpstream};
use socksveil::{Server, Service, SocksClient};

async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn start(service: Service) -> (Server, SocketAddr) {
    let server = Server::new(vec!["127.0.0.1:0".parse().unwrap()], service)
        .with_kill_timeout(Duration::from_secs(1));
    let addrs = server.start().await.unwrap();
    (server, addrs[0])
}

async fn tunnel_pair(cipher: CipherContext) -> (Server, Server, String) {
    let (relay, relay_addr) = start(Service::new(
        RelayAcceptor::new(cipher.clone()),
        DirectUpstream::default(),
    ))
    .await;
    let (local, local_addr) = start(Service::new(
        Socks5Acceptor::new(),
        TunnelUpstream::new(relay_addr.to_string(), cipher),
    ))
    .await;
    (relay, local, local_addr.to_string())
}

#[tokio::test]
async fn test_tunnel_echo_every_method() {
    let echo = spawn_echo().await;

    for method in CipherMethod::ALL {
        let cipher = CipherContext::new(method, "tunnel-secret");
        let (relay, local, proxy) = tunnel_pair(cipher).await;

        let mut stream = SocksClient::new(proxy)
            .connect(Destination::from(echo))
            .await
            .unwrap();

        let payload: Vec<u8> = (0..16_384u32).map(|i| (i % 241) as u8).collect();
        stream.write_all(&payload).await.unwrap();
        let mut received = vec![0u8; payload.len()];
        stream.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload, "{method}");

        drop(stream);
        local.close().await;
        relay.close().await;
    }
}

#[tokio::test]
async fn test_derived_iv_tunnel() {
    let echo = spawn_echo().await;
    let cipher =
        CipherContext::new(CipherMethod::Aes256Cfb, "legacy").with_iv_mode(IvMode::Derived);
    let (relay, local, proxy) = tunnel_pair(cipher).await;

    let mut stream = SocksClient::new(proxy)
        .connect(Destination::from(echo))
        .await
        .unwrap();
    stream.write_all(b"derived").await.unwrap();
    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"derived");

    local.close().await;
    relay.close().await;
}

#[tokio::test]
async fn test_relay_with_raw_crypto_stream() {
    let echo = spawn_echo().await;
    let cipher = CipherContext::new(CipherMethod::Aes128Ctr, "raw");
    let (relay, relay_addr) = start(Service::new(
        RelayAcceptor::new(cipher.clone()),
        DirectUpstream::default(),
    ))
    .await;

    let socket = TcpStream::connect(relay_addr).await.unwrap();
    let mut tunnel = CryptoStream::new(socket, &cipher).unwrap();

    // Header and payload in one write
    let mut first = Packet::from(RelayRequest {
        destination: Destination::from(echo),
    })
    .to_bytes()
    .unwrap()
    .to_vec();
    first.extend_from_slice(b"pipelined");
    tunnel.write_all(&first).await.unwrap();

    let mut buf = [0u8; 9];
    tunnel.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pipelined");
    relay.close().await;
}

#[tokio::test]
async fn test_wrong_password_never_establishes() {
    let (relay, relay_addr) = start(Service::new(
        RelayAcceptor::new(CipherContext::new(CipherMethod::Aes256Cfb, "right"))
            .with_idle_timeout(Duration::from_millis(200)),
        DirectUpstream::new(Duration::from_millis(200)),
    ))
    .await;

    let socket = TcpStream::connect(relay_addr).await.unwrap();
    let wrong = CipherContext::new(CipherMethod::Aes256Cfb, "wrong");
    let mut tunnel = CryptoStream::new(socket, &wrong).unwrap();
    let header = Packet::from(RelayRequest {
        destination: Destination::domain("example.org", 80),
    })
    .to_bytes()
    .unwrap();
    tunnel.write_all(&header).await.unwrap();

    // The garbled header fails to decode, stalls until the idle timeout or
    // names an unreachable destination
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), tunnel.read_to_end(&mut rest)).await;
    assert!(read.is_ok());
    assert_eq!(relay.connection_count(), 0);
    relay.close().await;
}

#[tokio::test]
async fn test_servers_from_config() {
    let echo = spawn_echo().await;

    let relay_config = Config::parse(
        r#"
        [server]
        mode = "server"
        bind_addr = "127.0.0.1:0"

        [shadowsocks]
        password = "configured"
        method = "aes-192-cfb"
        "#,
    )
    .unwrap();
    let relay = Server::from_config(&relay_config).unwrap();
    let relay_addr = relay.start().await.unwrap()[0];

    let local_config = Config::parse(&format!(
        r#"
        [server]
        mode = "local"
        bind_addr = "127.0.0.1:0"

        [[auth.users]]
        username = "alice"
        password = "wonderland"

        [shadowsocks]
        remote_addr = "{relay_addr}"
        password = "configured"
        method = "aes-192-cfb"
        "#
    ))
    .unwrap();
    let local = Server::from_config(&local_config).unwrap();
    let local_addr = local.start().await.unwrap()[0];

    let mut stream = SocksClient::new(local_addr.to_string())
        .with_credentials("alice", "wonderland")
        .connect(Destination::from(echo))
        .await
        .unwrap();
    stream.write_all(b"configured").await.unwrap();
    let mut buf = [0u8; 10];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"configured");

    local.close().await;
    relay.close().await;
}
