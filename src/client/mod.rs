//! Client-role SOCKS5
//!
//! `Connecting -> HandshakeSent -> (AuthSent) -> ConnectSent -> Established`.
//! On success the socket, with any bytes the proxy pipelined behind its
//! reply, is returned as a [`ProxyStream`].

mod stream;

use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

pub use stream::ProxyStream;

use crate::error::{Result, SocksError};
use crate::protocol::codec::{framed, into_raw, read_expected};
use crate::protocol::consts::*;
use crate::protocol::{
    AuthRequest, AuthResponse, ConnectRequest, ConnectResponse, Destination, HandshakeRequest,
    HandshakeResponse, MessageKind, Packet, PacketDecoder, SocksCodec, DEFAULT_WRITE_WATERMARK,
};
use crate::proxy::{dial, DEFAULT_CONNECT_TIMEOUT};
use crate::shadowsocks::split_host_port;

/// Client negotiation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Connecting,
    HandshakeSent,
    AuthSent,
    ConnectSent,
    Established,
}

/// Opens connections through a SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct SocksClient {
    proxy: String,
    credentials: Option<(String, String)>,
    command: u8,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    write_watermark: usize,
}

impl SocksClient {
    /// `proxy` is the proxy's `host:port`
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
            credentials: None,
            command: CMD_CONNECT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: None,
            write_watermark: DEFAULT_WRITE_WATERMARK,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Bound on the TCP connect to the proxy only
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Bound on each wait for a proxy reply
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Command byte of the connect request. Only CONNECT yields a stream.
    pub fn with_command(mut self, command: u8) -> Self {
        self.command = command;
        self
    }

    /// Dial the proxy and negotiate a connection to `destination`
    pub async fn connect(&self, destination: Destination) -> Result<ProxyStream<TcpStream>> {
        trace!(proxy = %self.proxy, phase = ?ClientPhase::Connecting, "Dialing proxy");
        let stream = dial(split_host_port(&self.proxy)?, self.connect_timeout, &self.proxy).await?;
        self.connect_with(stream, destination).await
    }

    /// Negotiate over an already connected socket
    pub async fn connect_with<S>(&self, stream: S, destination: Destination) -> Result<ProxyStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = framed(
            stream,
            PacketDecoder::group([MessageKind::HandshakeResponse]),
            self.write_watermark,
        );

        framed
            .send(Packet::from(HandshakeRequest {
                methods: vec![METHOD_NO_AUTH, METHOD_USER_PASS],
            }))
            .await?;
        trace!(phase = ?ClientPhase::HandshakeSent);

        let HandshakeResponse { method } = self.next(&mut framed).await?;

        match method {
            METHOD_NO_AUTH => {}
            METHOD_USER_PASS => self.authenticate(&mut framed).await?,
            other => return Err(SocksError::UnknownAuthType(other)),
        }

        framed.codec_mut().decoder_mut().expect(MessageKind::ConnectResponse);
        framed
            .send(Packet::from(ConnectRequest {
                command: self.command,
                destination: destination.clone(),
            }))
            .await?;
        trace!(phase = ?ClientPhase::ConnectSent);

        let response: ConnectResponse = self.next(&mut framed).await?;
        if response.reply != REP_SUCCEEDED {
            return Err(SocksError::ConnectionRejected {
                reply: response.reply,
            });
        }
        if self.command != CMD_CONNECT {
            return Err(SocksError::CommandNotSupported(self.command));
        }

        let (stream, remainder) = into_raw(framed);
        debug!(%destination, bind = %response.bind, phase = ?ClientPhase::Established, "Proxy connection established");
        Ok(ProxyStream::new(stream, remainder, response.bind))
    }

    async fn authenticate<S>(&self, framed: &mut Framed<S, SocksCodec>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (username, password) = self.credentials.clone().unwrap_or_default();
        framed.codec_mut().decoder_mut().expect(MessageKind::AuthResponse);
        framed
            .send(Packet::from(AuthRequest { username, password }))
            .await?;
        trace!(phase = ?ClientPhase::AuthSent);

        let AuthResponse { status } = self.next(framed).await?;
        if status != AUTH_SUCCEEDED {
            return Err(SocksError::AuthRejected { status });
        }
        Ok(())
    }

    async fn next<S, M>(&self, framed: &mut Framed<S, SocksCodec>) -> Result<M>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        M: TryFrom<Packet, Error = Packet>,
    {
        read_expected(framed, self.idle_timeout).await
    }
}
