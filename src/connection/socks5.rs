//! Server-role SOCKS5 negotiation
//!
//! `Handshake -> (Auth) -> Connect`, after which the codec is detached and
//! the client socket is handed back for relaying.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::{Acceptor, Negotiated};
use crate::auth::Authenticator;
use crate::error::{ProtocolError, Result, SocksError};
use crate::metrics::METRICS;
use crate::protocol::codec::{framed, into_raw, read_expected};
use crate::protocol::consts::*;
use crate::protocol::{
    AuthRequest, AuthResponse, ConnectRequest, ConnectResponse, Destination, HandshakeRequest,
    HandshakeResponse, keys, MessageKind, Packet, PacketDecoder, SocksCodec, DEFAULT_WRITE_WATERMARK,
};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type SocksFramed = Framed<TcpStream, SocksCodec>;

#[derive(Clone)]
pub struct Socks5Acceptor {
    authenticator: Option<Arc<dyn Authenticator>>,
    idle_timeout: Duration,
    write_watermark: usize,
}

impl Default for Socks5Acceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Socks5Acceptor {
    pub fn new() -> Self {
        Self {
            authenticator: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            write_watermark: DEFAULT_WRITE_WATERMARK,
        }
    }

    /// Require username/password authentication
    pub fn with_authenticator(self, authenticator: impl Authenticator) -> Self {
        self.with_shared_authenticator(Arc::new(authenticator))
    }

    pub fn with_shared_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_write_watermark(mut self, write_watermark: usize) -> Self {
        self.write_watermark = write_watermark;
        self
    }

    fn select_method(&self, offered: &[u8]) -> u8 {
        match &self.authenticator {
            Some(_) if offered.contains(&METHOD_USER_PASS) => METHOD_USER_PASS,
            None if offered.contains(&METHOD_NO_AUTH) => METHOD_NO_AUTH,
            _ => METHOD_NO_ACCEPTABLE,
        }
    }

    async fn next<M>(&self, framed: &mut SocksFramed) -> Result<M>
    where
        M: TryFrom<Packet, Error = Packet>,
    {
        read_expected(framed, Some(self.idle_timeout)).await
    }

    async fn handshake(&self, framed: &mut SocksFramed, peer: SocketAddr) -> Result<()> {
        let HandshakeRequest { methods } = match self.next(framed).await {
            Ok(request) => request,
            Err(e) => {
                if is_socks4(&e) {
                    warn!(%peer, "Rejecting SOCKS4 client");
                }
                return Err(e);
            }
        };

        let method = self.select_method(&methods);
        framed.send(Packet::from(HandshakeResponse { method })).await?;

        match method {
            METHOD_NO_AUTH => {
                framed.codec_mut().decoder_mut().expect(MessageKind::ConnectRequest);
                Ok(())
            }
            METHOD_USER_PASS => {
                framed.codec_mut().decoder_mut().expect(MessageKind::AuthRequest);
                self.authenticate(framed, peer).await?;
                framed.codec_mut().decoder_mut().expect(MessageKind::ConnectRequest);
                Ok(())
            }
            _ => {
                METRICS.auth_rejected();
                warn!(%peer, offered = ?methods, "No acceptable authentication method");
                Err(SocksError::HandshakeRejected)
            }
        }
    }

    async fn authenticate(&self, framed: &mut SocksFramed, peer: SocketAddr) -> Result<()> {
        let AuthRequest { username, password } = self.next(framed).await?;

        let accepted = match &self.authenticator {
            Some(authenticator) => {
                authenticator
                    .authenticate(&username, &password, framed.get_ref())
                    .await
            }
            None => false,
        };

        let status = if accepted { AUTH_SUCCEEDED } else { AUTH_FAILED };
        framed.send(Packet::from(AuthResponse { status })).await?;

        if !accepted {
            METRICS.auth_rejected();
            warn!(%peer, %username, "Authentication rejected");
            return Err(SocksError::AuthRejected { status });
        }
        debug!(%peer, %username, "Authenticated");
        Ok(())
    }

    async fn connect_request(&self, framed: &mut SocksFramed, peer: SocketAddr) -> Result<Destination> {
        let ConnectRequest {
            command,
            destination,
        } = self.next(framed).await?;

        if command != CMD_CONNECT {
            framed
                .send(Packet::from(ConnectResponse {
                    reply: REP_COMMAND_NOT_SUPPORTED,
                    bind: Destination::unspecified(),
                }))
                .await?;
            warn!(%peer, command, "Unsupported command");
            return Err(SocksError::CommandNotSupported(command));
        }

        framed
            .send(Packet::from(ConnectResponse {
                reply: REP_SUCCEEDED,
                bind: Destination::unspecified(),
            }))
            .await?;
        Ok(destination)
    }
}

fn is_socks4(error: &SocksError) -> bool {
    matches!(
        error,
        SocksError::Protocol(ProtocolError::InvalidValue { field, value })
            if *field == keys::VERSION && *value == u16::from(SOCKS_V4)
    )
}

#[async_trait]
impl Acceptor for Socks5Acceptor {
    async fn negotiate(&self, stream: TcpStream, peer: SocketAddr) -> Result<Negotiated> {
        let mut framed = framed(
            stream,
            PacketDecoder::group([MessageKind::HandshakeRequest]),
            self.write_watermark,
        );

        self.handshake(&mut framed, peer).await?;
        let destination = self.connect_request(&mut framed, peer).await?;
        debug!(%peer, %destination, "SOCKS5 negotiation complete");

        let (stream, remainder) = into_raw(framed);
        Ok(Negotiated {
            client: Box::new(stream),
            destination,
            remainder,
        })
    }
}
