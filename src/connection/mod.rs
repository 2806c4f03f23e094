//! Connection management
//!
//! A connection negotiates with its client through an [`Acceptor`], opens
//! the agreed destination through an [`Upstream`], then splices the two.
//! Closing drops the connection future, which releases the client socket,
//! codec, cipher endpoints and destination together.

mod handle;
mod manager;
pub mod socks5;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};

pub use handle::{ConnectionEvent, ConnectionHandle};
pub use manager::ConnectionManager;
pub use socks5::Socks5Acceptor;
pub use state::{ConnectionId, ConnectionPhase, ConnectionState};

use crate::error::Result;
use crate::metrics::METRICS;
use crate::protocol::Destination;
use crate::proxy::splice;

/// Byte stream usable on either side of a splice
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Outcome of a successful negotiation
pub struct Negotiated {
    /// Client side, ready for raw relaying
    pub client: BoxedStream,
    pub destination: Destination,
    /// Client bytes read past the last negotiation message
    pub remainder: Bytes,
}

/// Server-side negotiation of an accepted socket
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    async fn negotiate(&self, stream: TcpStream, peer: SocketAddr) -> Result<Negotiated>;
}

/// Opens the destination a client asked for
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn connect(&self, destination: &Destination) -> Result<BoxedStream>;
}

/// One accepted client, driven to completion by [`Connection::run`]
pub struct Connection {
    handle: ConnectionHandle,
    acceptor: Arc<dyn Acceptor>,
    upstream: Arc<dyn Upstream>,
    live: Arc<ConnectionManager>,
    close_rx: watch::Receiver<bool>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Connection {
    pub fn new(
        handle: ConnectionHandle,
        acceptor: Arc<dyn Acceptor>,
        upstream: Arc<dyn Upstream>,
        live: Arc<ConnectionManager>,
    ) -> Self {
        let close_rx = handle.close_requested();
        let shutdown_rx = live.subscribe_shutdown();
        Self {
            handle,
            acceptor,
            upstream,
            live,
            close_rx,
            shutdown_rx,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Negotiate, establish, relay. Returns the establishment failure, or
    /// the relay failure of an established connection.
    pub async fn run(mut self, stream: TcpStream) -> Result<()> {
        let result = {
            let drive = Self::drive(&self.handle, &*self.acceptor, &*self.upstream, &self.live, stream);
            tokio::select! {
                result = drive => result,
                _ = self.close_rx.wait_for(|requested| *requested) => Ok(()),
                _ = self.shutdown_rx.recv() => Ok(()),
            }
        };

        self.live.remove(&self.handle);
        self.handle.finish(&result);
        result
    }

    async fn drive(
        handle: &ConnectionHandle,
        acceptor: &dyn Acceptor,
        upstream: &dyn Upstream,
        live: &ConnectionManager,
        stream: TcpStream,
    ) -> Result<()> {
        let Negotiated {
            mut client,
            destination,
            remainder,
        } = acceptor.negotiate(stream, handle.peer()).await?;

        handle.established(&destination);
        live.insert(handle.clone());

        let mut remote = upstream.connect(&destination).await?;
        if !remainder.is_empty() {
            remote.write_all(&remainder).await?;
            METRICS.bytes_rx(remainder.len() as u64);
            handle.record_traffic(remainder.len() as u64, 0);
        }

        let (rx, tx) = splice(&mut client, &mut remote).await?;
        handle.record_traffic(rx, tx);
        Ok(())
    }
}
