//! Server role: decrypt the relay header and open the destination

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::connection::{Acceptor, Negotiated};
use crate::crypto::{CipherContext, CryptoStream};
use crate::error::{Result, SocksError};
use crate::metrics::METRICS;
use crate::protocol::codec::{framed, into_raw, read_expected};
use crate::protocol::{MessageKind, PacketDecoder, RelayRequest, DEFAULT_WRITE_WATERMARK};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Accepts encrypted tunnel connections
#[derive(Debug, Clone)]
pub struct RelayAcceptor {
    cipher: CipherContext,
    idle_timeout: Duration,
    write_watermark: usize,
}

impl RelayAcceptor {
    pub fn new(cipher: CipherContext) -> Self {
        Self {
            cipher,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            write_watermark: DEFAULT_WRITE_WATERMARK,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_write_watermark(mut self, write_watermark: usize) -> Self {
        self.write_watermark = write_watermark;
        self
    }
}

#[async_trait]
impl Acceptor for RelayAcceptor {
    async fn negotiate(&self, stream: TcpStream, peer: SocketAddr) -> Result<Negotiated> {
        let tunnel = CryptoStream::new(stream, &self.cipher)?;
        let mut framed = framed(
            tunnel,
            PacketDecoder::single(MessageKind::RelayRequest),
            self.write_watermark,
        );

        let destination = match read_expected(&mut framed, Some(self.idle_timeout)).await {
            Ok(RelayRequest { destination }) => destination,
            Err(SocksError::Protocol(e)) => {
                METRICS.relay_rejected();
                warn!(%peer, error = %e, "Undecodable relay header, wrong password?");
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };
        debug!(%peer, %destination, method = %self.cipher.method(), "Relay request decoded");

        let (tunnel, remainder) = into_raw(framed);
        Ok(Negotiated {
            client: Box::new(tunnel),
            destination,
            remainder,
        })
    }
}
