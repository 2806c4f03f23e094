//! Local role: the tunnel as an upstream of the SOCKS5 front

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::connection::{BoxedStream, Upstream};
use crate::crypto::{CipherContext, CryptoStream};
use crate::error::Result;
use crate::metrics::METRICS;
use crate::protocol::{Destination, Packet, RelayRequest};
use crate::proxy::{dial, DEFAULT_CONNECT_TIMEOUT};

/// Dials the relay server and opens each destination through it
#[derive(Debug, Clone)]
pub struct TunnelUpstream {
    remote: String,
    cipher: CipherContext,
    connect_timeout: Duration,
}

impl TunnelUpstream {
    /// `remote` is the relay's `host:port`
    pub fn new(remote: impl Into<String>, cipher: CipherContext) -> Self {
        Self {
            remote: remote.into(),
            cipher,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    fn remote_parts(&self) -> Result<(&str, u16)> {
        split_host_port(&self.remote)
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts
pub(crate) fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let invalid = || crate::error::ProtocolError::InvalidAddress(addr.to_owned());
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid().into());
    }
    Ok((host, port))
}

#[async_trait]
impl Upstream for TunnelUpstream {
    async fn connect(&self, destination: &Destination) -> Result<BoxedStream> {
        let stream = dial(self.remote_parts()?, self.connect_timeout, &self.remote).await?;
        let mut tunnel = CryptoStream::new(stream, &self.cipher)?;

        let header = Packet::from(RelayRequest {
            destination: destination.clone(),
        })
        .to_bytes()?;
        tunnel.write_all(&header).await?;
        tunnel.flush().await?;
        METRICS.tunnel_opened();

        debug!(remote = %self.remote, %destination, "Tunnel opened");
        Ok(Box::new(tunnel))
    }
}
