//! Direct upstream dialing

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::connection::{BoxedStream, Upstream};
use crate::error::{Result, SocksError};
use crate::protocol::Destination;
use crate::util::configure_stream;

/// Default bound on dialing a destination
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect to `addr` within `limit`, attributing failures to `label`
pub(crate) async fn dial(addr: (&str, u16), limit: Duration, label: &str) -> Result<TcpStream> {
    let stream = match timeout(limit, TcpStream::connect(addr)).await {
        Err(_) => return Err(SocksError::ConnectTimeout(limit)),
        Ok(Err(source)) => {
            return Err(SocksError::Upstream {
                destination: label.to_owned(),
                source,
            })
        }
        Ok(Ok(stream)) => stream,
    };
    configure_stream(&stream)?;
    Ok(stream)
}

/// Opens destinations with a plain TCP connect
#[derive(Debug, Clone)]
pub struct DirectUpstream {
    connect_timeout: Duration,
}

impl Default for DirectUpstream {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl DirectUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Upstream for DirectUpstream {
    async fn connect(&self, destination: &Destination) -> Result<BoxedStream> {
        let host = destination.host();
        let label = destination.to_string();
        let stream = dial((host.as_str(), destination.port), self.connect_timeout, &label).await?;
        debug!(destination = %label, "Destination connected");
        Ok(Box::new(stream))
    }
}
