//! Bidirectional relay between an established client and its destination

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::metrics::METRICS;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Client to destination
    Inbound,
    /// Destination to client
    Outbound,
}

async fn relay<R, W>(mut from: R, mut to: W, direction: Direction) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        to.write_all(&buf[..n]).await?;
        // Buffering writers (the cipher stream) may still hold part of the chunk
        to.flush().await?;
        total += n as u64;
        match direction {
            Direction::Inbound => METRICS.bytes_rx(n as u64),
            Direction::Outbound => METRICS.bytes_tx(n as u64),
        }
    }

    // Propagate the half-close
    to.shutdown().await?;
    Ok(total)
}

/// Copy bytes both ways until each side has closed. Returns
/// `(client_to_destination, destination_to_client)` byte counts.
pub async fn splice<A, B>(client: A, destination: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (dest_read, dest_write) = tokio::io::split(destination);

    let (rx_bytes, tx_bytes) = tokio::try_join!(
        relay(client_read, dest_write, Direction::Inbound),
        relay(dest_read, client_write, Direction::Outbound),
    )?;

    debug!(rx_bytes, tx_bytes, "Relay completed");
    Ok((rx_bytes, tx_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_splice_relays_both_ways() {
        let (client, mut client_peer) = tokio::io::duplex(1024);
        let (dest, mut dest_peer) = tokio::io::duplex(1024);

        let relay = tokio::spawn(splice(client, dest));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        dest_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        dest_peer.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        client_peer.shutdown().await.unwrap();
        let mut rest = Vec::new();
        dest_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        dest_peer.shutdown().await.unwrap();

        let (rx, tx) = relay.await.unwrap().unwrap();
        assert_eq!((rx, tx), (4, 5));
    }

    #[tokio::test]
    async fn test_flushes_buffered_tunnel_writes() {
        use crate::crypto::{CipherContext, CipherMethod, CryptoStream};
        use std::time::Duration;

        let cipher = CipherContext::new(CipherMethod::Aes256Cfb, "backpressure");
        let (client, mut client_peer) = tokio::io::duplex(4096);
        let (near, far) = tokio::io::duplex(64);
        let tunnel = CryptoStream::new(near, &cipher).unwrap();
        let mut far = CryptoStream::new(far, &cipher).unwrap();

        tokio::spawn(splice(client, tunnel));

        // The client stays open after writing
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        client_peer.write_all(&payload).await.unwrap();

        let mut received = vec![0u8; payload.len()];
        tokio::time::timeout(Duration::from_secs(2), far.read_exact(&mut received))
            .await
            .expect("relay stalled with ciphertext buffered")
            .unwrap();
        assert_eq!(received, payload);
    }
}
