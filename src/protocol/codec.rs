//! Framed codec
//!
//! Joins [`PacketDecoder`] and [`PacketEncoder`] for use with
//! `tokio_util::codec::Framed`. The framed write buffer is the ordered send
//! queue and its backpressure boundary is the write watermark.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::decoder::{DecodeEvent, PacketDecoder};
use super::encoder::PacketEncoder;
use super::packet::Packet;
use crate::error::{ProtocolError, SocksError};

#[derive(Debug)]
pub struct SocksCodec {
    decoder: PacketDecoder,
    encoder: PacketEncoder,
}

impl SocksCodec {
    pub fn new(decoder: PacketDecoder) -> Self {
        Self {
            decoder,
            encoder: PacketEncoder::new(),
        }
    }

    pub fn decoder(&self) -> &PacketDecoder {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut PacketDecoder {
        &mut self.decoder
    }
}

impl Decoder for SocksCodec {
    type Item = DecodeEvent;
    type Error = SocksError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodeEvent>, SocksError> {
        self.decoder.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<DecodeEvent>, SocksError> {
        self.decoder.decode_eof(src)
    }
}

impl Encoder<Packet> for SocksCodec {
    type Error = SocksError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), SocksError> {
        self.encoder.encode(packet, dst)
    }
}

/// Wrap `io` in a packet codec
pub fn framed<T>(io: T, decoder: PacketDecoder, write_watermark: usize) -> Framed<T, SocksCodec>
where
    T: AsyncRead + AsyncWrite,
{
    let mut framed = Framed::new(io, SocksCodec::new(decoder));
    framed.set_backpressure_boundary(write_watermark);
    framed
}

/// Wait for the next message, optionally bounded by an idle timeout
pub async fn read_message<T>(
    framed: &mut Framed<T, SocksCodec>,
    idle: Option<Duration>,
) -> Result<Packet, SocksError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let next = match idle {
        Some(limit) => timeout(limit, framed.next())
            .await
            .map_err(|_| SocksError::IdleTimeout(limit))?,
        None => framed.next().await,
    };

    match next {
        Some(Ok(DecodeEvent::Message(packet))) => Ok(packet),
        Some(Ok(DecodeEvent::Exhausted(_))) => Err(ProtocolError::Exhausted.into()),
        Some(Err(e)) => Err(e),
        None => Err(SocksError::SocketClosed),
    }
}

/// [`read_message`] narrowed to one packet type. The decoder only yields
/// the kind it was told to expect, so a mismatch means the caller and the
/// decoder disagree about the negotiation state.
pub async fn read_expected<T, M>(
    framed: &mut Framed<T, SocksCodec>,
    idle: Option<Duration>,
) -> Result<M, SocksError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: TryFrom<Packet, Error = Packet>,
{
    let packet = read_message(framed, idle).await?;
    M::try_from(packet).map_err(|other| SocksError::UnknownType(other.kind()))
}

/// Detach the codec, returning the raw stream and every byte read past
/// the last decoded message
pub fn into_raw<T>(mut framed: Framed<T, SocksCodec>) -> (T, Bytes)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut remainder = BytesMut::new();
    if framed.codec().decoder().next_kind().is_none() {
        if let Some(Some(Ok(DecodeEvent::Exhausted(rest)))) = framed.next().now_or_never() {
            remainder.extend_from_slice(&rest);
        }
    }
    let parts = framed.into_parts();
    remainder.extend_from_slice(&parts.read_buf);
    (parts.io, remainder.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::consts::*;
    use crate::protocol::message::MessageKind;
    use crate::protocol::packet::*;
    use futures::SinkExt;

    #[tokio::test]
    async fn test_remainder_survives_detach() {
        let mut wire = Packet::from(HandshakeRequest {
            methods: vec![METHOD_NO_AUTH],
        })
        .to_bytes()
        .unwrap()
        .to_vec();
        wire.extend_from_slice(b"payload");

        let mock = tokio_test::io::Builder::new().read(&wire).build();
        let mut framed = framed(
            mock,
            PacketDecoder::group([MessageKind::HandshakeRequest]),
            1024,
        );
        let packet = read_message(&mut framed, None).await.unwrap();
        assert_eq!(packet.kind(), MessageKind::HandshakeRequest);

        let (_io, remainder) = into_raw(framed);
        assert_eq!(&remainder[..], b"payload");
    }

    #[tokio::test]
    async fn test_sends_are_ordered() {
        let mut expected = Vec::new();
        expected.extend_from_slice(&[0x05, METHOD_USER_PASS]);
        expected.extend_from_slice(&[0x01, AUTH_SUCCEEDED]);

        let mock = tokio_test::io::Builder::new().write(&expected).build();
        let mut framed = framed(mock, PacketDecoder::single(MessageKind::AuthRequest), 1024);
        framed
            .feed(Packet::from(HandshakeResponse {
                method: METHOD_USER_PASS,
            }))
            .await
            .unwrap();
        framed
            .send(Packet::from(AuthResponse {
                status: AUTH_SUCCEEDED,
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_eof_before_message() {
        let mock = tokio_test::io::Builder::new().read(&[0x05]).build();
        let mut framed = framed(
            mock,
            PacketDecoder::group([MessageKind::HandshakeRequest]),
            1024,
        );
        let err = read_message(&mut framed, None).await.unwrap_err();
        assert!(matches!(err, SocksError::SocketClosed));
    }

    #[tokio::test]
    async fn test_read_expected_narrows_type() {
        let wire = Packet::from(AuthRequest {
            username: "user".into(),
            password: "pass".into(),
        })
        .to_bytes()
        .unwrap();

        let mock = tokio_test::io::Builder::new().read(&wire).build();
        let mut framed = framed(mock, PacketDecoder::single(MessageKind::AuthRequest), 1024);
        let AuthRequest { username, password } = read_expected(&mut framed, None).await.unwrap();
        assert_eq!((username.as_str(), password.as_str()), ("user", "pass"));
    }

    #[tokio::test]
    async fn test_read_expected_rejects_other_kind() {
        let wire = Packet::from(HandshakeRequest {
            methods: vec![METHOD_NO_AUTH],
        })
        .to_bytes()
        .unwrap();

        let mock = tokio_test::io::Builder::new().read(&wire).build();
        let mut framed = framed(
            mock,
            PacketDecoder::group([MessageKind::HandshakeRequest]),
            1024,
        );
        let err = read_expected::<_, ConnectRequest>(&mut framed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SocksError::UnknownType(MessageKind::HandshakeRequest)
        ));
    }
}
