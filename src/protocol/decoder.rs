//! Streaming packet decoder
//!
//! Reassembles messages from partial reads. In group mode the decoder walks
//! an ordered list of expected kinds that negotiation extends as it goes;
//! once the list runs dry it hands back every unconsumed byte exactly once.
//! Single-kind mode decodes the same kind forever.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use super::message::MessageKind;
use super::packet::Packet;
use crate::error::SocksError;

/// Output of [`PacketDecoder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Message(Packet),
    /// Expected kinds are used up; carries the raw bytes left over
    Exhausted(Bytes),
}

#[derive(Debug)]
enum Mode {
    Group(VecDeque<MessageKind>),
    Single(MessageKind),
}

#[derive(Debug)]
pub struct PacketDecoder {
    mode: Mode,
    exhausted: bool,
}

impl PacketDecoder {
    /// Decode `kinds` in order, then signal exhaustion
    pub fn group(kinds: impl IntoIterator<Item = MessageKind>) -> Self {
        Self {
            mode: Mode::Group(kinds.into_iter().collect()),
            exhausted: false,
        }
    }

    /// Decode `kind` repeatedly
    pub fn single(kind: MessageKind) -> Self {
        Self {
            mode: Mode::Single(kind),
            exhausted: false,
        }
    }

    /// Append a kind to the group list. Ignored in single-kind mode.
    pub fn expect(&mut self, kind: MessageKind) {
        if let Mode::Group(queue) = &mut self.mode {
            queue.push_back(kind);
        }
    }

    /// Kind the next decoded message must be
    pub fn next_kind(&self) -> Option<MessageKind> {
        match &self.mode {
            Mode::Group(queue) => queue.front().copied(),
            Mode::Single(kind) => Some(*kind),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl Decoder for PacketDecoder {
    type Item = DecodeEvent;
    type Error = SocksError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodeEvent>, SocksError> {
        if self.exhausted {
            return Ok(None);
        }

        let Some(kind) = self.next_kind() else {
            self.exhausted = true;
            return Ok(Some(DecodeEvent::Exhausted(src.split().freeze())));
        };

        let len = (kind.spec().packet_length)(src);
        if len == 0 || src.len() < len {
            return Ok(None);
        }

        let frame = src.split_to(len);
        let packet = Packet::from_bytes(kind, &frame)?;
        if let Mode::Group(queue) = &mut self.mode {
            queue.pop_front();
        }
        trace!(?kind, len, "Decoded packet");
        Ok(Some(DecodeEvent::Message(packet)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<DecodeEvent>, SocksError> {
        // A partial message at EOF is left in the buffer; the caller sees
        // the stream end.
        self.decode(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::consts::*;
    use crate::protocol::packet::*;

    fn handshake() -> Packet {
        Packet::from(HandshakeRequest {
            methods: vec![METHOD_NO_AUTH],
        })
    }

    fn connect() -> Packet {
        Packet::from(ConnectRequest {
            command: CMD_CONNECT,
            destination: Destination::domain("www.baidu.com", 80),
        })
    }

    #[test]
    fn test_byte_by_byte_delivery() {
        let mut wire = handshake().to_bytes().unwrap();
        wire.extend_from_slice(&connect().to_bytes().unwrap());

        let mut decoder =
            PacketDecoder::group([MessageKind::HandshakeRequest, MessageKind::ConnectRequest]);
        let mut buf = BytesMut::new();
        let mut events = Vec::new();
        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            while let Some(event) = decoder.decode(&mut buf).unwrap() {
                let done = matches!(event, DecodeEvent::Exhausted(_));
                events.push(event);
                if done {
                    break;
                }
            }
        }

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], DecodeEvent::Message(handshake()));
        assert_eq!(events[1], DecodeEvent::Message(connect()));
        assert_eq!(events[2], DecodeEvent::Exhausted(Bytes::new()));
    }

    #[test]
    fn test_exhausted_carries_remainder_once() {
        let mut buf = handshake().to_bytes().unwrap();
        buf.extend_from_slice(b"GET / HTTP/1.1\r\n");

        let mut decoder = PacketDecoder::group([MessageKind::HandshakeRequest]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(DecodeEvent::Message(handshake()))
        );
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(DecodeEvent::Exhausted(Bytes::from_static(b"GET / HTTP/1.1\r\n")))
        );
        assert!(decoder.is_exhausted());

        buf.extend_from_slice(b"more");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"more");
    }

    #[test]
    fn test_expect_extends_group() {
        let mut decoder = PacketDecoder::group([MessageKind::HandshakeRequest]);
        let mut buf = handshake().to_bytes().unwrap();
        decoder.decode(&mut buf).unwrap();
        decoder.expect(MessageKind::ConnectRequest);

        buf.extend_from_slice(&connect().to_bytes().unwrap()[..5]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&connect().to_bytes().unwrap()[5..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(DecodeEvent::Message(connect()))
        );
    }

    #[test]
    fn test_single_mode_repeats() {
        let relay = Packet::from(RelayRequest {
            destination: Destination::domain("a.b", 1),
        });
        let mut buf = relay.to_bytes().unwrap();
        buf.extend_from_slice(&relay.to_bytes().unwrap());

        let mut decoder = PacketDecoder::single(MessageKind::RelayRequest);
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(DecodeEvent::Message(relay.clone())));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(DecodeEvent::Message(relay)));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(!decoder.is_exhausted());
    }

    #[test]
    fn test_decode_error_is_protocol_error() {
        let mut buf = BytesMut::from(&[0x04u8, 0x01, 0x00][..]);
        let mut decoder = PacketDecoder::group([MessageKind::HandshakeRequest]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, SocksError::Protocol(_)));
    }

    #[test]
    fn test_single_mode_byte_by_byte() {
        use std::net::{Ipv4Addr, Ipv6Addr};

        let relays: Vec<Packet> = vec![
            Destination::domain("example.org", 443),
            Destination::new(Address::Ipv4(Ipv4Addr::new(10, 0, 0, 7)), 8080),
            Destination::domain("x", 1),
            Destination::new(Address::Ipv6(Ipv6Addr::LOCALHOST), 53),
            Destination::new(Address::Ipv4(Ipv4Addr::LOCALHOST), 80),
        ]
        .into_iter()
        .map(|destination| Packet::from(RelayRequest { destination }))
        .collect();

        let mut wire = BytesMut::new();
        for relay in &relays {
            wire.extend_from_slice(&relay.to_bytes().unwrap());
        }

        let mut decoder = PacketDecoder::single(MessageKind::RelayRequest);
        let mut buf = BytesMut::new();
        let mut events = Vec::new();
        for byte in wire.iter() {
            buf.extend_from_slice(&[*byte]);
            while let Some(event) = decoder.decode(&mut buf).unwrap() {
                events.push(event);
            }
        }

        let expected: Vec<DecodeEvent> = relays.into_iter().map(DecodeEvent::Message).collect();
        assert_eq!(events, expected);
        assert!(buf.is_empty());
        assert!(!decoder.is_exhausted());
    }
}
