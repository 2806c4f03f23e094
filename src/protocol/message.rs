//! Message classes
//!
//! Every message kind is a field list plus a length predicate. The
//! address-bearing messages share the `atyp`/`address`/`port` fragment.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use once_cell::sync::Lazy;

use super::consts::*;
use super::field::{self, take, Custom, FieldSpec, Fields, Value};
use crate::error::ProtocolError;

/// Field keys
pub mod keys {
    use crate::protocol::field::FieldKey;

    pub const VERSION: FieldKey = "version";
    pub const NMETHODS: FieldKey = "nmethods";
    pub const METHODS: FieldKey = "methods";
    pub const METHOD: FieldKey = "method";
    pub const ULEN: FieldKey = "ulen";
    pub const UNAME: FieldKey = "uname";
    pub const PLEN: FieldKey = "plen";
    pub const PASSWD: FieldKey = "passwd";
    pub const STATUS: FieldKey = "status";
    pub const COMMAND: FieldKey = "command";
    pub const REPLY: FieldKey = "reply";
    pub const RESERVED: FieldKey = "reserved";
    pub const ATYP: FieldKey = "atyp";
    pub const ADDRESS: FieldKey = "address";
    pub const PORT: FieldKey = "port";
}

use keys::*;

const SOCKS_VERSIONS: &[u16] = &[SOCKS_V5 as u16];
const AUTH_VERSIONS: &[u16] = &[AUTH_VERSION as u16];
const RESERVED_VALUES: &[u16] = &[0];
const COMMANDS: &[u16] = &[CMD_CONNECT as u16, CMD_BIND as u16, CMD_UDP_ASSOCIATE as u16];
const ADDRESS_TYPES: &[u16] = &[ATYP_IPV4 as u16, ATYP_DOMAIN as u16, ATYP_IPV6 as u16];

/// Kinds of message carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    HandshakeRequest,
    HandshakeResponse,
    AuthRequest,
    AuthResponse,
    ConnectRequest,
    ConnectResponse,
    /// Destination header sent first inside the encrypted tunnel
    RelayRequest,
}

impl MessageKind {
    pub fn spec(self) -> &'static MessageSpec {
        match self {
            MessageKind::HandshakeRequest => &*HANDSHAKE_REQUEST,
            MessageKind::HandshakeResponse => &*HANDSHAKE_RESPONSE,
            MessageKind::AuthRequest => &*AUTH_REQUEST,
            MessageKind::AuthResponse => &*AUTH_RESPONSE,
            MessageKind::ConnectRequest => &*CONNECT_REQUEST,
            MessageKind::ConnectResponse => &*CONNECT_RESPONSE,
            MessageKind::RelayRequest => &*RELAY_REQUEST,
        }
    }
}

/// Field layout and framing rule of one message kind
#[derive(Debug)]
pub struct MessageSpec {
    pub kind: MessageKind,
    pub fields: Vec<FieldSpec>,
    /// Total length of the message at the front of a buffer, or 0 while
    /// that cannot be known yet
    pub packet_length: fn(&[u8]) -> usize,
}

impl MessageSpec {
    pub fn encode(&self, fields: &Fields, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        field::to_bytes(&self.fields, fields, dst)
    }

    pub fn decode(&self, buf: &[u8]) -> Result<Fields, ProtocolError> {
        field::from_bytes(&self.fields, buf)
    }
}

fn socks_version() -> FieldSpec {
    FieldSpec::u8(VERSION).allow(SOCKS_VERSIONS)
}

fn address_fragment() -> [FieldSpec; 3] {
    [
        FieldSpec::u8(ATYP).allow(ADDRESS_TYPES),
        FieldSpec::text(ADDRESS).custom(Custom {
            read: read_address,
            write: write_address,
            validate: Some(validate_address),
        }),
        FieldSpec::u16(PORT),
    ]
}

fn compose(kind: MessageKind, head: Vec<FieldSpec>, packet_length: fn(&[u8]) -> usize) -> MessageSpec {
    let mut fields = head;
    fields.extend(address_fragment());
    MessageSpec {
        kind,
        fields,
        packet_length,
    }
}

static HANDSHAKE_REQUEST: Lazy<MessageSpec> = Lazy::new(|| MessageSpec {
    kind: MessageKind::HandshakeRequest,
    fields: vec![
        socks_version(),
        FieldSpec::u8(NMETHODS).length_of(METHODS),
        FieldSpec::list(METHODS),
    ],
    packet_length: handshake_request_length,
});

static HANDSHAKE_RESPONSE: Lazy<MessageSpec> = Lazy::new(|| MessageSpec {
    kind: MessageKind::HandshakeResponse,
    fields: vec![socks_version(), FieldSpec::u8(METHOD)],
    packet_length: two_bytes,
});

static AUTH_REQUEST: Lazy<MessageSpec> = Lazy::new(|| MessageSpec {
    kind: MessageKind::AuthRequest,
    fields: vec![
        FieldSpec::u8(VERSION).allow(AUTH_VERSIONS),
        FieldSpec::u8(ULEN).length_of(UNAME),
        FieldSpec::text(UNAME),
        FieldSpec::u8(PLEN).length_of(PASSWD),
        FieldSpec::text(PASSWD),
    ],
    packet_length: auth_request_length,
});

static AUTH_RESPONSE: Lazy<MessageSpec> = Lazy::new(|| MessageSpec {
    kind: MessageKind::AuthResponse,
    fields: vec![FieldSpec::u8(VERSION).allow(AUTH_VERSIONS), FieldSpec::u8(STATUS)],
    packet_length: two_bytes,
});

static CONNECT_REQUEST: Lazy<MessageSpec> = Lazy::new(|| {
    compose(
        MessageKind::ConnectRequest,
        vec![
            socks_version(),
            FieldSpec::u8(COMMAND).allow(COMMANDS),
            FieldSpec::u8(RESERVED).allow(RESERVED_VALUES),
        ],
        connect_length,
    )
});

static CONNECT_RESPONSE: Lazy<MessageSpec> = Lazy::new(|| {
    compose(
        MessageKind::ConnectResponse,
        vec![
            socks_version(),
            FieldSpec::u8(REPLY),
            FieldSpec::u8(RESERVED).allow(RESERVED_VALUES),
        ],
        connect_length,
    )
});

static RELAY_REQUEST: Lazy<MessageSpec> =
    Lazy::new(|| compose(MessageKind::RelayRequest, Vec::new(), address_length));

fn handshake_request_length(buf: &[u8]) -> usize {
    match buf.get(1) {
        Some(&nmethods) => 2 + usize::from(nmethods),
        None => 0,
    }
}

fn two_bytes(_: &[u8]) -> usize {
    2
}

fn auth_request_length(buf: &[u8]) -> usize {
    let Some(&ulen) = buf.get(1) else {
        return 0;
    };
    let ulen = usize::from(ulen);
    match buf.get(2 + ulen) {
        Some(&plen) => 3 + ulen + usize::from(plen),
        None => 0,
    }
}

fn connect_length(buf: &[u8]) -> usize {
    match buf.get(3..).map(address_length) {
        Some(0) | None => 0,
        Some(n) => 3 + n,
    }
}

/// Length of an `atyp address port` block.
///
/// An unknown address type reports just the type byte so that decoding
/// runs and rejects it instead of waiting for more input.
pub fn address_length(buf: &[u8]) -> usize {
    match buf.first() {
        None => 0,
        Some(&ATYP_IPV4) => 1 + 4 + 2,
        Some(&ATYP_IPV6) => 1 + 16 + 2,
        Some(&ATYP_DOMAIN) => match buf.get(1) {
            Some(&len) => 1 + 1 + usize::from(len) + 2,
            None => 0,
        },
        Some(_) => 1,
    }
}

fn read_address(fields: &Fields, buf: &mut &[u8]) -> Result<Value, ProtocolError> {
    let text = match fields.u8(ATYP)? {
        ATYP_IPV4 => {
            let raw = take(buf, 4, ADDRESS)?;
            Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(take(buf, 16, ADDRESS)?);
            Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = usize::from(take(buf, 1, ADDRESS)?[0]);
            let raw = take(buf, len, ADDRESS)?;
            std::str::from_utf8(raw)
                .map_err(|_| ProtocolError::InvalidText(ADDRESS))?
                .to_owned()
        }
        other => {
            return Err(ProtocolError::InvalidValue {
                field: ATYP,
                value: u16::from(other),
            })
        }
    };
    Ok(Value::Text(text))
}

fn write_address(fields: &Fields, value: &Value, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let Value::Text(text) = value else {
        return Err(ProtocolError::TypeMismatch {
            field: ADDRESS,
            expected: "text",
        });
    };
    let invalid = || ProtocolError::InvalidAddress(text.clone());
    match fields.u8(ATYP)? {
        ATYP_IPV4 => {
            let ip: Ipv4Addr = text.parse().map_err(|_| invalid())?;
            dst.extend_from_slice(&ip.octets());
        }
        ATYP_IPV6 => {
            let ip: Ipv6Addr = text.parse().map_err(|_| invalid())?;
            dst.extend_from_slice(&ip.octets());
        }
        ATYP_DOMAIN => {
            if text.len() > usize::from(u8::MAX) {
                return Err(ProtocolError::TooLong {
                    field: ADDRESS,
                    len: text.len(),
                    max: usize::from(u8::MAX),
                });
            }
            dst.put_u8(text.len() as u8);
            dst.extend_from_slice(text.as_bytes());
        }
        other => {
            return Err(ProtocolError::InvalidValue {
                field: ATYP,
                value: u16::from(other),
            })
        }
    }
    Ok(())
}

fn validate_address(fields: &Fields, value: &Value) -> Result<(), ProtocolError> {
    let Value::Text(text) = value else {
        return Err(ProtocolError::TypeMismatch {
            field: ADDRESS,
            expected: "text",
        });
    };
    let valid = match fields.u8(ATYP)? {
        ATYP_IPV4 => text.parse::<Ipv4Addr>().is_ok(),
        ATYP_IPV6 => text.parse::<Ipv6Addr>().is_ok(),
        ATYP_DOMAIN => !text.is_empty(),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidAddress(text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_predicates_wait_for_header() {
        let spec = MessageKind::HandshakeRequest.spec();
        assert_eq!((spec.packet_length)(&[5]), 0);
        assert_eq!((spec.packet_length)(&[5, 2]), 4);

        let spec = MessageKind::AuthRequest.spec();
        assert_eq!((spec.packet_length)(&[1, 3, b'b', b'o']), 0);
        assert_eq!((spec.packet_length)(&[1, 3, b'b', b'o', b'b', 2]), 8);

        let spec = MessageKind::ConnectRequest.spec();
        assert_eq!((spec.packet_length)(&[5, 1, 0]), 0);
        assert_eq!((spec.packet_length)(&[5, 1, 0, ATYP_DOMAIN]), 0);
        assert_eq!((spec.packet_length)(&[5, 1, 0, ATYP_DOMAIN, 13]), 20);
        assert_eq!((spec.packet_length)(&[5, 1, 0, ATYP_IPV4]), 10);
        assert_eq!((spec.packet_length)(&[5, 1, 0, ATYP_IPV6]), 22);
    }

    #[test]
    fn test_relay_request_length() {
        let spec = MessageKind::RelayRequest.spec();
        assert_eq!((spec.packet_length)(&[]), 0);
        assert_eq!((spec.packet_length)(&[ATYP_DOMAIN]), 0);
        assert_eq!((spec.packet_length)(&[ATYP_DOMAIN, 3]), 1 + 1 + 3 + 2);
        assert_eq!((spec.packet_length)(&[ATYP_IPV4]), 7);
    }

    #[test]
    fn test_unknown_address_type_fails_decode() {
        let spec = MessageKind::ConnectRequest.spec();
        let buf = [5, 1, 0, 0x09];
        assert_eq!((spec.packet_length)(&buf), 4);
        let err = spec.decode(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: ATYP, value: 9 }));
    }

    #[test]
    fn test_empty_domain_rejected() {
        let spec = MessageKind::RelayRequest.spec();
        let err = spec.decode(&[ATYP_DOMAIN, 0, 0, 80]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAddress(_)));
    }

    #[test]
    fn test_socks4_version_rejected() {
        let spec = MessageKind::HandshakeRequest.spec();
        let err = spec.decode(&[SOCKS_V4, 1, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidValue { field: VERSION, value: 4 }));
    }
}
