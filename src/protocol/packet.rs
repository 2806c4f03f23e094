//! Typed packets
//!
//! Thin structs over [`Fields`] for each message kind.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BytesMut;

use super::consts::*;
use super::field::{Fields, Value};
use super::message::keys::*;
use super::message::MessageKind;
use crate::error::ProtocolError;

/// Destination host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl Address {
    /// Wire `atyp` value
    pub fn atyp(&self) -> u8 {
        match self {
            Address::Ipv4(_) => ATYP_IPV4,
            Address::Ipv6(_) => ATYP_IPV6,
            Address::Domain(_) => ATYP_DOMAIN,
        }
    }

    fn from_wire(atyp: u8, text: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidAddress(text.to_owned());
        match atyp {
            ATYP_IPV4 => text.parse().map(Address::Ipv4).map_err(|_| invalid()),
            ATYP_IPV6 => text.parse().map(Address::Ipv6).map_err(|_| invalid()),
            ATYP_DOMAIN => Ok(Address::Domain(text.to_owned())),
            other => Err(ProtocolError::InvalidValue {
                field: ATYP,
                value: u16::from(other),
            }),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{ip}"),
            Address::Ipv6(ip) => write!(f, "{ip}"),
            Address::Domain(name) => f.write_str(name),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => Address::Ipv4(ip),
            IpAddr::V6(ip) => Address::Ipv6(ip),
        }
    }
}

/// Host and port a client asked to reach
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub address: Address,
    pub port: u16,
}

impl Destination {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        Self::new(Address::Domain(name.into()), port)
    }

    /// `0.0.0.0:0`, used as the bound address in replies
    pub fn unspecified() -> Self {
        Self::new(Address::Ipv4(Ipv4Addr::UNSPECIFIED), 0)
    }

    /// Host part suitable for `TcpStream::connect((host, port))`
    pub fn host(&self) -> String {
        self.address.to_string()
    }

    fn push_fields(&self, fields: &mut Fields) {
        fields.insert(ATYP, Value::U8(self.address.atyp()));
        fields.insert(ADDRESS, Value::Text(self.address.to_string()));
        fields.insert(PORT, Value::U16(self.port));
    }

    fn from_fields(fields: &Fields) -> Result<Self, ProtocolError> {
        let address = Address::from_wire(fields.u8(ATYP)?, fields.text(ADDRESS)?)?;
        Ok(Self::new(address, fields.u16(PORT)?))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Ipv6(ip) => write!(f, "[{ip}]:{}", self.port),
            address => write!(f, "{address}:{}", self.port),
        }
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().into(), addr.port())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub methods: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub method: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub command: u8,
    pub destination: Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub reply: u8,
    pub bind: Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub destination: Destination,
}

/// Any message of the protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    AuthRequest(AuthRequest),
    AuthResponse(AuthResponse),
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    RelayRequest(RelayRequest),
}

impl Packet {
    pub fn kind(&self) -> MessageKind {
        match self {
            Packet::HandshakeRequest(_) => MessageKind::HandshakeRequest,
            Packet::HandshakeResponse(_) => MessageKind::HandshakeResponse,
            Packet::AuthRequest(_) => MessageKind::AuthRequest,
            Packet::AuthResponse(_) => MessageKind::AuthResponse,
            Packet::ConnectRequest(_) => MessageKind::ConnectRequest,
            Packet::ConnectResponse(_) => MessageKind::ConnectResponse,
            Packet::RelayRequest(_) => MessageKind::RelayRequest,
        }
    }

    /// Field values for encoding; length fields are left to the codec
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        match self {
            Packet::HandshakeRequest(p) => {
                fields.insert(VERSION, Value::U8(SOCKS_V5));
                fields.insert(METHODS, Value::List(p.methods.clone()));
            }
            Packet::HandshakeResponse(p) => {
                fields.insert(VERSION, Value::U8(SOCKS_V5));
                fields.insert(METHOD, Value::U8(p.method));
            }
            Packet::AuthRequest(p) => {
                fields.insert(VERSION, Value::U8(AUTH_VERSION));
                fields.insert(UNAME, Value::Text(p.username.clone()));
                fields.insert(PASSWD, Value::Text(p.password.clone()));
            }
            Packet::AuthResponse(p) => {
                fields.insert(VERSION, Value::U8(AUTH_VERSION));
                fields.insert(STATUS, Value::U8(p.status));
            }
            Packet::ConnectRequest(p) => {
                fields.insert(VERSION, Value::U8(SOCKS_V5));
                fields.insert(COMMAND, Value::U8(p.command));
                fields.insert(RESERVED, Value::U8(0));
                p.destination.push_fields(&mut fields);
            }
            Packet::ConnectResponse(p) => {
                fields.insert(VERSION, Value::U8(SOCKS_V5));
                fields.insert(REPLY, Value::U8(p.reply));
                fields.insert(RESERVED, Value::U8(0));
                p.bind.push_fields(&mut fields);
            }
            Packet::RelayRequest(p) => p.destination.push_fields(&mut fields),
        }
        fields
    }

    pub fn from_fields(kind: MessageKind, fields: &Fields) -> Result<Self, ProtocolError> {
        let packet = match kind {
            MessageKind::HandshakeRequest => Packet::HandshakeRequest(HandshakeRequest {
                methods: fields.list(METHODS)?.to_vec(),
            }),
            MessageKind::HandshakeResponse => Packet::HandshakeResponse(HandshakeResponse {
                method: fields.u8(METHOD)?,
            }),
            MessageKind::AuthRequest => Packet::AuthRequest(AuthRequest {
                username: fields.text(UNAME)?.to_owned(),
                password: fields.text(PASSWD)?.to_owned(),
            }),
            MessageKind::AuthResponse => Packet::AuthResponse(AuthResponse {
                status: fields.u8(STATUS)?,
            }),
            MessageKind::ConnectRequest => Packet::ConnectRequest(ConnectRequest {
                command: fields.u8(COMMAND)?,
                destination: Destination::from_fields(fields)?,
            }),
            MessageKind::ConnectResponse => Packet::ConnectResponse(ConnectResponse {
                reply: fields.u8(REPLY)?,
                bind: Destination::from_fields(fields)?,
            }),
            MessageKind::RelayRequest => Packet::RelayRequest(RelayRequest {
                destination: Destination::from_fields(fields)?,
            }),
        };
        Ok(packet)
    }

    /// Append the wire form to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.kind().spec().encode(&self.to_fields(), dst)
    }

    pub fn to_bytes(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Parse exactly one message of `kind`
    pub fn from_bytes(kind: MessageKind, buf: &[u8]) -> Result<Self, ProtocolError> {
        let fields = kind.spec().decode(buf)?;
        Self::from_fields(kind, &fields)
    }
}

macro_rules! impl_from_packet {
    ($($name:ident),* $(,)?) => {
        $(
            impl From<$name> for Packet {
                fn from(packet: $name) -> Self {
                    Packet::$name(packet)
                }
            }

            impl TryFrom<Packet> for $name {
                /// A packet of another kind is handed back unchanged
                type Error = Packet;

                fn try_from(packet: Packet) -> Result<Self, Packet> {
                    match packet {
                        Packet::$name(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

impl_from_packet!(
    HandshakeRequest,
    HandshakeResponse,
    AuthRequest,
    AuthResponse,
    ConnectRequest,
    ConnectResponse,
    RelayRequest,
);
