//! Error types
//!
//! `ProtocolError` covers the wire format, `SocksError` everything a
//! connection can fail with.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{consts, MessageKind};

/// Wire-level encode/decode failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` expects {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("value {value:#04x} is not allowed for field `{field}`")]
    InvalidValue { field: &'static str, value: u16 },

    #[error("field `{field}` is {len} bytes long, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("message truncated while reading `{0}`")]
    Truncated(&'static str),

    #[error("field `{0}` is not valid UTF-8")]
    InvalidText(&'static str),

    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    #[error("no length source decoded for field `{0}`")]
    MissingLength(&'static str),

    #[error("custom reader for `{0}` has no validator")]
    Unvalidated(&'static str),

    #[error("{0} unexpected trailing bytes after message")]
    TrailingBytes(usize),

    #[error("decoder has no further message to expect")]
    Exhausted,
}

/// Coarse classification used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Negotiation,
    Timeout,
    Transport,
    Config,
}

/// Connection-level errors
#[derive(Debug, Error)]
pub enum SocksError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no acceptable authentication method offered")]
    HandshakeRejected,

    #[error("authentication rejected: {}", consts::auth_status_name(*status))]
    AuthRejected { status: u8 },

    #[error("proxy selected unknown authentication method {0:#04x}")]
    UnknownAuthType(u8),

    #[error("connection rejected: {}", consts::reply_name(*reply))]
    ConnectionRejected { reply: u8 },

    #[error("command {0:#04x} is not supported")]
    CommandNotSupported(u8),

    #[error("unexpected {0:?} message")]
    UnknownType(MessageKind),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("socket closed before the connection was established")]
    SocketClosed,

    #[error("failed to reach {destination}: {source}")]
    Upstream {
        destination: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("unknown cipher method `{0}`")]
    UnknownMethod(String),

    #[error("connection task panicked")]
    TaskPanicked,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SocksError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SocksError::Protocol(_) | SocksError::UnknownType(_) => ErrorKind::Protocol,
            SocksError::HandshakeRejected
            | SocksError::AuthRejected { .. }
            | SocksError::UnknownAuthType(_)
            | SocksError::ConnectionRejected { .. }
            | SocksError::CommandNotSupported(_) => ErrorKind::Negotiation,
            SocksError::ConnectTimeout(_) | SocksError::IdleTimeout(_) => ErrorKind::Timeout,
            SocksError::UnknownMethod(_) => ErrorKind::Config,
            SocksError::SocketClosed
            | SocksError::Upstream { .. }
            | SocksError::Bind { .. }
            | SocksError::TaskPanicked
            | SocksError::Io(_) => ErrorKind::Transport,
        }
    }

    /// Stable identifier reported to API consumers
    pub fn code(&self) -> &'static str {
        match self {
            SocksError::Protocol(_) => "SOCKS_PROTOCOL_ERROR",
            SocksError::HandshakeRejected => "SOCKS_HANDSHAKE_REJECTED",
            SocksError::AuthRejected { .. } => "SOCKS_AUTH_REJECTED",
            SocksError::UnknownAuthType(_) => "SOCKS_UNKNOWN_AUTH_TYPE",
            SocksError::ConnectionRejected { .. } => "SOCKS_CONNECTION_REJECTED",
            SocksError::CommandNotSupported(_) => "SOCKS_COMMAND_NOT_SUPPORTED",
            SocksError::UnknownType(_) => "SOCKS_UNKNOWN_TYPE",
            SocksError::ConnectTimeout(_) => "SOCKS_CONNECT_TIMEOUT",
            SocksError::IdleTimeout(_) => "SOCKS_IDLE_TIMEOUT",
            SocksError::SocketClosed => "SOCKET_CLOSED",
            SocksError::Upstream { .. } => "SOCKS_UPSTREAM_FAILED",
            SocksError::Bind { .. } => "SOCKS_BIND_FAILED",
            SocksError::UnknownMethod(_) => "SOCKS_UNKNOWN_METHOD",
            SocksError::TaskPanicked => "SOCKS_TASK_PANICKED",
            SocksError::Io(_) => "SOCKS_IO_ERROR",
        }
    }

    /// Peer resets are routine and logged quietly
    pub fn is_connection_reset(&self) -> bool {
        let io_err = match self {
            SocksError::Io(e) => e,
            SocksError::Upstream { source, .. } => source,
            _ => return false,
        };
        matches!(
            io_err.kind(),
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
        )
    }
}

pub type Result<T, E = SocksError> = std::result::Result<T, E>;
