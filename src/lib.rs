//! socksveil - SOCKS5 proxy with an encrypted tunnel
//!
//! This library provides a streaming SOCKS5 codec, server- and client-role
//! negotiation, a multi-listener proxy server and a stream-cipher tunnel
//! that carries SOCKS5 traffic between a local and a remote endpoint.

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod shadowsocks;
pub mod util;

pub use client::SocksClient;
pub use config::Config;
pub use error::{ProtocolError, SocksError};
pub use server::{Server, Service};

/// Version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
