//! Encrypted tunnel
//!
//! The local role fronts clients with SOCKS5 and forwards each connection
//! through an encrypted stream whose first plaintext bytes are a
//! relay request (`ATYP ADDR PORT`). The server role decrypts that header,
//! opens the destination and relays.

mod local;
mod server;

pub use local::TunnelUpstream;
pub use server::RelayAcceptor;

pub(crate) use local::split_host_port;
