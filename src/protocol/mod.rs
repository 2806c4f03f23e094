//! SOCKS5 wire protocol
//!
//! Declarative field model, message classes, typed packets and the
//! streaming codec.

pub mod codec;
pub mod consts;
mod decoder;
mod encoder;
pub mod field;
mod message;
mod packet;

pub use codec::SocksCodec;
pub use decoder::{DecodeEvent, PacketDecoder};
pub use encoder::{PacketEncoder, DEFAULT_WRITE_WATERMARK};
pub use message::{address_length, keys, MessageKind, MessageSpec};
pub use packet::*;
