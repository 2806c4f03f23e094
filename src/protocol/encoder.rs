//! Packet encoder
//!
//! Each packet is serialized into a scratch buffer before it touches the
//! outgoing buffer, so a packet that fails to encode leaves every queued
//! byte as it was.

use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tracing::trace;

use super::packet::Packet;
use crate::error::SocksError;

/// Default high-water mark of the outgoing buffer
pub const DEFAULT_WRITE_WATERMARK: usize = 8 * 1024;

#[derive(Debug, Default)]
pub struct PacketEncoder {
    scratch: BytesMut,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder<Packet> for PacketEncoder {
    type Error = SocksError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), SocksError> {
        self.scratch.clear();
        packet.encode(&mut self.scratch)?;
        trace!(kind = ?packet.kind(), len = self.scratch.len(), "Encoded packet");
        dst.extend_from_slice(&self.scratch);
        Ok(())
    }
}
