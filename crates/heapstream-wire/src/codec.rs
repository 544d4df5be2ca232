//! `tokio-util` codec for packet streams over async byte transports.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, WireError};
use crate::packet::{decode_packet, split_packet, Packet};
use crate::reader::DEFAULT_MAX_PACKET_SIZE;

/// Splits a byte stream into decoded [`Packet`]s and writes encoded packets
/// back to back.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    /// Create a codec accepting packets up to `max_packet_size` bytes.
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match split_packet(src, self.max_packet_size)? {
            Some(bytes) => decode_packet(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(WireError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = WireError;

    fn encode(&mut self, packet: Bytes, dst: &mut BytesMut) -> Result<()> {
        if packet.len() > self.max_packet_size {
            return Err(WireError::PacketTooLarge {
                size: packet.len(),
                max: self.max_packet_size,
            });
        }
        dst.extend_from_slice(&packet);
        Ok(())
    }
}
