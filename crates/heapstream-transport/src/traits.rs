use bytes::Bytes;

use crate::error::Result;

/// Outbound side of a packet transport.
///
/// One call carries exactly one packet. Implementations must not coalesce or
/// split packets; stream transports frame them on the wire.
pub trait PacketSink: Send {
    /// Transmit a single packet.
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Flush any buffered packets.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Inbound side of a packet transport.
pub trait PacketSource: Send {
    /// Receive the next packet.
    ///
    /// Returns `Ok(None)` when the poll interval elapsed without a packet, so
    /// callers get a chance to observe cancellation. Returns
    /// `Err(TransportError::Closed)` once no further packets can arrive.
    fn recv_packet(&mut self) -> Result<Option<Bytes>>;
}

impl<T: PacketSink + ?Sized> PacketSink for Box<T> {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        (**self).send_packet(packet)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

impl<T: PacketSource + ?Sized> PacketSource for Box<T> {
    fn recv_packet(&mut self) -> Result<Option<Bytes>> {
        (**self).recv_packet()
    }
}
