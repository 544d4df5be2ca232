use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use heapstream_transport::{PacketSource, TransportError};
use tracing::debug;

use crate::error::{Result, WireError};
use crate::packet::split_packet;

const INITIAL_BUFFER_CAPACITY: usize = 16 * 1024;
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Default largest packet accepted from a byte stream.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 9200;

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete packets.
/// A read timeout on the inner stream surfaces as `Ok(None)` with any partial
/// packet kept buffered for the next call.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    max_packet_size: usize,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with the default maximum packet size.
    pub fn new(inner: T) -> Self {
        Self::with_max_packet_size(inner, DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a new packet reader with an explicit maximum packet size.
    pub fn with_max_packet_size(inner: T, max_packet_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_packet_size,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Ok(None)` if the inner stream timed out before a packet was
    /// complete, and `Err(WireError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(packet) = split_packet(&mut self.buf, self.max_packet_size)? {
                return Ok(Some(packet));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(err) => return Err(WireError::Io(err)),
            };

            if read == 0 {
                if !self.buf.is_empty() {
                    debug!(buffered = self.buf.len(), "stream closed mid-packet");
                }
                return Err(WireError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Largest packet accepted.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl<T: Read + Send> PacketSource for PacketReader<T> {
    fn recv_packet(&mut self) -> heapstream_transport::Result<Option<Bytes>> {
        self.read_packet().map_err(wire_to_transport_error)
    }
}

/// Map a framing failure onto the transport error space.
///
/// A byte stream that fails to frame is desynchronised and cannot recover,
/// so every decode error becomes fatal I/O.
pub(crate) fn wire_to_transport_error(err: WireError) -> TransportError {
    match err {
        WireError::Io(io) => TransportError::Io(io),
        WireError::ConnectionClosed => TransportError::Closed,
        WireError::PacketTooLarge { size, max } => TransportError::PacketTooLarge { size, max },
        other => TransportError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            other.to_string(),
        )),
    }
}
