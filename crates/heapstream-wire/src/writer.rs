use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use heapstream_transport::PacketSink;

use crate::error::{Result, WireError};
use crate::packet::{encode_packet, PacketHeader};
use crate::pointer::ItemPointer;
use crate::reader::{wire_to_transport_error, DEFAULT_MAX_PACKET_SIZE};

const INITIAL_BUFFER_CAPACITY: usize = 16 * 1024;

/// Writes complete packets back to back on any `Write` stream.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    max_packet_size: usize,
}

impl<T: Write> PacketWriter<T> {
    /// Create a new packet writer with the default maximum packet size.
    pub fn new(inner: T) -> Self {
        Self::with_max_packet_size(inner, DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a new packet writer with an explicit maximum packet size.
    pub fn with_max_packet_size(inner: T, max_packet_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_packet_size,
        }
    }

    /// Write one already encoded packet (blocking) and flush.
    pub fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > self.max_packet_size {
            return Err(WireError::PacketTooLarge {
                size: packet.len(),
                max: self.max_packet_size,
            });
        }

        write_all(&mut self.inner, packet)?;
        self.flush()
    }

    /// Encode and send a packet.
    pub fn send(
        &mut self,
        header: &PacketHeader,
        pointers: &[ItemPointer],
        payload: &[u8],
    ) -> Result<()> {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let result = encode_packet(header, pointers, payload, &mut buf)
            .and_then(|()| self.write_packet(&buf));
        self.buf = buf;
        result
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn write_all<T: Write>(inner: &mut T, bytes: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match inner.write(&bytes[offset..]) {
            Ok(0) => return Err(WireError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(WireError::Io(err)),
        }
    }
    Ok(())
}

impl<T: Write + Send> PacketSink for PacketWriter<T> {
    fn send_packet(&mut self, packet: &[u8]) -> heapstream_transport::Result<()> {
        self.write_packet(packet).map_err(wire_to_transport_error)
    }

    fn flush(&mut self) -> heapstream_transport::Result<()> {
        PacketWriter::flush(self).map_err(wire_to_transport_error)
    }
}
