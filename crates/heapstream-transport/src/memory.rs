//! In-process packet transport backed by a bounded channel.
//!
//! Used for same-process pipelines and for exercising loss and reordering in
//! tests: a [`MemorySink`] can be given a filter that decides, per packet,
//! whether it is delivered.

use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{PacketSink, PacketSource};

/// Default interval after which [`MemorySource::recv_packet`] yields `None`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type PacketFilter = Box<dyn FnMut(u64, &[u8]) -> bool + Send>;

/// Create a connected sink/source pair holding at most `capacity` packets.
pub fn channel(capacity: usize) -> (MemorySink, MemorySource) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        MemorySink {
            tx,
            filter: None,
            sent: 0,
        },
        MemorySource {
            rx,
            poll_interval: DEFAULT_POLL_INTERVAL,
        },
    )
}

/// Sending half of an in-memory transport.
pub struct MemorySink {
    tx: Sender<Bytes>,
    filter: Option<PacketFilter>,
    sent: u64,
}

impl MemorySink {
    /// Install a delivery filter.
    ///
    /// The filter receives the zero-based index of each packet handed to the
    /// sink and its bytes; returning `false` silently drops the packet.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(u64, &[u8]) -> bool + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Number of packets handed to this sink, delivered or not.
    pub fn packets_sent(&self) -> u64 {
        self.sent
    }
}

impl PacketSink for MemorySink {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        let index = self.sent;
        self.sent += 1;

        if let Some(filter) = self.filter.as_mut() {
            if !filter(index, packet) {
                debug!(index, size = packet.len(), "memory transport dropped packet");
                return Ok(());
            }
        }

        self.tx
            .send(Bytes::copy_from_slice(packet))
            .map_err(|_| TransportError::Closed)
    }
}

impl std::fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySink")
            .field("sent", &self.sent)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Receiving half of an in-memory transport.
#[derive(Debug)]
pub struct MemorySource {
    rx: Receiver<Bytes>,
    poll_interval: Duration,
}

impl MemorySource {
    /// Change how long a receive call waits before yielding `None`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl PacketSource for MemorySource {
    fn recv_packet(&mut self) -> Result<Option<Bytes>> {
        match self.rx.recv_timeout(self.poll_interval) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}
