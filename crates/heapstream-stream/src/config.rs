use std::time::Duration;

use heapstream_heap::reassembler::{
    DEFAULT_COMPLETED_HISTORY, DEFAULT_MAX_HEAPS, DEFAULT_MAX_HEAP_SIZE,
};
use heapstream_heap::ReassemblerConfig;
use heapstream_wire::{packet_overhead, DEFAULT_MAX_PACKET_SIZE};

use crate::error::{Result, StreamError};

/// Largest UDP payload that avoids fragmentation on a 1500-byte MTU.
pub const DEFAULT_SEND_PACKET_SIZE: usize = 1472;

/// Default pacing burst in bytes.
pub const DEFAULT_BURST_SIZE: usize = 65536;

/// Default number of attempts added after a transient send failure.
pub const DEFAULT_SEND_RETRIES: u32 = 3;

/// Default number of completed heaps buffered ahead of the consumer.
pub const DEFAULT_RING_HEAPS: usize = 4;

/// Configuration for a [`SendStream`](crate::SendStream).
#[derive(Debug, Clone, PartialEq)]
pub struct SendConfig {
    /// Maximum encoded packet size in bytes.
    pub max_packet_size: usize,
    /// Transmission rate in bytes per second. `0.0` sends as fast as possible.
    pub rate: f64,
    /// Bytes sent back to back before the pacer sleeps.
    pub burst_size: usize,
    /// Heaps that may be queued or transmitting before `send_heap` blocks.
    pub max_heaps: usize,
    /// Retries for a packet after a transient transport error.
    pub send_retries: u32,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_SEND_PACKET_SIZE,
            rate: 0.0,
            burst_size: DEFAULT_BURST_SIZE,
            max_heaps: DEFAULT_MAX_HEAPS,
            send_retries: DEFAULT_SEND_RETRIES,
        }
    }
}

impl SendConfig {
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_burst_size(mut self, burst_size: usize) -> Self {
        self.burst_size = burst_size;
        self
    }

    pub fn with_max_heaps(mut self, max_heaps: usize) -> Self {
        self.max_heaps = max_heaps;
        self
    }

    pub fn with_send_retries(mut self, send_retries: u32) -> Self {
        self.send_retries = send_retries;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let min = packet_overhead(0) + 1;
        if self.max_packet_size < min {
            return Err(StreamError::InvalidConfig(format!(
                "max_packet_size {} is below the minimum of {min}",
                self.max_packet_size
            )));
        }
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(StreamError::InvalidConfig(format!(
                "rate must be a non-negative number of bytes per second, got {}",
                self.rate
            )));
        }
        if self.max_heaps == 0 {
            return Err(StreamError::InvalidConfig(
                "max_heaps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`RecvStream`](crate::RecvStream).
#[derive(Debug, Clone, PartialEq)]
pub struct RecvConfig {
    /// Incomplete heaps tracked at once; the oldest is evicted beyond this.
    pub max_heaps: usize,
    /// Completed heaps buffered for the consumer before readers block.
    pub ring_heaps: usize,
    /// Largest packet a reader accepts.
    pub max_packet_size: usize,
    /// Largest heap a single packet may announce.
    pub max_heap_size: u64,
    /// Abandon heaps that see no packet for this long.
    pub heap_timeout: Option<Duration>,
    /// Recently finished heap counters remembered to drop late duplicates.
    pub completed_history: usize,
    /// Stop the stream when a stream-stop control item arrives.
    pub stop_on_stop_item: bool,
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            max_heaps: DEFAULT_MAX_HEAPS,
            ring_heaps: DEFAULT_RING_HEAPS,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
            heap_timeout: None,
            completed_history: DEFAULT_COMPLETED_HISTORY,
            stop_on_stop_item: true,
        }
    }
}

impl RecvConfig {
    pub fn with_max_heaps(mut self, max_heaps: usize) -> Self {
        self.max_heaps = max_heaps;
        self
    }

    pub fn with_ring_heaps(mut self, ring_heaps: usize) -> Self {
        self.ring_heaps = ring_heaps;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_max_heap_size(mut self, max_heap_size: u64) -> Self {
        self.max_heap_size = max_heap_size;
        self
    }

    pub fn with_heap_timeout(mut self, heap_timeout: Duration) -> Self {
        self.heap_timeout = Some(heap_timeout);
        self
    }

    pub fn with_completed_history(mut self, completed_history: usize) -> Self {
        self.completed_history = completed_history;
        self
    }

    pub fn with_stop_on_stop_item(mut self, stop_on_stop_item: bool) -> Self {
        self.stop_on_stop_item = stop_on_stop_item;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_heaps == 0 {
            return Err(StreamError::InvalidConfig(
                "max_heaps must be at least 1".to_string(),
            ));
        }
        if self.ring_heaps == 0 {
            return Err(StreamError::InvalidConfig(
                "ring_heaps must be at least 1".to_string(),
            ));
        }
        if self.max_packet_size < packet_overhead(0) {
            return Err(StreamError::InvalidConfig(format!(
                "max_packet_size {} cannot hold a packet header",
                self.max_packet_size
            )));
        }
        Ok(())
    }

    pub(crate) fn reassembler_config(&self) -> ReassemblerConfig {
        ReassemblerConfig {
            max_heaps: self.max_heaps,
            max_heap_size: self.max_heap_size,
            heap_timeout: self.heap_timeout,
            completed_history: self.completed_history,
        }
    }
}
