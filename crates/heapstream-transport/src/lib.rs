//! Packet transport abstraction.
//!
//! Provides a unified packet-oriented interface over the transports a heap
//! stream can run on:
//! - UDP datagrams (one packet per datagram)
//! - TCP byte streams (helpers only; packet framing lives in `heapstream-wire`)
//! - In-memory channels (tests and same-process pipelines)
//!
//! This is the lowest layer of heapstream. Everything else builds on top of
//! the [`PacketSink`] and [`PacketSource`] traits provided here.

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use memory::{MemorySink, MemorySource};
pub use traits::{PacketSink, PacketSource};
pub use udp::{UdpReceiver, UdpSender};
