//! Send and receive pipelines for heap streams.
//!
//! This is the layer applications talk to:
//! - [`ThreadPool`]: shared worker threads for stream jobs
//! - [`SendStream`]: queues heaps, splits them into packets and paces them
//!   onto a [`PacketSink`](heapstream_transport::PacketSink)
//! - [`RecvStream`]: reads packets from one or more
//!   [`PacketSource`](heapstream_transport::PacketSource)s and yields
//!   completed heaps

#[cfg(feature = "async")]
pub mod async_recv;
pub mod config;
pub mod error;
mod pacer;
pub mod pool;
pub mod recv;
pub mod send;
mod stop;

#[cfg(feature = "async")]
pub use async_recv::AsyncHeaps;
pub use config::{RecvConfig, SendConfig};
pub use error::{Result, StreamError};
pub use pool::ThreadPool;
pub use recv::{Heaps, RecvStats, RecvStream};
pub use send::{SendStats, SendStream};
