//! Heap-based telemetry streaming over SPEAD-64-40.
//!
//! heapstream frames typed, versioned items into self-describing heaps,
//! splits heaps into bounded packets, and rebuilds them on the receiving side
//! despite reordering and bounded loss.
//!
//! # Crate Structure
//!
//! - [`transport`]: Packet transports (UDP, TCP, in-memory)
//! - [`wire`]: SPEAD-64-40 packet layout and stream framing
//! - [`heap`]: Items, item groups, heap generation and reassembly
//! - [`stream`]: Thread pool plus paced send and receive pipelines

/// Re-export transport types.
pub mod transport {
    pub use heapstream_transport::*;
}

/// Re-export wire format types.
pub mod wire {
    pub use heapstream_wire::*;
}

/// Re-export heap types.
pub mod heap {
    pub use heapstream_heap::*;
}

/// Re-export stream types.
pub mod stream {
    pub use heapstream_stream::*;
}
