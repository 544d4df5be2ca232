//! Heaps: the unit of exchange in a heap stream.
//!
//! A heap is a self-describing bundle of item values and, optionally, the
//! descriptors that tell a receiver how to interpret them. This crate holds
//! both directions:
//! - [`ItemGroup`] / [`Item`]: typed, versioned values keyed by item id
//! - [`HeapGenerator`]: builds heaps from what changed in a group
//! - [`PacketGenerator`]: splits a heap into bounded packets
//! - [`Reassembler`]: rebuilds heaps from packets arriving in any order
//!
//! There is no I/O here; `heapstream-stream` moves packets.

pub mod descriptor;
pub mod dtype;
pub mod error;
pub mod generator;
pub mod group;
pub mod heap;
pub mod item;
pub mod packetizer;
pub mod reassembler;

pub use descriptor::Descriptor;
pub use dtype::{DType, Element};
pub use error::{HeapError, Result};
pub use generator::{DescriptorCadence, HeapGenerator};
pub use group::ItemGroup;
pub use heap::{FrozenHeap, Heap, HeapItem, RawItem};
pub use item::Item;
pub use packetizer::PacketGenerator;
pub use reassembler::{Reassembler, ReassemblerConfig, ReassemblyStats};

/// Item identifier (23 significant bits on the wire).
pub type ItemId = u64;
