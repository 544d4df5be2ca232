//! SPEAD-64-40 packet layout for heap streaming.
//!
//! Every packet on the wire is:
//! - An 8-byte header (magic `0x53`, version 4, pointer/address widths 3/5,
//!   item count)
//! - A run of 64-bit item pointers (id plus immediate value or heap address)
//! - A fragment of the heap payload
//!
//! Packets are self-delimiting, so the same layout works for datagram and
//! byte-stream transports.

#[cfg(feature = "async")]
pub mod codec;
pub mod error;
pub mod ids;
pub mod packet;
pub mod pointer;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use codec::PacketCodec;
pub use error::{Result, WireError};
pub use ids::{
    id_name, is_reserved, is_valid_item_id, CTRL_DESCRIPTOR_REISSUE, CTRL_DESCRIPTOR_UPDATE,
    CTRL_STREAM_START, CTRL_STREAM_STOP, DESCRIPTOR, DESCRIPTOR_DESCRIPTION, DESCRIPTOR_DTYPE,
    DESCRIPTOR_FORMAT, DESCRIPTOR_ID, DESCRIPTOR_NAME, DESCRIPTOR_SHAPE, HEAP_CNT, HEAP_OFFSET,
    HEAP_SIZE, MAX_ITEM_ID, PAYLOAD_LENGTH, STREAM_CTRL,
};
pub use packet::{
    decode_packet, encode_packet, packet_overhead, split_packet, Packet, PacketHeader,
    HEADER_SIZE, MAGIC, MAX_PACKET_POINTERS, STANDARD_POINTERS, VERSION,
};
pub use pointer::{ItemPointer, HEAP_ADDRESS_BITS, ITEM_POINTER_SIZE, MAX_ADDRESS};
pub use reader::{PacketReader, DEFAULT_MAX_PACKET_SIZE};
pub use writer::PacketWriter;
