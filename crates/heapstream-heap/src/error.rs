use heapstream_wire::WireError;

use crate::dtype::DType;

/// Errors that can occur while building, encoding or reassembling heaps.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    /// A value's byte length disagrees with the item's shape and type.
    #[error("item 0x{id:x}: value is {actual} bytes, shape requires {expected}")]
    ShapeMismatch {
        id: u64,
        expected: usize,
        actual: usize,
    },

    /// A typed accessor was used with the wrong element type.
    #[error("item 0x{id:x}: element type is {actual}, requested {requested}")]
    TypeMismatch {
        id: u64,
        actual: DType,
        requested: DType,
    },

    /// An item with this id already exists in the group.
    #[error("item 0x{0:x} already exists")]
    DuplicateId(u64),

    /// The id is reserved by the protocol or does not fit 23 bits.
    #[error("invalid item id 0x{0:x}")]
    InvalidId(u64),

    /// A shape dimension does not fit the 40-bit size field.
    #[error("item 0x{id:x}: shape {shape:?} has a dimension above 2^40 - 1")]
    InvalidShape { id: u64, shape: Vec<u64> },

    /// No item with this id exists in the group.
    #[error("unknown item 0x{0:x}")]
    UnknownItem(u64),

    /// The item has no value yet.
    #[error("item 0x{0:x} has no value")]
    MissingValue(u64),

    /// A reassembled heap, or a descriptor inside it, does not make sense.
    #[error("malformed heap: {0}")]
    MalformedHeap(String),

    /// A packet failed to decode.
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] WireError),

    /// An incomplete heap was abandoned.
    #[error("heap {cnt} truncated ({received} of {size} bytes received)")]
    TruncatedHeap { cnt: u64, received: u64, size: u64 },

    /// The heap has more item pointers than packets can carry alongside payload.
    #[error("{pointers} item pointers do not fit packets of {max_packet_size} bytes")]
    TooManyPointers {
        pointers: usize,
        max_packet_size: usize,
    },

    /// The maximum packet size cannot hold a packet header.
    #[error("max packet size {max_packet_size} is below the minimum of {min}")]
    PacketTooSmall { max_packet_size: usize, min: usize },

    /// An announced heap exceeds the configured size limit.
    #[error("heap too large ({size} bytes, max {max})")]
    HeapTooLarge { size: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, HeapError>;
