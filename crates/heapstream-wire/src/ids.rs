//! Protocol-defined item ids.
//!
//! Ids `0x01..=0x06` describe packets and heaps, ids `0x10..=0x15` describe
//! the fields of an item descriptor. Everything else up to [`MAX_ITEM_ID`]
//! is available to applications; by convention user items start at `0x1000`.

/// Heap counter (immediate). Identifies the heap a packet belongs to.
pub const HEAP_CNT: u64 = 0x01;

/// Total heap payload size in bytes (immediate).
pub const HEAP_SIZE: u64 = 0x02;

/// Offset of this packet's payload within the heap (immediate).
pub const HEAP_OFFSET: u64 = 0x03;

/// Number of payload bytes carried by this packet (immediate).
pub const PAYLOAD_LENGTH: u64 = 0x04;

/// Embedded item descriptor (addressed).
pub const DESCRIPTOR: u64 = 0x05;

/// Stream control command (immediate).
pub const STREAM_CTRL: u64 = 0x06;

/// Descriptor field: item name.
pub const DESCRIPTOR_NAME: u64 = 0x10;

/// Descriptor field: item description.
pub const DESCRIPTOR_DESCRIPTION: u64 = 0x11;

/// Descriptor field: item shape.
pub const DESCRIPTOR_SHAPE: u64 = 0x12;

/// Descriptor field: element format.
pub const DESCRIPTOR_FORMAT: u64 = 0x13;

/// Descriptor field: id of the described item (immediate).
pub const DESCRIPTOR_ID: u64 = 0x14;

/// Descriptor field: numpy-style dtype header.
pub const DESCRIPTOR_DTYPE: u64 = 0x15;

/// `STREAM_CTRL` value: stream start.
pub const CTRL_STREAM_START: u64 = 0;

/// `STREAM_CTRL` value: receiver asks for descriptors again.
pub const CTRL_DESCRIPTOR_REISSUE: u64 = 1;

/// `STREAM_CTRL` value: end of stream.
pub const CTRL_STREAM_STOP: u64 = 2;

/// `STREAM_CTRL` value: descriptors changed.
pub const CTRL_DESCRIPTOR_UPDATE: u64 = 3;

/// Largest id representable in a 64-40 item pointer (23 bits).
pub const MAX_ITEM_ID: u64 = (1 << 23) - 1;

/// Returns a human-readable name for an item id.
pub fn id_name(id: u64) -> &'static str {
    match id {
        HEAP_CNT => "HEAP_CNT",
        HEAP_SIZE => "HEAP_SIZE",
        HEAP_OFFSET => "HEAP_OFFSET",
        PAYLOAD_LENGTH => "PAYLOAD_LENGTH",
        DESCRIPTOR => "DESCRIPTOR",
        STREAM_CTRL => "STREAM_CTRL",
        DESCRIPTOR_NAME => "DESCRIPTOR_NAME",
        DESCRIPTOR_DESCRIPTION => "DESCRIPTOR_DESCRIPTION",
        DESCRIPTOR_SHAPE => "DESCRIPTOR_SHAPE",
        DESCRIPTOR_FORMAT => "DESCRIPTOR_FORMAT",
        DESCRIPTOR_ID => "DESCRIPTOR_ID",
        DESCRIPTOR_DTYPE => "DESCRIPTOR_DTYPE",
        0 => "NULL",
        _ => "USER",
    }
}

/// Returns true if the id has a protocol-defined meaning.
pub fn is_reserved(id: u64) -> bool {
    matches!(id, 0..=STREAM_CTRL | DESCRIPTOR_NAME..=DESCRIPTOR_DTYPE)
}

/// Returns true if the id may be used for an application item.
pub fn is_valid_item_id(id: u64) -> bool {
    !is_reserved(id) && id <= MAX_ITEM_ID
}
