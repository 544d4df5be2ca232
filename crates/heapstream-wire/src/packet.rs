use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::ids::{id_name, HEAP_CNT, HEAP_OFFSET, HEAP_SIZE, PAYLOAD_LENGTH};
use crate::pointer::{ItemPointer, ITEM_POINTER_SIZE, MAX_ADDRESS};

/// Packet header: magic, version, widths, reserved (2), item count (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic byte: 'S' (0x53).
pub const MAGIC: u8 = 0x53;

/// Protocol version.
pub const VERSION: u8 = 4;

/// Item-pointer width field for the 64-40 flavour (64 - 40 bits = 3 bytes of id).
const ITEM_POINTER_WIDTH: u8 = 3;

/// Heap-address width field for the 64-40 flavour (40 bits = 5 bytes).
const HEAP_ADDRESS_WIDTH: u8 = 5;

/// Packet-level pointers emitted in every packet: cnt, size, offset, length.
pub const STANDARD_POINTERS: usize = 4;

/// Heap-level pointers one packet can carry next to the packet-level ones.
pub const MAX_PACKET_POINTERS: usize = u16::MAX as usize - STANDARD_POINTERS;

/// Packet-level fields describing where a fragment sits in its heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    /// Heap counter.
    pub heap_cnt: u64,
    /// Total heap payload size, when announced.
    pub heap_size: Option<u64>,
    /// Offset of this packet's payload in the heap payload.
    pub heap_offset: u64,
}

/// A decoded packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet-level fields.
    pub header: PacketHeader,
    /// Heap-level item pointers, in wire order. Packet-level pointers are
    /// folded into `header` and not repeated here.
    pub pointers: Vec<ItemPointer>,
    /// This packet's slice of the heap payload.
    pub payload: Bytes,
}

impl Packet {
    /// The total wire size of this packet.
    pub fn wire_size(&self) -> usize {
        let standard = if self.header.heap_size.is_some() {
            STANDARD_POINTERS
        } else {
            STANDARD_POINTERS - 1
        };
        HEADER_SIZE + (standard + self.pointers.len()) * ITEM_POINTER_SIZE + self.payload.len()
    }
}

/// Bytes taken by header and pointers of a packet carrying `n_pointers`
/// heap-level pointers (plus the four packet-level ones).
pub const fn packet_overhead(n_pointers: usize) -> usize {
    HEADER_SIZE + (STANDARD_POINTERS + n_pointers) * ITEM_POINTER_SIZE
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬─────────┬─────┬──────┬──────────┬────────────┬─────────────────┬──────────┐
/// │ 0x53 │ Version │ 3   │ 5    │ Reserved │ Item count │ Item pointers   │ Payload  │
/// │ (1B) │ 4 (1B)  │(1B) │ (1B) │ (2B)     │ (2B BE)    │ (count × 8B BE) │          │
/// └──────┴─────────┴─────┴──────┴──────────┴────────────┴─────────────────┴──────────┘
/// ```
/// The packet-level pointers (`HEAP_CNT`, `HEAP_SIZE`, `HEAP_OFFSET`,
/// `PAYLOAD_LENGTH`) come first, followed by `pointers`.
pub fn encode_packet(
    header: &PacketHeader,
    pointers: &[ItemPointer],
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let standard = if header.heap_size.is_some() {
        STANDARD_POINTERS
    } else {
        STANDARD_POINTERS - 1
    };
    let n_items = standard + pointers.len();
    let n_items_wire = u16::try_from(n_items).map_err(|_| WireError::TooManyPointers(n_items))?;

    check_range("heap_cnt", header.heap_cnt)?;
    check_range("heap_offset", header.heap_offset)?;
    if let Some(size) = header.heap_size {
        check_range("heap_size", size)?;
    }
    let payload_length = payload.len() as u64;
    check_range("payload_length", payload_length)?;

    dst.reserve(HEADER_SIZE + n_items * ITEM_POINTER_SIZE + payload.len());
    dst.put_u8(MAGIC);
    dst.put_u8(VERSION);
    dst.put_u8(ITEM_POINTER_WIDTH);
    dst.put_u8(HEAP_ADDRESS_WIDTH);
    dst.put_u16(0);
    dst.put_u16(n_items_wire);

    dst.put_u64(ItemPointer::immediate(HEAP_CNT, header.heap_cnt).to_raw());
    if let Some(size) = header.heap_size {
        dst.put_u64(ItemPointer::immediate(HEAP_SIZE, size).to_raw());
    }
    dst.put_u64(ItemPointer::immediate(HEAP_OFFSET, header.heap_offset).to_raw());
    dst.put_u64(ItemPointer::immediate(PAYLOAD_LENGTH, payload_length).to_raw());
    for pointer in pointers {
        dst.put_u64(pointer.to_raw());
    }
    dst.put_slice(payload);
    Ok(())
}

/// Decode one complete packet.
///
/// `src` must hold exactly one packet (a datagram, or a packet split off a
/// byte stream by [`split_packet`]). The payload is sliced out of `src`
/// without copying.
pub fn decode_packet(src: Bytes) -> Result<Packet> {
    if src.len() < HEADER_SIZE {
        return Err(WireError::Truncated {
            needed: HEADER_SIZE,
            available: src.len(),
        });
    }

    let n_items = check_header(&src[..HEADER_SIZE])?;
    let pointers_end = HEADER_SIZE + n_items * ITEM_POINTER_SIZE;
    if src.len() < pointers_end {
        return Err(WireError::Truncated {
            needed: pointers_end,
            available: src.len(),
        });
    }

    let mut heap_cnt = None;
    let mut heap_size = None;
    let mut heap_offset = 0;
    let mut payload_length = None;
    let mut pointers = Vec::with_capacity(n_items.saturating_sub(STANDARD_POINTERS));

    let mut cursor = &src[HEADER_SIZE..pointers_end];
    while cursor.has_remaining() {
        let pointer = ItemPointer::from_raw(cursor.get_u64());
        match pointer.id {
            HEAP_CNT | HEAP_SIZE | HEAP_OFFSET | PAYLOAD_LENGTH if !pointer.immediate => {
                return Err(WireError::NotImmediate(id_name(pointer.id)));
            }
            HEAP_CNT => heap_cnt = Some(pointer.value),
            HEAP_SIZE => heap_size = Some(pointer.value),
            HEAP_OFFSET => heap_offset = pointer.value,
            PAYLOAD_LENGTH => payload_length = Some(pointer.value),
            _ => pointers.push(pointer),
        }
    }

    let heap_cnt = heap_cnt.ok_or(WireError::MissingField("heap_cnt"))?;
    let available = src.len() - pointers_end;
    let payload_length = match payload_length {
        Some(length) => usize::try_from(length).unwrap_or(usize::MAX),
        None => available,
    };
    if payload_length > available {
        return Err(WireError::Truncated {
            needed: pointers_end.saturating_add(payload_length),
            available: src.len(),
        });
    }

    let payload = src.slice(pointers_end..pointers_end + payload_length);
    Ok(Packet {
        header: PacketHeader {
            heap_cnt,
            heap_size,
            heap_offset,
        },
        pointers,
        payload,
    })
}

/// Split one complete packet off the front of a byte-stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer. Stream framing
/// relies on `PAYLOAD_LENGTH`, so packets without it are rejected.
pub fn split_packet(src: &mut BytesMut, max_packet_size: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let n_items = check_header(&src[..HEADER_SIZE])?;
    let pointers_end = HEADER_SIZE + n_items * ITEM_POINTER_SIZE;
    if pointers_end > max_packet_size {
        return Err(WireError::PacketTooLarge {
            size: pointers_end,
            max: max_packet_size,
        });
    }
    if src.len() < pointers_end {
        return Ok(None); // Need more data
    }

    let mut cursor = &src[HEADER_SIZE..pointers_end];
    let mut payload_length = None;
    while cursor.has_remaining() {
        let pointer = ItemPointer::from_raw(cursor.get_u64());
        if pointer.id == PAYLOAD_LENGTH && pointer.immediate {
            payload_length = Some(pointer.value);
            break;
        }
    }
    let payload_length = payload_length.ok_or(WireError::MissingField("payload_length"))?;

    let total = usize::try_from(payload_length)
        .ok()
        .and_then(|length| pointers_end.checked_add(length))
        .unwrap_or(usize::MAX);
    if total > max_packet_size {
        return Err(WireError::PacketTooLarge {
            size: total,
            max: max_packet_size,
        });
    }
    if src.len() < total {
        return Ok(None); // Need more data
    }

    Ok(Some(src.split_to(total).freeze()))
}

fn check_header(header: &[u8]) -> Result<usize> {
    if header[0] != MAGIC {
        return Err(WireError::InvalidMagic(header[0]));
    }
    if header[1] != VERSION {
        return Err(WireError::UnsupportedVersion(header[1]));
    }
    if header[2] != ITEM_POINTER_WIDTH || header[3] != HEAP_ADDRESS_WIDTH {
        return Err(WireError::UnsupportedFlavour {
            item_pointer_width: header[2],
            heap_address_width: header[3],
        });
    }
    Ok(u16::from_be_bytes([header[6], header[7]]) as usize)
}

fn check_range(field: &'static str, value: u64) -> Result<()> {
    if value > MAX_ADDRESS {
        return Err(WireError::ValueOutOfRange { field, value });
    }
    Ok(())
}
