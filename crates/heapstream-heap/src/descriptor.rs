//! Item descriptors and their embedded-heap encoding.
//!
//! A descriptor travels as the value of a `DESCRIPTOR` item: a complete
//! single-packet heap whose items are the descriptor fields.
//!
//! ```text
//! shape  : 6 bytes per dimension   [flags (1B)][size (5B BE)]
//! format : 4 bytes per field       [code (1B)][bits (3B BE)]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use heapstream_wire::{
    decode_packet, encode_packet, ItemPointer, PacketHeader, DESCRIPTOR_DESCRIPTION,
    DESCRIPTOR_DTYPE, DESCRIPTOR_FORMAT, DESCRIPTOR_ID, DESCRIPTOR_NAME, DESCRIPTOR_SHAPE,
    MAX_ADDRESS,
};

use crate::dtype::DType;
use crate::error::{HeapError, Result};
use crate::heap::resolve_values;
use crate::ItemId;

const SHAPE_ENTRY_SIZE: usize = 6;
const FORMAT_ENTRY_SIZE: usize = 4;
const DESCRIPTOR_HEAP_CNT: u64 = 1;

/// Immutable metadata describing an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    /// Dimension sizes; empty for a scalar.
    pub shape: Vec<u64>,
    pub dtype: DType,
}

impl Descriptor {
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        description: impl Into<String>,
        shape: Vec<u64>,
        dtype: DType,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            shape,
            dtype,
        }
    }

    /// Number of elements (1 for a scalar).
    pub fn element_count(&self) -> usize {
        self.shape.iter().fold(1usize, |acc, &dim| {
            acc.saturating_mul(usize::try_from(dim).unwrap_or(usize::MAX))
        })
    }

    /// Byte length a value for this item must have.
    pub fn size_bytes(&self) -> usize {
        self.element_count().saturating_mul(self.dtype.size())
    }

    pub fn is_scalar(&self) -> bool {
        self.element_count() == 1
    }

    /// Encode as a single-packet descriptor heap.
    pub fn encode(&self) -> Result<Bytes> {
        let mut shape = BytesMut::with_capacity(self.shape.len() * SHAPE_ENTRY_SIZE);
        for &dim in &self.shape {
            if dim > MAX_ADDRESS {
                return Err(HeapError::InvalidShape {
                    id: self.id,
                    shape: self.shape.clone(),
                });
            }
            shape.put_u8(0);
            shape.put_slice(&dim.to_be_bytes()[3..]);
        }

        let mut format = BytesMut::with_capacity(FORMAT_ENTRY_SIZE);
        format.put_u8(self.dtype.code());
        format.put_slice(&self.dtype.bits().to_be_bytes()[1..]);

        let name = self.name.as_bytes();
        let description = self.description.as_bytes();
        let mut offset = 0u64;
        let mut next = |len: usize| {
            let at = offset;
            offset += len as u64;
            at
        };
        let pointers = [
            ItemPointer::immediate(DESCRIPTOR_ID, self.id),
            ItemPointer::addressed(DESCRIPTOR_NAME, next(name.len())),
            ItemPointer::addressed(DESCRIPTOR_DESCRIPTION, next(description.len())),
            ItemPointer::addressed(DESCRIPTOR_SHAPE, next(shape.len())),
            ItemPointer::addressed(DESCRIPTOR_FORMAT, next(format.len())),
        ];

        let mut payload =
            BytesMut::with_capacity(name.len() + description.len() + shape.len() + format.len());
        payload.put_slice(name);
        payload.put_slice(description);
        payload.put_slice(&shape);
        payload.put_slice(&format);

        let header = PacketHeader {
            heap_cnt: DESCRIPTOR_HEAP_CNT,
            heap_size: Some(payload.len() as u64),
            heap_offset: 0,
        };
        let mut out = BytesMut::new();
        encode_packet(&header, &pointers, &payload, &mut out)?;
        Ok(out.freeze())
    }

    /// Decode a descriptor heap.
    pub fn decode(blob: Bytes) -> Result<Self> {
        let packet = decode_packet(blob)?;
        if packet.header.heap_offset != 0
            || packet
                .header
                .heap_size
                .is_some_and(|size| size != packet.payload.len() as u64)
        {
            return Err(malformed("descriptor does not fit a single packet"));
        }

        let mut id = None;
        let mut name = String::new();
        let mut description = String::new();
        let mut shape = Vec::new();
        let mut dtype = None;
        let mut has_numpy_header = false;

        for field in resolve_values(&packet.pointers, &packet.payload)? {
            match field.id {
                DESCRIPTOR_ID => id = Some(bytes_to_u64(&field.value)),
                DESCRIPTOR_NAME => name = String::from_utf8_lossy(&field.value).into_owned(),
                DESCRIPTOR_DESCRIPTION => {
                    description = String::from_utf8_lossy(&field.value).into_owned();
                }
                DESCRIPTOR_SHAPE => shape = decode_shape(field.value)?,
                DESCRIPTOR_FORMAT => dtype = Some(decode_format(field.value)?),
                DESCRIPTOR_DTYPE => has_numpy_header = true,
                _ => {}
            }
        }

        let id = id.ok_or_else(|| malformed("descriptor without an item id"))?;
        let dtype = match dtype {
            Some(dtype) => dtype,
            None if has_numpy_header => {
                return Err(malformed(format!(
                    "descriptor 0x{id:x} only carries a numpy dtype header"
                )));
            }
            None => return Err(malformed(format!("descriptor 0x{id:x} has no format"))),
        };

        Ok(Self {
            id,
            name,
            description,
            shape,
            dtype,
        })
    }
}

fn decode_shape(mut raw: Bytes) -> Result<Vec<u64>> {
    if raw.len() % SHAPE_ENTRY_SIZE != 0 {
        return Err(malformed(format!("shape field of {} bytes", raw.len())));
    }
    let mut shape = Vec::with_capacity(raw.len() / SHAPE_ENTRY_SIZE);
    while raw.has_remaining() {
        let flags = raw.get_u8();
        if flags != 0 {
            return Err(malformed("variable-length dimensions are not supported"));
        }
        shape.push(raw.get_uint(SHAPE_ENTRY_SIZE - 1));
    }
    Ok(shape)
}

fn decode_format(mut raw: Bytes) -> Result<DType> {
    if raw.len() != FORMAT_ENTRY_SIZE {
        return Err(malformed(format!(
            "format field of {} bytes (only single-field formats are supported)",
            raw.len()
        )));
    }
    let code = raw.get_u8();
    let bits = raw.get_uint(FORMAT_ENTRY_SIZE - 1) as u32;
    DType::from_format(code, bits).ok_or_else(|| {
        malformed(format!(
            "unsupported format '{}' with {bits} bits",
            char::from(code)
        ))
    })
}

fn bytes_to_u64(raw: &[u8]) -> u64 {
    let start = raw.len().saturating_sub(8);
    raw[start..]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn malformed(reason: impl Into<String>) -> HeapError {
    HeapError::MalformedHeap(reason.into())
}

#[cfg(test)]
mod tests {
    use heapstream_wire::HEADER_SIZE;

    use super::*;

    fn matrix() -> Descriptor {
        Descriptor::new(0x1001, "matrix", "a matrix of integers", vec![4, 4], DType::I32)
    }

    #[test]
    fn sizes_follow_shape() {
        assert_eq!(matrix().element_count(), 16);
        assert_eq!(matrix().size_bytes(), 64);

        let scalar = Descriptor::new(0x1000, "cat", "", vec![], DType::U32);
        assert!(scalar.is_scalar());
        assert_eq!(scalar.size_bytes(), 4);

        let empty = Descriptor::new(0x1002, "none", "", vec![0], DType::U8);
        assert_eq!(empty.size_bytes(), 0);
    }

    #[test]
    fn encode_then_decode() {
        let blob = matrix().encode().unwrap();
        assert_eq!(Descriptor::decode(blob).unwrap(), matrix());
    }

    #[test]
    fn shape_and_format_layout() {
        let blob = matrix().encode().unwrap();
        // name + description + 2 shape entries + 1 format entry
        let payload_len = 6 + 20 + 12 + 4;
        let payload = &blob[blob.len() - payload_len..];

        assert_eq!(&payload[26..32], &[0, 0, 0, 0, 0, 4]);
        assert_eq!(&payload[32..38], &[0, 0, 0, 0, 0, 4]);
        assert_eq!(&payload[38..], &[b'i', 0, 0, 32]);
        assert_eq!(blob.len(), HEADER_SIZE + 9 * 8 + payload_len);
    }

    #[test]
    fn decode_accepts_char_format() {
        let descriptor = Descriptor::new(0x1002, "string", "", vec![14], DType::U8);
        let blob = descriptor.encode().unwrap();
        let mut raw = BytesMut::from(blob.as_ref());
        let last = raw.len() - 4;
        raw[last] = b'c';

        assert_eq!(Descriptor::decode(raw.freeze()).unwrap(), descriptor);
    }

    #[test]
    fn decode_rejects_variable_dimension() {
        let blob = matrix().encode().unwrap();
        let mut raw = BytesMut::from(blob.as_ref());
        let shape_start = raw.len() - 4 - 12;
        raw[shape_start] = 2;

        let err = Descriptor::decode(raw.freeze()).unwrap_err();
        assert!(matches!(err, HeapError::MalformedHeap(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Descriptor::decode(Bytes::from_static(b"not a descriptor")).unwrap_err();
        assert!(matches!(err, HeapError::MalformedPacket(_)));
    }

    #[test]
    fn encode_rejects_huge_dimension() {
        let descriptor = Descriptor::new(0x1000, "big", "", vec![MAX_ADDRESS + 1], DType::U8);
        assert!(matches!(
            descriptor.encode(),
            Err(HeapError::InvalidShape { .. })
        ));
    }
}
