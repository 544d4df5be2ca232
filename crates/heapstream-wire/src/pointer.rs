use crate::ids::MAX_ITEM_ID;

/// Size of one item pointer on the wire.
pub const ITEM_POINTER_SIZE: usize = 8;

/// Width of immediate values and payload addresses.
pub const HEAP_ADDRESS_BITS: u32 = 40;

/// Largest immediate value or payload address.
pub const MAX_ADDRESS: u64 = (1 << HEAP_ADDRESS_BITS) - 1;

const IMMEDIATE_FLAG: u64 = 1 << 63;

/// One 64-bit item pointer.
///
/// ```text
/// ┌───────────┬──────────────────┬──────────────────────────────┐
/// │ Mode (1b) │ Item id (23b)    │ Value or address (40b)       │
/// │ 1 = imm.  │                  │                              │
/// └───────────┴──────────────────┴──────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemPointer {
    /// Item id.
    pub id: u64,
    /// Whether `value` is the item value itself rather than a payload address.
    pub immediate: bool,
    /// Immediate value or payload address.
    pub value: u64,
}

impl ItemPointer {
    /// Pointer carrying its value inline.
    pub const fn immediate(id: u64, value: u64) -> Self {
        Self {
            id,
            immediate: true,
            value,
        }
    }

    /// Pointer referring to a byte offset in the heap payload.
    pub const fn addressed(id: u64, address: u64) -> Self {
        Self {
            id,
            immediate: false,
            value: address,
        }
    }

    /// Pack into the 64-bit wire representation. Out-of-range fields are masked.
    pub const fn to_raw(self) -> u64 {
        let mode = if self.immediate { IMMEDIATE_FLAG } else { 0 };
        mode | ((self.id & MAX_ITEM_ID) << HEAP_ADDRESS_BITS) | (self.value & MAX_ADDRESS)
    }

    /// Unpack from the 64-bit wire representation.
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            id: (raw >> HEAP_ADDRESS_BITS) & MAX_ITEM_ID,
            immediate: raw & IMMEDIATE_FLAG != 0,
            value: raw & MAX_ADDRESS,
        }
    }

    /// The immediate value as big-endian bytes, as an item value would carry it.
    pub fn immediate_bytes(self) -> [u8; 5] {
        let be = self.value.to_be_bytes();
        [be[3], be[4], be[5], be[6], be[7]]
    }
}
