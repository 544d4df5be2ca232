//! Send-side heaps and receive-side frozen heaps.

use bytes::Bytes;
use heapstream_wire::{ItemPointer, CTRL_STREAM_STOP};

use crate::descriptor::Descriptor;
use crate::error::{HeapError, Result};
use crate::ItemId;

/// Largest value that can travel inside an item pointer (40 bits).
pub const MAX_IMMEDIATE_SIZE: usize = 5;

/// One item value queued in a [`Heap`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeapItem {
    pub id: ItemId,
    /// Item version the value was taken from; 0 for hand-built heaps.
    pub version: u64,
    pub value: Bytes,
    /// Send inside the item pointer when the value fits 40 bits.
    pub allow_immediate: bool,
}

impl HeapItem {
    /// Whether this value travels in its pointer instead of the payload.
    pub fn is_immediate(&self) -> bool {
        self.allow_immediate && !self.value.is_empty() && self.value.len() <= MAX_IMMEDIATE_SIZE
    }
}

/// A heap under construction on the send side.
///
/// Descriptors are laid out before item values. The heap counter is usually
/// left unset and assigned by the send stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    cnt: Option<u64>,
    descriptors: Vec<Descriptor>,
    items: Vec<HeapItem>,
    end_of_stream: bool,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A heap carrying only the end-of-stream marker.
    pub fn end() -> Self {
        Self {
            end_of_stream: true,
            ..Self::default()
        }
    }

    /// Pin the heap counter instead of letting the stream assign one.
    pub fn with_cnt(mut self, cnt: u64) -> Self {
        self.cnt = Some(cnt);
        self
    }

    pub fn set_cnt(&mut self, cnt: u64) {
        self.cnt = Some(cnt);
    }

    pub fn add_descriptor(&mut self, descriptor: Descriptor) {
        self.descriptors.push(descriptor);
    }

    /// Add an addressed item value.
    pub fn add_item(&mut self, id: ItemId, value: impl Into<Bytes>) {
        self.items.push(HeapItem {
            id,
            version: 0,
            value: value.into(),
            allow_immediate: false,
        });
    }

    /// Add an item value that may travel inside its item pointer.
    pub fn add_immediate(&mut self, id: ItemId, value: impl Into<Bytes>) {
        self.items.push(HeapItem {
            id,
            version: 0,
            value: value.into(),
            allow_immediate: true,
        });
    }

    pub(crate) fn push_item(&mut self, item: HeapItem) {
        self.items.push(item);
    }

    /// Mark this heap as the last one in the stream.
    pub fn add_end(&mut self) {
        self.end_of_stream = true;
    }

    pub fn cnt(&self) -> Option<u64> {
        self.cnt
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn items(&self) -> &[HeapItem] {
        &self.items
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// True if the heap has no descriptors, no values and no end marker.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty() && self.items.is_empty() && !self.end_of_stream
    }
}

/// One item value as it arrived in a reassembled heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub id: ItemId,
    /// Raw bytes. Immediate values are the 5 low bytes of the pointer.
    pub value: Bytes,
    pub immediate: bool,
}

/// A fully reassembled heap.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenHeap {
    cnt: u64,
    descriptors: Vec<Descriptor>,
    items: Vec<RawItem>,
    end_of_stream: bool,
}

impl FrozenHeap {
    pub(crate) fn new(
        cnt: u64,
        descriptors: Vec<Descriptor>,
        items: Vec<RawItem>,
        end_of_stream: bool,
    ) -> Self {
        Self {
            cnt,
            descriptors,
            items,
            end_of_stream,
        }
    }

    pub fn cnt(&self) -> u64 {
        self.cnt
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Item values in the order the sender laid them out.
    pub fn items(&self) -> &[RawItem] {
        &self.items
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// True for a heap that carries the end marker and nothing else.
    pub fn is_end_only(&self) -> bool {
        self.end_of_stream && self.items.is_empty() && self.descriptors.is_empty()
    }
}

/// Resolve item pointers against a payload.
///
/// `pointers` must be in the sender's order. The length of an addressed value
/// runs to the next addressed pointer, or to the end of the payload for the
/// last one. `STREAM_CTRL` pointers are left to the caller.
pub(crate) fn resolve_values(pointers: &[ItemPointer], payload: &Bytes) -> Result<Vec<RawItem>> {
    let addressed: Vec<u64> = pointers
        .iter()
        .filter(|pointer| !pointer.immediate)
        .map(|pointer| pointer.value)
        .collect();
    let end = payload.len() as u64;

    let mut values = Vec::with_capacity(pointers.len());
    let mut next_addressed = 0usize;
    for pointer in pointers {
        if pointer.immediate {
            values.push(RawItem {
                id: pointer.id,
                value: Bytes::copy_from_slice(&pointer.immediate_bytes()),
                immediate: true,
            });
            continue;
        }

        next_addressed += 1;
        let start = pointer.value;
        let stop = addressed.get(next_addressed).copied().unwrap_or(end);
        if start > stop || stop > end {
            return Err(HeapError::MalformedHeap(format!(
                "item 0x{:x} spans {start}..{stop} outside payload of {end} bytes",
                pointer.id
            )));
        }
        values.push(RawItem {
            id: pointer.id,
            value: payload.slice(start as usize..stop as usize),
            immediate: false,
        });
    }
    Ok(values)
}

/// True if the pointer is the stream-stop control item.
pub(crate) fn is_stop(pointer: &ItemPointer) -> bool {
    pointer.id == heapstream_wire::STREAM_CTRL
        && pointer.immediate
        && pointer.value == CTRL_STREAM_STOP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_heap_has_only_the_marker() {
        let heap = Heap::end();
        assert!(heap.is_end_of_stream());
        assert!(heap.items().is_empty());
        assert!(heap.descriptors().is_empty());
        assert!(!heap.is_empty());
        assert!(Heap::new().is_empty());
    }

    #[test]
    fn immediate_only_for_small_values() {
        let mut heap = Heap::new();
        heap.add_immediate(0x1000, vec![1u8, 2, 3, 4]);
        heap.add_immediate(0x1001, vec![0u8; 6]);
        heap.add_immediate(0x1002, Vec::<u8>::new());
        heap.add_item(0x1003, vec![1u8]);

        let flags: Vec<bool> = heap.items().iter().map(HeapItem::is_immediate).collect();
        assert_eq!(flags, vec![true, false, false, false]);
    }

    #[test]
    fn resolve_slices_in_pointer_order() {
        let payload = Bytes::from_static(b"aaabbbbcc");
        let pointers = [
            ItemPointer::addressed(0x1000, 0),
            ItemPointer::immediate(0x1001, 0xDEAD_BEEF),
            ItemPointer::addressed(0x1002, 3),
            ItemPointer::addressed(0x1003, 7),
        ];
        let values = resolve_values(&pointers, &payload).unwrap();

        assert_eq!(values[0].value.as_ref(), b"aaa");
        assert_eq!(values[1].value.as_ref(), &[0x00, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(values[1].immediate);
        assert_eq!(values[2].value.as_ref(), b"bbbb");
        assert_eq!(values[3].value.as_ref(), b"cc");
    }

    #[test]
    fn resolve_handles_empty_values() {
        let payload = Bytes::from_static(b"xy");
        let pointers = [
            ItemPointer::addressed(0x1000, 0),
            ItemPointer::addressed(0x1001, 0),
            ItemPointer::addressed(0x1002, 2),
        ];
        let values = resolve_values(&pointers, &payload).unwrap();
        assert!(values[0].value.is_empty());
        assert_eq!(values[1].value.as_ref(), b"xy");
        assert!(values[2].value.is_empty());
    }

    #[test]
    fn resolve_rejects_backwards_addresses() {
        let payload = Bytes::from_static(b"abcd");
        let pointers = [
            ItemPointer::addressed(0x1000, 3),
            ItemPointer::addressed(0x1001, 1),
        ];
        let err = resolve_values(&pointers, &payload).unwrap_err();
        assert!(matches!(err, HeapError::MalformedHeap(_)));
    }
}
