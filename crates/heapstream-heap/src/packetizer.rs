//! Splits a heap into packets.
//!
//! Every packet repeats the four packet-level immediates; heap-level item
//! pointers are spread over the leading packets, as many per packet as fit
//! while leaving room for at least one payload byte. The heap payload is the
//! concatenation of descriptor blobs and addressed item values in pointer
//! order.

use std::ops::Range;

use bytes::{Bytes, BytesMut};
use heapstream_wire::{
    encode_packet, packet_overhead, ItemPointer, PacketHeader, WireError, CTRL_STREAM_STOP,
    DESCRIPTOR, ITEM_POINTER_SIZE, MAX_ADDRESS, MAX_PACKET_POINTERS, STREAM_CTRL,
};

use crate::error::{HeapError, Result};
use crate::heap::Heap;

/// One packet's share of pointers and payload.
#[derive(Debug, Clone)]
struct Slot {
    pointers: Range<usize>,
    payload: Range<usize>,
}

/// Iterator over the encoded packets of one heap.
///
/// Packets are encoded up front, so every layout or encoding failure is
/// reported by [`PacketGenerator::new`].
#[derive(Debug)]
pub struct PacketGenerator {
    packets: std::vec::IntoIter<Bytes>,
    count: usize,
    heap_size: usize,
}

impl PacketGenerator {
    /// Lay out `heap` under counter `cnt` in packets of at most
    /// `max_packet_size` bytes.
    pub fn new(heap: &Heap, cnt: u64, max_packet_size: usize) -> Result<Self> {
        let min = packet_overhead(0);
        if max_packet_size < min {
            return Err(HeapError::PacketTooSmall {
                max_packet_size,
                min,
            });
        }
        if cnt > MAX_ADDRESS {
            return Err(WireError::ValueOutOfRange {
                field: "heap_cnt",
                value: cnt,
            }
            .into());
        }

        let mut pointers = Vec::with_capacity(heap.descriptors().len() + heap.items().len() + 1);
        let mut payload = BytesMut::new();
        for descriptor in heap.descriptors() {
            let blob = descriptor.encode()?;
            pointers.push(ItemPointer::addressed(DESCRIPTOR, payload.len() as u64));
            payload.extend_from_slice(&blob);
        }
        for item in heap.items() {
            if item.is_immediate() {
                let value = item
                    .value
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
                pointers.push(ItemPointer::immediate(item.id, value));
            } else {
                pointers.push(ItemPointer::addressed(item.id, payload.len() as u64));
                payload.extend_from_slice(&item.value);
            }
        }
        if heap.is_end_of_stream() {
            pointers.push(ItemPointer::immediate(STREAM_CTRL, CTRL_STREAM_STOP));
        }

        if payload.len() as u64 > MAX_ADDRESS {
            return Err(HeapError::HeapTooLarge {
                size: payload.len() as u64,
                max: MAX_ADDRESS,
            });
        }

        let plan = plan_packets(pointers.len(), payload.len(), max_packet_size)?;
        let mut packets = Vec::with_capacity(plan.len());
        for slot in plan {
            let header = PacketHeader {
                heap_cnt: cnt,
                heap_size: Some(payload.len() as u64),
                heap_offset: slot.payload.start as u64,
            };
            let mut buf =
                BytesMut::with_capacity(packet_overhead(slot.pointers.len()) + slot.payload.len());
            encode_packet(
                &header,
                &pointers[slot.pointers],
                &payload[slot.payload],
                &mut buf,
            )?;
            packets.push(buf.freeze());
        }

        Ok(Self {
            count: packets.len(),
            heap_size: payload.len(),
            packets: packets.into_iter(),
        })
    }

    /// Number of packets this heap occupies.
    pub fn packet_count(&self) -> usize {
        self.count
    }

    /// Total heap payload size.
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }
}

impl Iterator for PacketGenerator {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.packets.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.packets.size_hint()
    }
}

impl ExactSizeIterator for PacketGenerator {}

fn plan_packets(
    n_pointers: usize,
    payload_len: usize,
    max_packet_size: usize,
) -> Result<Vec<Slot>> {
    let room = max_packet_size - packet_overhead(0);
    let too_many = || HeapError::TooManyPointers {
        pointers: n_pointers,
        max_packet_size,
    };

    let mut plan = Vec::new();
    let mut next_pointer = 0usize;
    let mut offset = 0usize;
    loop {
        let pointers_left = n_pointers - next_pointer;
        let payload_left = payload_len - offset;
        let reserve = usize::from(payload_left > 0);
        let take = pointers_left
            .min(room.saturating_sub(reserve) / ITEM_POINTER_SIZE)
            .min(MAX_PACKET_POINTERS);
        let chunk = payload_left.min(room - take * ITEM_POINTER_SIZE);

        if chunk == 0 && !plan.is_empty() {
            // Pointers left over once the payload ran out.
            return Err(too_many());
        }
        plan.push(Slot {
            pointers: next_pointer..next_pointer + take,
            payload: offset..offset + chunk,
        });
        next_pointer += take;
        offset += chunk;

        if next_pointer == n_pointers && offset == payload_len {
            return Ok(plan);
        }
        if chunk == 0 {
            return Err(too_many());
        }
    }
}

#[cfg(test)]
mod tests {
    use heapstream_wire::{decode_packet, HEAP_OFFSET};

    use super::*;
    use crate::descriptor::Descriptor;
    use crate::dtype::DType;

    fn single_item(len: usize) -> Heap {
        let mut heap = Heap::new();
        heap.add_item(0x1000, vec![0xAB; len]);
        heap
    }

    #[test]
    fn exact_fit_is_one_packet() {
        let heap = single_item(100);
        let max = packet_overhead(1) + 100;
        let packets: Vec<Bytes> = PacketGenerator::new(&heap, 1, max).unwrap().collect();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), max);
    }

    #[test]
    fn one_byte_short_splits_in_two() {
        let heap = single_item(100);
        let max = packet_overhead(1) + 99;
        let packets: Vec<_> = PacketGenerator::new(&heap, 1, max)
            .unwrap()
            .map(|bytes| decode_packet(bytes).unwrap())
            .collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].header.heap_offset, 0);
        assert_eq!(packets[0].payload.len(), 99);
        assert_eq!(packets[0].pointers.len(), 1);
        assert_eq!(packets[1].header.heap_offset, 99);
        assert_eq!(packets[1].payload.len(), 1);
        assert!(packets[1].pointers.is_empty());
        assert!(packets.iter().all(|p| p.header.heap_size == Some(100)));
    }

    #[test]
    fn packets_respect_max_size() {
        let mut heap = Heap::new();
        heap.add_descriptor(Descriptor::new(0x1000, "cat", "a cat", vec![], DType::U32));
        heap.add_item(0x1000, vec![1u8; 4]);
        heap.add_item(0x1001, vec![2u8; 5000]);
        let generator = PacketGenerator::new(&heap, 3, 1472).unwrap();
        let heap_size = generator.heap_size();
        let packets: Vec<_> = generator.collect();

        assert!(packets.iter().all(|p| p.len() <= 1472));
        let total: usize = packets
            .iter()
            .map(|p| decode_packet(p.clone()).unwrap().payload.len())
            .sum();
        assert_eq!(total, heap_size);
    }

    #[test]
    fn pointers_spread_over_leading_packets() {
        let mut heap = Heap::new();
        for id in 0..10u64 {
            heap.add_item(0x1000 + id, vec![id as u8; 10]);
        }
        // Room for three heap pointers plus one payload byte.
        let max = packet_overhead(3) + 1;
        let packets: Vec<_> = PacketGenerator::new(&heap, 1, max)
            .unwrap()
            .map(|bytes| decode_packet(bytes).unwrap())
            .collect();

        let pointer_counts: Vec<usize> =
            packets.iter().take(5).map(|p| p.pointers.len()).collect();
        assert_eq!(pointer_counts, vec![3, 3, 3, 1, 0]);
        assert!(packets.iter().all(|p| !p.payload.is_empty()));
        assert!(packets.iter().all(|p| p
            .pointers
            .iter()
            .all(|pointer| pointer.id != HEAP_OFFSET)));
    }

    #[test]
    fn end_marker_fits_one_packet() {
        let packets: Vec<_> = PacketGenerator::new(&Heap::end(), 9, 1472)
            .unwrap()
            .map(|bytes| decode_packet(bytes).unwrap())
            .collect();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header.heap_size, Some(0));
        assert_eq!(
            packets[0].pointers,
            vec![ItemPointer::immediate(STREAM_CTRL, CTRL_STREAM_STOP)]
        );
    }

    #[test]
    fn immediate_values_stay_out_of_payload() {
        let mut heap = Heap::new();
        heap.add_immediate(0x1000, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let packets: Vec<_> = PacketGenerator::new(&heap, 1, 1472)
            .unwrap()
            .map(|bytes| decode_packet(bytes).unwrap())
            .collect();

        assert_eq!(packets[0].header.heap_size, Some(0));
        assert_eq!(
            packets[0].pointers,
            vec![ItemPointer::immediate(0x1000, 0xDEAD_BEEF)]
        );
    }

    #[test]
    fn too_many_pointers_rejected() {
        let mut heap = Heap::new();
        for id in 0..4u64 {
            heap.add_immediate(0x1000 + id, vec![1u8]);
        }
        heap.add_item(0x2000, vec![0u8; 1]);
        // Two pointers per packet at most, and a single payload byte.
        let max = packet_overhead(2) + 1;
        assert!(matches!(
            PacketGenerator::new(&heap, 1, max),
            Err(HeapError::TooManyPointers { pointers: 5, .. })
        ));
    }

    #[test]
    fn tiny_packets_rejected() {
        assert!(matches!(
            PacketGenerator::new(&single_item(1), 1, packet_overhead(0) - 1),
            Err(HeapError::PacketTooSmall { .. })
        ));
    }

    #[test]
    fn pointer_count_capped_per_packet() {
        let n = MAX_PACKET_POINTERS + 10;
        let mut heap = Heap::new();
        for id in 0..n as u64 {
            heap.add_item(0x1000 + id, vec![id as u8; 10]);
        }
        // The first packet fills up on pointers; the rest spill into the second.
        let generator = PacketGenerator::new(&heap, 1, 1 << 20).unwrap();
        let expected = generator.packet_count();
        let packets: Vec<_> = generator
            .map(|bytes| decode_packet(bytes).unwrap())
            .collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets.len(), expected);
        assert_eq!(packets[0].pointers.len(), MAX_PACKET_POINTERS);
        assert_eq!(packets[1].pointers.len(), 10);
        assert_eq!(packets[1].header.heap_offset, packets[0].payload.len() as u64);
    }

    #[test]
    fn pointer_overflow_without_payload_is_rejected() {
        let mut heap = Heap::new();
        for id in 0..70_000u64 {
            heap.add_immediate(0x1000 + id, vec![1u8]);
        }
        assert!(matches!(
            PacketGenerator::new(&heap, 1, 1 << 20),
            Err(HeapError::TooManyPointers { pointers: 70_000, .. })
        ));
    }
}
