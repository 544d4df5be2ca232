use bytes::Bytes;
use heapstream_heap::{
    DType, DescriptorCadence, FrozenHeap, Heap, HeapError, HeapGenerator, ItemGroup,
    PacketGenerator, Reassembler, ReassemblerConfig,
};

fn tutorial_group() -> ItemGroup {
    let mut group = ItemGroup::new();
    group
        .add_item(0x1000, "cat", "string containing the word cat", vec![], DType::U32)
        .unwrap()
        .set_scalar(0xDEAD_BEEFu32)
        .unwrap();
    group
        .add_item(0x1001, "matrix", "a matrix of integers", vec![4, 4], DType::I32)
        .unwrap()
        .set_elements(&[0i32; 16])
        .unwrap();
    group
        .add_item(0x1002, "string", "a string", vec![16], DType::U8)
        .unwrap()
        .set_value(Bytes::from_static(b"this is a string"))
        .unwrap();
    group
}

fn packetize(heap: &Heap, cnt: u64, max_packet_size: usize) -> Vec<Bytes> {
    PacketGenerator::new(heap, cnt, max_packet_size)
        .unwrap()
        .collect()
}

/// Deterministic shuffle: interleave from both ends.
fn scramble(mut packets: Vec<Bytes>) -> Vec<Bytes> {
    let mut out = Vec::with_capacity(packets.len());
    let mut from_back = true;
    while !packets.is_empty() {
        let packet = if from_back {
            packets.pop()
        } else {
            Some(packets.remove(0))
        };
        out.extend(packet);
        from_back = !from_back;
    }
    out
}

fn receive_all(reassembler: &mut Reassembler, packets: Vec<Bytes>) -> Vec<FrozenHeap> {
    packets
        .into_iter()
        .filter_map(|packet| reassembler.add_packet(packet).ok().flatten())
        .collect()
}

#[test]
fn group_survives_the_wire() {
    let mut sender = tutorial_group();
    let mut generator = HeapGenerator::default();
    let heap = generator.get_heap(&mut sender);

    let mut reassembler = Reassembler::default();
    let heaps = receive_all(&mut reassembler, scramble(packetize(&heap, 1, 64)));
    assert_eq!(heaps.len(), 1);

    let mut receiver = ItemGroup::new();
    let updated = receiver.update(&heaps[0]).unwrap();
    assert_eq!(updated, vec![0x1000, 0x1001, 0x1002]);

    for item in sender.items() {
        let received = receiver.get(item.id()).unwrap();
        assert_eq!(received.descriptor(), item.descriptor());
        assert_eq!(received.value(), item.value());
    }
    assert_eq!(
        receiver.by_name("cat").unwrap().scalar::<u32>().unwrap(),
        0xDEAD_BEEF
    );
}

#[test]
fn later_heaps_carry_only_changes() {
    let mut sender = tutorial_group();
    let mut generator = HeapGenerator::default();
    let mut reassembler = Reassembler::default();
    let mut receiver = ItemGroup::new();

    let first = generator.get_heap(&mut sender);
    for heap in receive_all(&mut reassembler, packetize(&first, 1, 1472)) {
        receiver.update(&heap).unwrap();
    }

    sender
        .get_mut(0x1001)
        .unwrap()
        .set_elements(&(0..16).collect::<Vec<i32>>())
        .unwrap();
    let second = generator.get_heap(&mut sender);
    assert!(second.descriptors().is_empty());

    let heaps = receive_all(&mut reassembler, packetize(&second, 2, 1472));
    assert_eq!(receiver.update(&heaps[0]).unwrap(), vec![0x1001]);
    assert_eq!(
        receiver.get(0x1001).unwrap().elements::<i32>().unwrap(),
        (0..16).collect::<Vec<i32>>()
    );
    assert_eq!(receiver.get(0x1000).unwrap().version(), 1);
}

#[test]
fn immediate_items_roundtrip() {
    let mut sender = ItemGroup::new();
    let cat = sender
        .add_item(0x1000, "cat", "", vec![], DType::U32)
        .unwrap();
    cat.set_allow_immediate(true);
    cat.set_scalar(0xDEAD_BEEFu32).unwrap();

    let heap = HeapGenerator::default().get_heap(&mut sender);
    assert!(heap.items()[0].is_immediate());

    let mut reassembler = Reassembler::default();
    let heaps = receive_all(&mut reassembler, packetize(&heap, 1, 1472));
    assert!(heaps[0].items()[0].immediate);

    let mut receiver = ItemGroup::new();
    receiver.update(&heaps[0]).unwrap();
    assert_eq!(
        receiver.get(0x1000).unwrap().scalar::<u32>().unwrap(),
        0xDEAD_BEEF
    );
}

#[test]
fn interleaved_heaps_complete_independently() {
    let mut reassembler = Reassembler::default();
    let mut heaps = Vec::new();
    let mut streams: Vec<Vec<Bytes>> = (1..=3u64)
        .map(|cnt| {
            let mut heap = Heap::new();
            heap.add_item(0x1000, vec![cnt as u8; 500]);
            packetize(&heap, cnt, 128)
        })
        .collect();

    while streams.iter().any(|packets| !packets.is_empty()) {
        for packets in streams.iter_mut() {
            if !packets.is_empty() {
                let packet = packets.remove(0);
                heaps.extend(reassembler.add_packet(packet).unwrap());
            }
        }
    }

    let cnts: Vec<u64> = heaps.iter().map(FrozenHeap::cnt).collect();
    assert_eq!(cnts, vec![1, 2, 3]);
    for heap in &heaps {
        assert!(heap.items()[0]
            .value
            .iter()
            .all(|&b| u64::from(b) == heap.cnt()));
    }
}

#[test]
fn lost_fragment_heap_is_evicted_and_others_delivered() {
    let config = ReassemblerConfig {
        max_heaps: 3,
        ..ReassemblerConfig::default()
    };
    let mut reassembler = Reassembler::new(config);
    let wire: Vec<Vec<Bytes>> = (1..=5u64)
        .map(|cnt| {
            let mut heap = Heap::new();
            heap.add_item(0x1000, vec![0u8; 200]);
            packetize(&heap, cnt, 160)
        })
        .collect();
    assert!(wire.iter().all(|packets| packets.len() == 2));

    // Heap 1 loses its second packet; heaps 2-4 interleave their halves.
    let order = [
        (0, 0),
        (1, 0),
        (2, 0),
        (3, 0),
        (1, 1),
        (2, 1),
        (3, 1),
        (4, 0),
        (4, 1),
    ];
    let mut delivered = Vec::new();
    let mut truncated = Vec::new();
    for (heap, packet) in order {
        match reassembler.add_packet(wire[heap][packet].clone()) {
            Ok(Some(frozen)) => delivered.push(frozen.cnt()),
            Ok(None) => {}
            Err(HeapError::TruncatedHeap { cnt, .. }) => truncated.push(cnt),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(delivered, vec![2, 3, 4, 5]);
    assert_eq!(truncated, vec![1]);
    assert_eq!(reassembler.stats().evicted, 1);
}

#[test]
fn descriptor_cadence_reaches_late_joiners() {
    let mut sender = tutorial_group();
    let mut generator = HeapGenerator::new(DescriptorCadence::EveryNth(3));
    let mut reassembler = Reassembler::default();

    // The receiver misses the first heap entirely.
    generator.get_heap(&mut sender);

    let mut receiver = ItemGroup::new();
    for cnt in 2..=4u64 {
        sender
            .get_mut(0x1000)
            .unwrap()
            .set_scalar(cnt as u32)
            .unwrap();
        let heap = generator.get_heap(&mut sender);
        for frozen in receive_all(&mut reassembler, packetize(&heap, cnt, 1472)) {
            receiver.update(&frozen).unwrap();
        }
    }

    let cat = receiver.get(0x1000).unwrap();
    assert_eq!(cat.name(), "cat");
    assert_eq!(cat.scalar::<u32>().unwrap(), 4);
    assert_eq!(receiver.len(), 3);
}
