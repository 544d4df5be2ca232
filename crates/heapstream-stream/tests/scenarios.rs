use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::bounded;
use heapstream_heap::{DType, Heap, HeapGenerator, ItemGroup, PacketGenerator};
use heapstream_stream::{RecvConfig, RecvStream, SendConfig, SendStream, StreamError, ThreadPool};
use heapstream_transport::memory::{channel, MemorySink};
use heapstream_transport::{tcp, PacketSink, PacketSource, UdpReceiver, UdpSender};
use heapstream_wire::{PacketReader, PacketWriter};

fn cat_group() -> ItemGroup {
    let mut group = ItemGroup::new();
    group
        .add_item(0x1000, "cat", "string containing the word cat", vec![], DType::U32)
        .unwrap()
        .set_scalar(0xDEAD_BEEFu32)
        .unwrap();
    group
}

/// Run the tutorial sender: one heap of `group`, then the end marker.
fn send_tutorial(stream: &SendStream, group: &mut ItemGroup) {
    let mut generator = HeapGenerator::default();
    stream.send_group(&mut generator, group).unwrap();
    stream.send_heap(generator.build_end_marker()).unwrap();
    stream.flush().unwrap();
}

/// Run the tutorial receiver until the stream ends.
fn receive_into(stream: &RecvStream, group: &mut ItemGroup) -> usize {
    let mut heaps = 0;
    for heap in stream {
        group.update(&heap).unwrap();
        heaps += 1;
    }
    heaps
}

#[test]
fn tutorial_over_memory() {
    let pool = ThreadPool::new(2).unwrap();
    let (sink, source) = channel(64);

    let receiver = RecvStream::new(Arc::clone(&pool), RecvConfig::default()).unwrap();
    receiver.add_reader(source).unwrap();
    let sender = SendStream::new(pool, sink, SendConfig::default()).unwrap();

    send_tutorial(&sender, &mut cat_group());

    let mut group = ItemGroup::new();
    assert_eq!(receive_into(&receiver, &mut group), 1);
    assert!(receiver.is_stopped());

    let cat = group.get(0x1000).unwrap();
    assert_eq!(cat.name(), "cat");
    assert_eq!(cat.scalar::<u32>().unwrap(), 0xDEAD_BEEF);
}

/// Holds the first `order.len()` packets back, then releases them in the
/// listed order. Indexes missing from `order` are lost.
struct ReorderSink {
    inner: MemorySink,
    held: Vec<Vec<u8>>,
    order: Vec<usize>,
    batch: usize,
}

impl PacketSink for ReorderSink {
    fn send_packet(&mut self, packet: &[u8]) -> heapstream_transport::Result<()> {
        if self.held.len() == self.batch {
            return self.inner.send_packet(packet);
        }
        self.held.push(packet.to_vec());
        if self.held.len() == self.batch {
            for &index in &self.order {
                self.inner.send_packet(&self.held[index])?;
            }
        }
        Ok(())
    }
}

#[test]
fn lost_fragment_heap_is_evicted() {
    let pool = ThreadPool::new(2).unwrap();
    let (sink, source) = channel(64);
    // Five two-packet heaps; heap 1 loses its second packet and heaps 2-4
    // start before any of them completes.
    let sink = ReorderSink {
        inner: sink,
        held: Vec::new(),
        order: vec![0, 2, 4, 6, 3, 5, 7, 8, 9],
        batch: 10,
    };

    let receiver = RecvStream::new(
        Arc::clone(&pool),
        RecvConfig::default().with_max_heaps(3),
    )
    .unwrap();
    receiver.add_reader(source).unwrap();
    let sender = SendStream::new(
        pool,
        sink,
        SendConfig::default().with_max_packet_size(160),
    )
    .unwrap();

    for _ in 0..5 {
        let mut heap = Heap::new();
        heap.add_item(0x1000, vec![0u8; 200]);
        sender.send_heap(heap).unwrap();
    }
    sender.send_heap(Heap::end()).unwrap();
    sender.flush().unwrap();
    assert_eq!(sender.stats().packets, 11);

    let cnts: Vec<u64> = receiver.iter().map(|heap| heap.cnt()).collect();
    assert_eq!(cnts, vec![2, 3, 4, 5]);
    assert_eq!(receiver.stats().reassembly.evicted, 1);
}

#[test]
fn full_send_queue_blocks_caller() {
    let pool = ThreadPool::new(1).unwrap();
    let (sink, _source) = channel(64);
    let config = SendConfig::default()
        .with_max_heaps(2)
        .with_rate(1.0)
        .with_burst_size(1);
    let sender = Arc::new(SendStream::new(pool, sink, config).unwrap());

    let mut heap = Heap::new();
    heap.add_item(0x1000, vec![1u8; 8]);
    sender.send_heap(heap.clone()).unwrap();
    sender.send_heap(heap.clone()).unwrap();

    let (done_tx, done_rx) = bounded(1);
    let blocked = Arc::clone(&sender);
    let handle = thread::spawn(move || {
        let result = blocked.send_heap(heap);
        let _ = done_tx.send(());
        result
    });

    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(sender.in_flight(), 2);

    sender.stop();
    assert!(matches!(
        handle.join().unwrap(),
        Err(StreamError::StreamClosed)
    ));
}

#[test]
fn tutorial_over_udp_loopback() {
    let pool = ThreadPool::new(2).unwrap();
    let source = UdpReceiver::bind("127.0.0.1:0")
        .unwrap()
        .with_poll_interval(Duration::from_millis(20))
        .unwrap();
    let addr = source.local_addr().unwrap();

    let receiver = RecvStream::new(Arc::clone(&pool), RecvConfig::default()).unwrap();
    receiver.add_reader(source).unwrap();
    let sender = SendStream::new(
        pool,
        UdpSender::connect(addr).unwrap(),
        SendConfig::default().with_rate(10e6),
    )
    .unwrap();

    let mut sent = cat_group();
    sent.add_item(0x1001, "matrix", "a matrix of integers", vec![16, 16], DType::I32)
        .unwrap()
        .set_elements(&(0..256).collect::<Vec<i32>>())
        .unwrap();
    send_tutorial(&sender, &mut sent);

    let mut group = ItemGroup::new();
    assert_eq!(receive_into(&receiver, &mut group), 1);
    assert_eq!(
        group.get(0x1001).unwrap().elements::<i32>().unwrap(),
        (0..256).collect::<Vec<i32>>()
    );
    assert_eq!(group.by_name("cat").unwrap().scalar::<u32>().unwrap(), 0xDEAD_BEEF);
}

#[test]
fn tutorial_over_tcp() {
    let pool = ThreadPool::new(2).unwrap();
    let listener = tcp::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        let stream = tcp::connect(addr, Some(Duration::from_secs(2))).unwrap();
        let pool = ThreadPool::new(1).unwrap();
        let sender = SendStream::new(pool, PacketWriter::new(stream), SendConfig::default())
            .unwrap();
        send_tutorial(&sender, &mut cat_group());
    });

    let stream = tcp::accept(&listener, Duration::from_millis(20)).unwrap();
    let receiver = RecvStream::new(pool, RecvConfig::default()).unwrap();
    receiver.add_reader(PacketReader::new(stream)).unwrap();

    let mut group = ItemGroup::new();
    assert_eq!(receive_into(&receiver, &mut group), 1);
    assert_eq!(group.get(0x1000).unwrap().scalar::<u32>().unwrap(), 0xDEAD_BEEF);
    client.join().unwrap();
}

#[test]
fn stalled_heap_expires_under_steady_traffic() {
    let pool = ThreadPool::new(1).unwrap();
    let (mut sink, source) = channel(64);
    let receiver = RecvStream::new(
        pool,
        RecvConfig::default()
            .with_heap_timeout(Duration::from_millis(100))
            .with_ring_heaps(256),
    )
    .unwrap();
    receiver.add_reader(source).unwrap();

    // First half of a two-packet heap; the rest never arrives.
    let mut partial = Heap::new();
    partial.add_item(0x1000, vec![0u8; 200]);
    let first = PacketGenerator::new(&partial, 1, 160).unwrap().next().unwrap();
    sink.send_packet(&first).unwrap();

    // Keep the reader busy well past the timeout.
    let mut cnt = 2;
    let deadline = Instant::now() + Duration::from_millis(400);
    while Instant::now() < deadline {
        let mut heap = Heap::new();
        heap.add_item(0x1001, vec![1u8; 8]);
        for packet in PacketGenerator::new(&heap, cnt, 1472).unwrap() {
            sink.send_packet(&packet).unwrap();
        }
        cnt += 1;
        thread::sleep(Duration::from_millis(5));
    }
    while receiver.get_timeout(Duration::from_millis(50)).is_some() {}

    let stats = receiver.stats().reassembly;
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.heaps, cnt - 2);
}

/// A source that takes seconds to return from every read.
struct SlowSource;

impl PacketSource for SlowSource {
    fn recv_packet(&mut self) -> heapstream_transport::Result<Option<Bytes>> {
        thread::sleep(Duration::from_secs(2));
        Ok(None)
    }
}

#[test]
fn stop_releases_blocked_consumer() {
    let pool = ThreadPool::new(1).unwrap();
    let receiver = Arc::new(RecvStream::new(pool, RecvConfig::default()).unwrap());
    receiver.add_reader(SlowSource).unwrap();

    let (done_tx, done_rx) = bounded(1);
    let consumer = Arc::clone(&receiver);
    let handle = thread::spawn(move || {
        let heap = consumer.get();
        let _ = done_tx.send(());
        heap
    });

    thread::sleep(Duration::from_millis(100));
    receiver.stop();
    assert!(done_rx.recv_timeout(Duration::from_millis(500)).is_ok());
    assert!(handle.join().unwrap().is_none());
}

#[test]
fn stop_keeps_completed_heaps_available() {
    let pool = ThreadPool::new(1).unwrap();
    let (mut sink, source) = channel(64);
    let receiver = RecvStream::new(pool, RecvConfig::default()).unwrap();
    receiver.add_reader(source).unwrap();

    for cnt in 1..=2 {
        let mut heap = Heap::new();
        heap.add_item(0x1000, vec![cnt as u8; 8]);
        for packet in PacketGenerator::new(&heap, cnt, 1472).unwrap() {
            sink.send_packet(&packet).unwrap();
        }
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while receiver.stats().heaps_delivered < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    receiver.stop();
    let cnts: Vec<u64> = receiver.iter().map(|heap| heap.cnt()).collect();
    assert_eq!(cnts, vec![1, 2]);
}
