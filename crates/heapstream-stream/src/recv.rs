//! Receive pipeline: packets in, completed heaps out.
//!
//! Every reader added to a [`RecvStream`] runs as a job on the pool, pulling
//! packets from its source and feeding one shared [`Reassembler`]. Completed
//! heaps go into a bounded ring the consumer drains with [`RecvStream::get`]
//! or by iterating the stream. A full ring blocks the readers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use heapstream_heap::{FrozenHeap, HeapError, Reassembler, ReassemblyStats};
use heapstream_transport::{PacketSource, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::RecvConfig;
use crate::error::{Result, StreamError};
use crate::pool::ThreadPool;
use crate::stop::StopSignal;

/// Pause after a non-transient reader error before polling again.
const READER_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Counters for a receive stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvStats {
    /// Reassembly counters.
    pub reassembly: ReassemblyStats,
    /// Heaps handed to the consumer ring.
    pub heaps_delivered: u64,
    /// Times a reader found the ring full and had to wait.
    pub worker_blocked: u64,
    /// Transport errors seen by readers.
    pub reader_errors: u64,
}

#[derive(Debug)]
struct RecvShared {
    config: RecvConfig,
    stop: StopSignal,
    reassembler: Mutex<Reassembler>,
    ring: Mutex<Option<Sender<FrozenHeap>>>,
    stats: Mutex<RecvStats>,
    readers: AtomicUsize,
}

impl RecvShared {
    fn reassembler(&self) -> MutexGuard<'_, Reassembler> {
        self.reassembler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, RecvStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stop(&self) -> bool {
        let stopped = self.stop.trigger();
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).take();
        if stopped {
            let truncated = self.reassembler().flush();
            if !truncated.is_empty() {
                info!(heaps = truncated.len(), "incomplete heaps dropped at stop");
            }
        }
        stopped
    }

    /// Feed one packet; returns false once the stream should stop reading.
    fn handle_packet(&self, packet: Bytes, ring: &Sender<FrozenHeap>) -> bool {
        let result = self.reassembler().add_packet(packet);
        // Busy sources rarely hit a poll timeout, so idle heaps are checked here too.
        self.expire();
        match result {
            Ok(Some(heap)) => self.deliver(heap, ring),
            Ok(None) => true,
            Err(HeapError::TruncatedHeap { cnt, .. }) => {
                trace!(cnt, "heap evicted before completion");
                true
            }
            Err(err) => {
                trace!(error = %err, "packet dropped");
                true
            }
        }
    }

    fn deliver(&self, heap: FrozenHeap, ring: &Sender<FrozenHeap>) -> bool {
        let end = self.config.stop_on_stop_item && heap.is_end_of_stream();
        if end && heap.is_end_only() {
            info!(cnt = heap.cnt(), "end of stream received");
            self.stop();
            return false;
        }

        let cnt = heap.cnt();
        let pushed = match ring.try_send(heap) {
            Ok(()) => true,
            Err(TrySendError::Full(heap)) => {
                self.stats().worker_blocked += 1;
                trace!(cnt, "heap ring full, reader waiting");
                select! {
                    send(ring, heap) -> res => res.is_ok(),
                    recv(self.stop.receiver()) -> _ => false,
                }
            }
            Err(TrySendError::Disconnected(_)) => false,
        };
        if pushed {
            self.stats().heaps_delivered += 1;
            trace!(cnt, "heap delivered");
        }

        if end {
            info!(cnt, "end of stream received");
            self.stop();
            return false;
        }
        pushed
    }

    fn expire(&self) {
        if self.config.heap_timeout.is_some() {
            let expired = self.reassembler().expire(Instant::now());
            if !expired.is_empty() {
                debug!(heaps = expired.len(), "idle heaps expired");
            }
        }
    }
}

/// Receives heaps from one or more packet sources.
#[derive(Debug)]
pub struct RecvStream {
    shared: Arc<RecvShared>,
    heaps: Receiver<FrozenHeap>,
    pool: Arc<ThreadPool>,
}

impl RecvStream {
    /// Create a stream whose readers will run on `pool`.
    pub fn new(pool: Arc<ThreadPool>, config: RecvConfig) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = bounded(config.ring_heaps);
        let reassembler = Reassembler::new(config.reassembler_config());
        debug!(
            max_heaps = config.max_heaps,
            ring_heaps = config.ring_heaps,
            "receive stream started"
        );
        Ok(Self {
            shared: Arc::new(RecvShared {
                config,
                stop: StopSignal::new(),
                reassembler: Mutex::new(reassembler),
                ring: Mutex::new(Some(tx)),
                stats: Mutex::new(RecvStats::default()),
                readers: AtomicUsize::new(0),
            }),
            heaps: rx,
            pool,
        })
    }

    pub fn config(&self) -> &RecvConfig {
        &self.shared.config
    }

    /// Start pulling packets from `source` on a pool thread.
    ///
    /// The stream stops once every reader's source has closed.
    pub fn add_reader<S>(&self, source: S) -> Result<()>
    where
        S: PacketSource + 'static,
    {
        let ring = self
            .shared
            .ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(StreamError::StreamClosed)?;

        self.shared.readers.fetch_add(1, Ordering::SeqCst);
        let reader = Arc::clone(&self.shared);
        if let Err(err) = self.pool.execute(move || run_reader(&reader, source, ring)) {
            self.shared.readers.fetch_sub(1, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    /// Next completed heap, blocking until one is ready.
    ///
    /// Returns `None` once the stream has stopped and every buffered heap has
    /// been taken.
    pub fn get(&self) -> Option<FrozenHeap> {
        select! {
            recv(self.heaps) -> heap => heap.ok(),
            recv(self.shared.stop.receiver()) -> _ => self.heaps.try_recv().ok(),
        }
    }

    /// Next completed heap if one is ready now.
    pub fn try_get(&self) -> Option<FrozenHeap> {
        self.heaps.try_recv().ok()
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<FrozenHeap> {
        select! {
            recv(self.heaps) -> heap => heap.ok(),
            recv(self.shared.stop.receiver()) -> _ => self.heaps.try_recv().ok(),
            default(timeout) => None,
        }
    }

    /// Blocking iterator over completed heaps; ends when the stream stops.
    pub fn iter(&self) -> Heaps<'_> {
        Heaps { stream: self }
    }

    /// Stop all readers. Heaps already completed stay available to `get`.
    pub fn stop(&self) {
        if self.shared.stop() {
            debug!("receive stream stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_stopped()
    }

    pub fn stats(&self) -> RecvStats {
        let mut stats = *self.shared.stats();
        stats.reassembly = self.shared.reassembler().stats();
        stats
    }
}

impl Drop for RecvStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Iterator returned by [`RecvStream::iter`].
#[derive(Debug)]
pub struct Heaps<'a> {
    stream: &'a RecvStream,
}

impl Iterator for Heaps<'_> {
    type Item = FrozenHeap;

    fn next(&mut self) -> Option<FrozenHeap> {
        self.stream.get()
    }
}

impl<'a> IntoIterator for &'a RecvStream {
    type Item = FrozenHeap;
    type IntoIter = Heaps<'a>;

    fn into_iter(self) -> Heaps<'a> {
        self.iter()
    }
}

fn run_reader<S: PacketSource>(shared: &RecvShared, mut source: S, ring: Sender<FrozenHeap>) {
    debug!("reader started");
    loop {
        if shared.stop.is_stopped() {
            break;
        }
        match source.recv_packet() {
            Ok(Some(packet)) => {
                if packet.len() > shared.config.max_packet_size {
                    trace!(size = packet.len(), "oversized packet dropped");
                    continue;
                }
                if !shared.handle_packet(packet, &ring) {
                    break;
                }
            }
            Ok(None) => shared.expire(),
            Err(TransportError::Closed) => {
                debug!("packet source closed");
                if shared.readers.fetch_sub(1, Ordering::SeqCst) == 1 {
                    info!("all packet sources closed");
                    shared.stop();
                }
                return;
            }
            Err(err) if err.is_transient() => {}
            Err(err) => {
                shared.stats().reader_errors += 1;
                warn!(error = %err, "packet source error");
                if shared.stop.sleep(READER_ERROR_BACKOFF) {
                    break;
                }
            }
        }
    }
    shared.readers.fetch_sub(1, Ordering::SeqCst);
    debug!("reader exited");
}

#[cfg(test)]
mod tests {
    use heapstream_heap::{Heap, PacketGenerator};
    use heapstream_transport::memory::channel;
    use heapstream_transport::PacketSink;

    use super::*;

    fn send(sink: &mut impl PacketSink, heap: &Heap, cnt: u64) {
        for packet in PacketGenerator::new(heap, cnt, 1472).unwrap() {
            sink.send_packet(&packet).unwrap();
        }
    }

    fn heap(value: u8) -> Heap {
        let mut heap = Heap::new();
        heap.add_item(0x1000, vec![value; 8]);
        heap
    }

    #[test]
    fn end_marker_stops_iteration() {
        let pool = ThreadPool::new(1).unwrap();
        let stream = RecvStream::new(pool, RecvConfig::default()).unwrap();
        let (mut sink, source) = channel(16);
        stream.add_reader(source).unwrap();

        send(&mut sink, &heap(1), 1);
        send(&mut sink, &heap(2), 2);
        send(&mut sink, &Heap::end(), 3);

        let cnts: Vec<u64> = stream.iter().map(|h| h.cnt()).collect();
        assert_eq!(cnts, vec![1, 2]);
        assert!(stream.is_stopped());
        assert_eq!(stream.stats().heaps_delivered, 2);
    }

    #[test]
    fn stop_item_with_values_is_delivered_first() {
        let pool = ThreadPool::new(1).unwrap();
        let stream = RecvStream::new(pool, RecvConfig::default()).unwrap();
        let (mut sink, source) = channel(16);
        stream.add_reader(source).unwrap();

        let mut last = heap(7);
        last.add_end();
        send(&mut sink, &last, 1);

        let heaps: Vec<FrozenHeap> = (&stream).into_iter().collect();
        assert_eq!(heaps.len(), 1);
        assert!(heaps[0].is_end_of_stream());
    }

    #[test]
    fn closed_source_stops_stream() {
        let pool = ThreadPool::new(1).unwrap();
        let stream = RecvStream::new(pool, RecvConfig::default()).unwrap();
        let (mut sink, source) = channel(16);
        stream.add_reader(source).unwrap();

        send(&mut sink, &heap(1), 1);
        drop(sink);

        assert_eq!(stream.get().map(|h| h.cnt()), Some(1));
        assert!(stream.get().is_none());
    }

    #[test]
    fn stop_releases_blocked_consumer() {
        let pool = ThreadPool::new(1).unwrap();
        let stream = Arc::new(RecvStream::new(pool, RecvConfig::default()).unwrap());
        let (_sink, source) = channel(16);
        stream.add_reader(source).unwrap();

        let consumer = Arc::clone(&stream);
        let handle = std::thread::spawn(move || consumer.get());
        std::thread::sleep(Duration::from_millis(50));
        stream.stop();

        assert!(handle.join().unwrap().is_none());
        assert!(matches!(
            stream.add_reader(channel(1).1),
            Err(StreamError::StreamClosed)
        ));
    }

    #[test]
    fn full_ring_blocks_reader() {
        let pool = ThreadPool::new(1).unwrap();
        let config = RecvConfig::default().with_ring_heaps(1);
        let stream = RecvStream::new(pool, config).unwrap();
        let (mut sink, source) = channel(16);
        stream.add_reader(source).unwrap();

        for cnt in 1..=3u64 {
            send(&mut sink, &heap(cnt as u8), cnt);
        }
        std::thread::sleep(Duration::from_millis(100));
        assert!(stream.stats().worker_blocked >= 1);

        let cnts: Vec<u64> = (0..3).filter_map(|_| stream.get()).map(|h| h.cnt()).collect();
        assert_eq!(cnts, vec![1, 2, 3]);
    }

    #[test]
    fn stop_item_can_be_ignored() {
        let pool = ThreadPool::new(1).unwrap();
        let config = RecvConfig::default().with_stop_on_stop_item(false);
        let stream = RecvStream::new(pool, config).unwrap();
        let (mut sink, source) = channel(16);
        stream.add_reader(source).unwrap();

        send(&mut sink, &Heap::end(), 1);
        send(&mut sink, &heap(1), 2);

        let first = stream.get_timeout(Duration::from_secs(5)).unwrap();
        assert!(first.is_end_only());
        assert_eq!(stream.get_timeout(Duration::from_secs(5)).unwrap().cnt(), 2);
        assert!(!stream.is_stopped());
    }
}
