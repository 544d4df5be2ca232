//! Send pipeline: heaps in, paced packets out.
//!
//! [`SendStream::send_heap`] lays the heap out into packets on the caller's
//! thread and queues it; a worker job on the pool transmits queued heaps in
//! call order. At most `max_heaps` heaps are queued or transmitting at once,
//! and a heap's slot is only released after the pacer has accounted for all
//! of its bytes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use heapstream_heap::{Heap, HeapGenerator, ItemGroup, PacketGenerator};
use heapstream_transport::PacketSink;
use heapstream_wire::MAX_ADDRESS;
use tracing::{debug, trace, warn};

use crate::config::SendConfig;
use crate::error::{Result, StreamError};
use crate::pacer::Pacer;
use crate::pool::ThreadPool;
use crate::stop::StopSignal;

/// Base backoff between retries of a packet after a transient failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Counters for a send stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Heaps fully transmitted.
    pub heaps: u64,
    /// Packets handed to the transport.
    pub packets: u64,
    /// Bytes handed to the transport.
    pub bytes: u64,
    /// Packet retries after transient transport errors.
    pub retries: u64,
    /// Heaps abandoned after a transport error.
    pub failed_heaps: u64,
}

#[derive(Debug)]
struct QueuedHeap {
    cnt: u64,
    packets: PacketGenerator,
}

#[derive(Debug)]
struct SendState {
    in_flight: usize,
    next_cnt: u64,
    cnt_step: u64,
}

#[derive(Debug)]
struct SendShared {
    config: SendConfig,
    stop: StopSignal,
    state: Mutex<SendState>,
    slot_freed: Condvar,
    first_error: Mutex<Option<StreamError>>,
    stats: Mutex<SendStats>,
}

impl SendShared {
    fn state(&self) -> MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, SendStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release_slot(&self) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.slot_freed.notify_all();
    }

    fn record_error(&self, err: StreamError) {
        let mut first = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if first.is_none() {
            *first = Some(err);
        }
    }

    fn stop(&self) -> bool {
        let stopped = self.stop.trigger();
        // Taking the lock orders the wakeup after any waiter's stop check.
        let _state = self.state();
        self.slot_freed.notify_all();
        stopped
    }
}

/// Transmits heaps over a packet sink.
#[derive(Debug)]
pub struct SendStream {
    shared: Arc<SendShared>,
    queue: Sender<QueuedHeap>,
    _pool: Arc<ThreadPool>,
}

impl SendStream {
    /// Create a stream whose worker runs on `pool` and writes to `sink`.
    pub fn new<S>(pool: Arc<ThreadPool>, sink: S, config: SendConfig) -> Result<Self>
    where
        S: PacketSink + 'static,
    {
        config.validate()?;
        let shared = Arc::new(SendShared {
            config,
            stop: StopSignal::new(),
            state: Mutex::new(SendState {
                in_flight: 0,
                next_cnt: 1,
                cnt_step: 1,
            }),
            slot_freed: Condvar::new(),
            first_error: Mutex::new(None),
            stats: Mutex::new(SendStats::default()),
        });

        let (queue, jobs) = unbounded();
        let worker = Arc::clone(&shared);
        pool.execute(move || run_worker(&worker, sink, &jobs))?;
        debug!(
            max_packet_size = shared.config.max_packet_size,
            rate = shared.config.rate,
            max_heaps = shared.config.max_heaps,
            "send stream started"
        );

        Ok(Self {
            shared,
            queue,
            _pool: pool,
        })
    }

    pub fn config(&self) -> &SendConfig {
        &self.shared.config
    }

    /// Set the counter given to the next heap without one, and the increment
    /// between consecutive heaps.
    pub fn set_cnt_sequence(&self, next: u64, step: u64) -> Result<()> {
        if step == 0 {
            return Err(StreamError::InvalidConfig(
                "heap counter step must be non-zero".to_string(),
            ));
        }
        if next > MAX_ADDRESS {
            return Err(StreamError::InvalidConfig(format!(
                "heap counter {next} does not fit 40 bits"
            )));
        }
        let mut state = self.shared.state();
        state.next_cnt = next;
        state.cnt_step = step;
        Ok(())
    }

    /// Queue a heap for transmission and return its heap counter.
    ///
    /// Blocks while `max_heaps` heaps are already in flight. Heaps that carry
    /// their own counter keep it and leave the sequence untouched.
    pub fn send_heap(&self, heap: Heap) -> Result<u64> {
        let shared = &self.shared;
        let mut state = shared.state();
        loop {
            if shared.stop.is_stopped() {
                return Err(StreamError::StreamClosed);
            }
            if state.in_flight < shared.config.max_heaps {
                break;
            }
            state = shared
                .slot_freed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }

        let cnt = heap.cnt().unwrap_or(state.next_cnt);
        let packets = PacketGenerator::new(&heap, cnt, shared.config.max_packet_size)?;
        trace!(
            cnt,
            packets = packets.packet_count(),
            heap_size = packets.heap_size(),
            "heap queued"
        );
        self.queue
            .send(QueuedHeap { cnt, packets })
            .map_err(|_| StreamError::StreamClosed)?;

        if heap.cnt().is_none() {
            state.next_cnt = state.next_cnt.wrapping_add(state.cnt_step) & MAX_ADDRESS;
        }
        state.in_flight += 1;
        Ok(cnt)
    }

    /// Queue the changes of `group` as one heap and return its counter.
    ///
    /// Descriptors and values are marked as sent only once the heap is
    /// queued, so after an error they go out with the next heap.
    pub fn send_group(&self, generator: &mut HeapGenerator, group: &mut ItemGroup) -> Result<u64> {
        let heap = generator.prepare_heap(group, &[]);
        let cnt = self.send_heap(heap.clone())?;
        generator.commit(group, &heap);
        Ok(cnt)
    }

    /// Block until every queued heap has been transmitted.
    ///
    /// Returns the first transmission error recorded since the previous flush.
    pub fn flush(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state();
        while state.in_flight > 0 && !shared.stop.is_stopped() {
            state = shared
                .slot_freed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        let pending = state.in_flight;
        drop(state);

        let first = shared
            .first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match first {
            Some(err) => Err(err),
            None if pending > 0 => Err(StreamError::StreamClosed),
            None => Ok(()),
        }
    }

    /// Stop the stream. Blocked callers return [`StreamError::StreamClosed`];
    /// queued heaps that were not yet transmitted are discarded.
    pub fn stop(&self) {
        if self.shared.stop() {
            debug!("send stream stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_stopped()
    }

    /// Heaps queued or transmitting.
    pub fn in_flight(&self) -> usize {
        self.shared.state().in_flight
    }

    pub fn stats(&self) -> SendStats {
        *self.shared.stats()
    }
}

impl Drop for SendStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<S: PacketSink>(shared: &SendShared, mut sink: S, jobs: &Receiver<QueuedHeap>) {
    let mut pacer = Pacer::new(shared.config.rate, shared.config.burst_size);
    loop {
        let job = select! {
            recv(shared.stop.receiver()) -> _ => break,
            recv(jobs) -> job => match job {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        let cnt = job.cnt;
        let closed = match transmit(shared, &mut sink, &mut pacer, job) {
            Ok(()) => {
                shared.stats().heaps += 1;
                if jobs.is_empty() {
                    if let Err(err) = sink.flush() {
                        warn!(error = %err, "failed to flush packet sink");
                        shared.record_error(err.into());
                    }
                }
                false
            }
            Err(StreamError::StreamClosed) => true,
            Err(err) => {
                warn!(cnt, error = %err, "failed to send heap");
                shared.stats().failed_heaps += 1;
                shared.record_error(err);
                false
            }
        };
        shared.release_slot();
        if closed {
            break;
        }
    }
    debug!("send worker exited");
}

fn transmit<S: PacketSink>(
    shared: &SendShared,
    sink: &mut S,
    pacer: &mut Pacer,
    job: QueuedHeap,
) -> Result<()> {
    for packet in job.packets {
        send_with_retry(shared, sink, &packet)?;
        {
            let mut stats = shared.stats();
            stats.packets += 1;
            stats.bytes += packet.len() as u64;
        }
        if let Some(wait) = pacer.consume(packet.len()) {
            if shared.stop.sleep(wait) {
                return Err(StreamError::StreamClosed);
            }
        }
    }
    Ok(())
}

fn send_with_retry<S: PacketSink>(shared: &SendShared, sink: &mut S, packet: &[u8]) -> Result<()> {
    let retries = shared.config.send_retries;
    let mut attempt = 0u32;
    loop {
        match sink.send_packet(packet) {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                shared.stats().retries += 1;
                trace!(attempt, error = %err, "retrying packet");
                if shared.stop.sleep(RETRY_BACKOFF * attempt) {
                    return Err(StreamError::StreamClosed);
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}
