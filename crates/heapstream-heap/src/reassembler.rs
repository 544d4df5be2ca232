//! Rebuilds heaps from packets.
//!
//! Packets of several heaps may interleave and arrive in any order. Each heap
//! in flight is tracked until its fragments cover the announced heap size,
//! then frozen and handed out exactly once.
//!
//! ```text
//!   first packet        coverage == HEAP_SIZE
//!  ─────────────▶ Assembling ─────────────────▶ Complete
//!                     │
//!                     │ evicted / expired / flushed / overlap
//!                     ▼
//!                 Abandoned
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use heapstream_wire::{decode_packet, ItemPointer, Packet, WireError, DESCRIPTOR, STREAM_CTRL};
use tracing::{debug, trace, warn};

use crate::descriptor::Descriptor;
use crate::error::{HeapError, Result};
use crate::heap::{is_stop, resolve_values, FrozenHeap};

/// Default number of incomplete heaps tracked at once.
pub const DEFAULT_MAX_HEAPS: usize = 4;

/// Default largest heap a sender may announce (64 MiB).
pub const DEFAULT_MAX_HEAP_SIZE: u64 = 64 * 1024 * 1024;

/// Default number of finished heap counters remembered for duplicate suppression.
pub const DEFAULT_COMPLETED_HISTORY: usize = 64;

/// Limits applied while reassembling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblerConfig {
    /// Incomplete heaps tracked at once; the oldest is evicted beyond this.
    pub max_heaps: usize,
    /// Largest announced heap size accepted.
    pub max_heap_size: u64,
    /// Abandon heaps that see no packet for this long (checked by `expire`).
    pub heap_timeout: Option<Duration>,
    /// Finished heap counters remembered so late duplicates are ignored.
    pub completed_history: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            max_heaps: DEFAULT_MAX_HEAPS,
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
            heap_timeout: None,
            completed_history: DEFAULT_COMPLETED_HISTORY,
        }
    }
}

/// Counters describing what the reassembler has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Packets offered.
    pub packets: u64,
    /// Heaps completed.
    pub heaps: u64,
    /// Packets ignored as repeats.
    pub duplicate_packets: u64,
    /// Packets that failed to decode or were rejected outright.
    pub malformed_packets: u64,
    /// Heaps abandoned because their contents were inconsistent.
    pub malformed_heaps: u64,
    /// Incomplete heaps evicted to respect `max_heaps`.
    pub evicted: u64,
    /// Incomplete heaps abandoned by `flush`.
    pub flushed: u64,
    /// Incomplete heaps abandoned by `expire`.
    pub expired: u64,
}

/// A heap still collecting fragments.
#[derive(Debug)]
struct LiveHeap {
    cnt: u64,
    size: u64,
    received: u64,
    fragments: BTreeMap<u64, Bytes>,
    /// Pointers keyed by (packet offset, position in packet): sender order.
    pointers: Vec<(u64, usize, ItemPointer)>,
    last_activity: Instant,
}

enum Insert {
    Added,
    Duplicate,
}

impl LiveHeap {
    fn new(cnt: u64, size: u64, now: Instant) -> Self {
        Self {
            cnt,
            size,
            received: 0,
            fragments: BTreeMap::new(),
            pointers: Vec::new(),
            last_activity: now,
        }
    }

    fn insert(&mut self, packet: Packet, now: Instant) -> std::result::Result<Insert, String> {
        let announced = packet.header.heap_size.unwrap_or(self.size);
        if announced != self.size {
            return Err(format!(
                "announced size changed from {} to {announced}",
                self.size
            ));
        }

        let offset = packet.header.heap_offset;
        let len = packet.payload.len() as u64;
        let end = offset.saturating_add(len);
        if end > self.size {
            return Err(format!(
                "fragment {offset}..{end} outside heap of {} bytes",
                self.size
            ));
        }

        if let Some(existing) = self.fragments.get(&offset) {
            if existing.len() as u64 == len {
                return Ok(Insert::Duplicate);
            }
            return Err(format!("fragments of different length at offset {offset}"));
        }
        if let Some((&prev, fragment)) = self.fragments.range(..offset).next_back() {
            if prev + fragment.len() as u64 > offset {
                return Err(format!("fragment at {offset} overlaps fragment at {prev}"));
            }
        }
        if let Some((&next, _)) = self.fragments.range(offset..).next() {
            if end > next {
                return Err(format!("fragment at {offset} overlaps fragment at {next}"));
            }
        }

        self.pointers.extend(
            packet
                .pointers
                .into_iter()
                .enumerate()
                .map(|(index, pointer)| (offset, index, pointer)),
        );
        self.fragments.insert(offset, packet.payload);
        self.received += len;
        self.last_activity = now;
        Ok(Insert::Added)
    }

    fn is_complete(&self) -> bool {
        self.received == self.size
    }

    fn truncated(&self) -> HeapError {
        HeapError::TruncatedHeap {
            cnt: self.cnt,
            received: self.received,
            size: self.size,
        }
    }

    fn freeze(mut self) -> Result<FrozenHeap> {
        let cnt = self.cnt;
        let payload = if self.fragments.len() == 1 {
            self.fragments.into_values().next().unwrap_or_default()
        } else {
            let mut joined = BytesMut::with_capacity(self.size as usize);
            for fragment in self.fragments.into_values() {
                joined.extend_from_slice(&fragment);
            }
            joined.freeze()
        };

        self.pointers.sort_by_key(|&(offset, index, _)| (offset, index));
        let mut end_of_stream = false;
        let mut pointers = Vec::with_capacity(self.pointers.len());
        for (_, _, pointer) in self.pointers {
            if pointer.id == STREAM_CTRL {
                if is_stop(&pointer) {
                    end_of_stream = true;
                } else {
                    debug!(cnt, value = pointer.value, "ignoring stream control item");
                }
                continue;
            }
            pointers.push(pointer);
        }

        let mut descriptors = Vec::new();
        let mut items = Vec::with_capacity(pointers.len());
        for raw in resolve_values(&pointers, &payload)
            .map_err(|err| HeapError::MalformedHeap(format!("heap {cnt}: {err}")))?
        {
            if raw.id != DESCRIPTOR {
                items.push(raw);
                continue;
            }
            if raw.immediate {
                return Err(HeapError::MalformedHeap(format!(
                    "heap {cnt}: immediate descriptor"
                )));
            }
            let descriptor = Descriptor::decode(raw.value)
                .map_err(|err| HeapError::MalformedHeap(format!("heap {cnt}: descriptor: {err}")))?;
            descriptors.push(descriptor);
        }

        Ok(FrozenHeap::new(cnt, descriptors, items, end_of_stream))
    }
}

/// Rebuilds heaps from packets arriving in any order.
#[derive(Debug)]
pub struct Reassembler {
    config: ReassemblerConfig,
    /// Incomplete heaps, oldest first.
    live: VecDeque<LiveHeap>,
    /// Counters of heaps already completed or abandoned, oldest first.
    finished: VecDeque<u64>,
    stats: ReassemblyStats,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(ReassemblerConfig::default())
    }
}

impl Reassembler {
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            live: VecDeque::with_capacity(config.max_heaps.max(1)),
            finished: VecDeque::with_capacity(config.completed_history),
            config,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn config(&self) -> &ReassemblerConfig {
        &self.config
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Number of incomplete heaps currently tracked.
    pub fn live_heaps(&self) -> usize {
        self.live.len()
    }

    /// Offer one packet.
    ///
    /// Returns the heap this packet completed, if any. Packets for heaps
    /// finished recently and repeated fragments are ignored. Errors describe
    /// a rejected packet or an abandoned heap; none of them poison the
    /// reassembler. When making room for a new heap evicts an older one and
    /// nothing completes, the eviction is reported as `TruncatedHeap`.
    pub fn add_packet(&mut self, packet: Bytes) -> Result<Option<FrozenHeap>> {
        self.stats.packets += 1;

        let packet = match decode_packet(packet) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.malformed_packets += 1;
                debug!(error = %err, "dropping malformed packet");
                return Err(err.into());
            }
        };
        let cnt = packet.header.heap_cnt;
        let Some(size) = packet.header.heap_size else {
            self.stats.malformed_packets += 1;
            debug!(cnt, "dropping packet without heap size");
            return Err(WireError::MissingField("heap_size").into());
        };

        if self.finished.contains(&cnt) {
            self.stats.duplicate_packets += 1;
            trace!(cnt, "packet for finished heap ignored");
            return Ok(None);
        }
        if size > self.config.max_heap_size {
            self.stats.malformed_packets += 1;
            debug!(cnt, size, max = self.config.max_heap_size, "dropping packet of oversized heap");
            return Err(HeapError::HeapTooLarge {
                size,
                max: self.config.max_heap_size,
            });
        }

        let now = Instant::now();
        let mut evicted = None;
        let index = match self.live.iter().position(|heap| heap.cnt == cnt) {
            Some(index) => index,
            None => {
                if self.live.len() >= self.config.max_heaps.max(1) {
                    if let Some(oldest) = self.live.pop_front() {
                        self.stats.evicted += 1;
                        warn!(
                            cnt = oldest.cnt,
                            received = oldest.received,
                            size = oldest.size,
                            "evicting incomplete heap"
                        );
                        self.remember(oldest.cnt);
                        evicted = Some(oldest.truncated());
                    }
                }
                trace!(cnt, size, "new heap");
                self.live.push_back(LiveHeap::new(cnt, size, now));
                self.live.len() - 1
            }
        };

        let pending = || evicted.map_or(Ok(None), Err);
        match self.live[index].insert(packet, now) {
            Ok(Insert::Added) => {}
            Ok(Insert::Duplicate) => {
                self.stats.duplicate_packets += 1;
                trace!(cnt, "duplicate fragment ignored");
                return pending();
            }
            Err(reason) => {
                self.live.remove(index);
                self.remember(cnt);
                self.stats.malformed_heaps += 1;
                warn!(cnt, %reason, "abandoning heap");
                return Err(HeapError::MalformedHeap(format!("heap {cnt}: {reason}")));
            }
        }

        if !self.live[index].is_complete() {
            return pending();
        }
        let Some(heap) = self.live.remove(index) else {
            return pending();
        };
        self.remember(cnt);
        match heap.freeze() {
            Ok(frozen) => {
                self.stats.heaps += 1;
                trace!(cnt, items = frozen.items().len(), "heap complete");
                Ok(Some(frozen))
            }
            Err(err) => {
                self.stats.malformed_heaps += 1;
                warn!(cnt, error = %err, "dropping malformed heap");
                Err(err)
            }
        }
    }

    /// Abandon heaps idle for longer than the configured timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<HeapError> {
        let Some(timeout) = self.config.heap_timeout else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.live.len());
        for heap in self.live.drain(..) {
            if now.saturating_duration_since(heap.last_activity) >= timeout {
                expired.push(heap);
            } else {
                kept.push_back(heap);
            }
        }
        self.live = kept;

        expired
            .into_iter()
            .map(|heap| {
                self.stats.expired += 1;
                warn!(
                    cnt = heap.cnt,
                    received = heap.received,
                    size = heap.size,
                    "heap timed out"
                );
                self.remember(heap.cnt);
                heap.truncated()
            })
            .collect()
    }

    /// Abandon every incomplete heap.
    pub fn flush(&mut self) -> Vec<HeapError> {
        let live: Vec<LiveHeap> = self.live.drain(..).collect();
        live.into_iter()
            .map(|heap| {
                self.stats.flushed += 1;
                warn!(
                    cnt = heap.cnt,
                    received = heap.received,
                    size = heap.size,
                    "heap truncated at flush"
                );
                self.remember(heap.cnt);
                heap.truncated()
            })
            .collect()
    }

    fn remember(&mut self, cnt: u64) {
        if self.config.completed_history == 0 {
            return;
        }
        if self.finished.len() == self.config.completed_history {
            self.finished.pop_front();
        }
        self.finished.push_back(cnt);
    }
}
