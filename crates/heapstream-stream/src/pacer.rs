use std::time::{Duration, Instant};

/// Burst-based rate limiter for outgoing packets.
///
/// Bytes are sent back to back until a burst of `burst_size` has accumulated;
/// the sender then waits until the burst has taken as long as it would at
/// `rate` bytes per second, counting the time already spent sending it.
#[derive(Debug, Clone)]
pub(crate) struct Pacer {
    rate: f64,
    burst_size: usize,
    pending: usize,
    burst_start: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(rate: f64, burst_size: usize) -> Self {
        Self {
            rate,
            burst_size,
            pending: 0,
            burst_start: None,
        }
    }

    /// Account for `bytes` just transmitted; returns how long to wait before
    /// the next packet, if at all.
    pub(crate) fn consume(&mut self, bytes: usize) -> Option<Duration> {
        self.consume_at(bytes, Instant::now())
    }

    fn consume_at(&mut self, bytes: usize, now: Instant) -> Option<Duration> {
        if self.rate <= 0.0 {
            return None;
        }
        let start = *self.burst_start.get_or_insert(now);
        self.pending += bytes;
        if self.pending < self.burst_size {
            return None;
        }

        let budget = Duration::try_from_secs_f64(self.pending as f64 / self.rate)
            .unwrap_or(Duration::MAX);
        self.pending = 0;
        let Some(deadline) = start.checked_add(budget) else {
            self.burst_start = None;
            return Some(Duration::MAX);
        };
        // The next burst is timed from when this one should have ended.
        self.burst_start = Some(deadline.max(now));
        let wait = deadline.saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }
}
