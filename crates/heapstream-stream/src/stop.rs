use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// One-shot cancellation shared by a stream and its jobs.
///
/// Triggering drops the only sender, which wakes every `select!` and timed
/// wait on [`StopSignal::receiver`] at once.
#[derive(Debug, Clone)]
pub(crate) struct StopSignal {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Returns true if this call performed the stop.
    pub(crate) fn trigger(&self) -> bool {
        self.trigger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Sleep for `duration` unless stopped first. Returns true if stopped.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(duration),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}
