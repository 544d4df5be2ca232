//! `futures_core::Stream` adapter over a [`RecvStream`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use heapstream_heap::FrozenHeap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::recv::{RecvStats, RecvStream};

/// Completed heaps of a receive stream as an async stream.
///
/// A blocking task moves heaps from the receive ring into a Tokio channel.
/// Dropping the adapter stops the underlying receive stream.
#[derive(Debug)]
pub struct AsyncHeaps {
    rx: mpsc::Receiver<FrozenHeap>,
    stream: Arc<RecvStream>,
}

impl RecvStream {
    /// Consume the stream into an async stream buffering up to `capacity`
    /// heaps. Must be called from within a Tokio runtime.
    pub fn into_async(self, capacity: usize) -> AsyncHeaps {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stream = Arc::new(self);
        let bridge = Arc::clone(&stream);
        tokio::task::spawn_blocking(move || {
            while let Some(heap) = bridge.get() {
                if tx.blocking_send(heap).is_err() {
                    break;
                }
            }
            debug!("async heap bridge exited");
        });
        AsyncHeaps { rx, stream }
    }
}

impl AsyncHeaps {
    pub fn stop(&self) {
        self.stream.stop();
    }

    pub fn stats(&self) -> RecvStats {
        self.stream.stats()
    }
}

impl Stream for AsyncHeaps {
    type Item = FrozenHeap;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FrozenHeap>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for AsyncHeaps {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use heapstream_heap::{Heap, PacketGenerator};
    use heapstream_transport::memory::channel;
    use heapstream_transport::PacketSink;

    use super::*;
    use crate::config::RecvConfig;
    use crate::pool::ThreadPool;

    async fn next(heaps: &mut AsyncHeaps) -> Option<FrozenHeap> {
        poll_fn(|cx| Pin::new(&mut *heaps).poll_next(cx)).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heaps_arrive_as_async_stream() {
        let pool = ThreadPool::new(1).unwrap();
        let stream = RecvStream::new(pool, RecvConfig::default()).unwrap();
        let (mut sink, source) = channel(16);
        stream.add_reader(source).unwrap();
        let mut heaps = stream.into_async(4);

        let mut heap = Heap::new();
        heap.add_item(0x1000, vec![1u8, 2, 3]);
        for (cnt, heap) in [(1, heap), (2, Heap::end())] {
            for packet in PacketGenerator::new(&heap, cnt, 1472).unwrap() {
                sink.send_packet(&packet).unwrap();
            }
        }

        let first = next(&mut heaps).await.unwrap();
        assert_eq!(first.cnt(), 1);
        assert_eq!(first.items()[0].value.as_ref(), &[1u8, 2, 3]);
        assert!(next(&mut heaps).await.is_none());
        assert_eq!(heaps.stats().heaps_delivered, 1);
    }
}
