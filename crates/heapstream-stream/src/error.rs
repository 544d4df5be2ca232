/// Errors that can occur in send and receive streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The stream was stopped; no further heaps are accepted.
    #[error("stream closed")]
    StreamClosed,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] heapstream_transport::TransportError),

    /// Heap-level error.
    #[error("heap error: {0}")]
    Heap(#[from] heapstream_heap::HeapError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The thread pool could not run a job.
    #[error("thread pool error: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
