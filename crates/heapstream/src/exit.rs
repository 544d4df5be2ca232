use std::fmt;
use std::io;

use heapstream_heap::HeapError;
use heapstream_stream::StreamError;
use heapstream_transport::TransportError;

// Exit codes follow sysexits-style conventions shared across our CLIs.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn heap_error(context: &str, err: HeapError) -> CliError {
    match err {
        HeapError::ShapeMismatch { .. }
        | HeapError::TypeMismatch { .. }
        | HeapError::DuplicateId(_)
        | HeapError::InvalidId(_)
        | HeapError::InvalidShape { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        HeapError::MalformedHeap(_)
        | HeapError::MalformedPacket(_)
        | HeapError::TruncatedHeap { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    match err {
        StreamError::Transport(err) => transport_error(context, err),
        StreamError::Heap(err) => heap_error(context, err),
        StreamError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        StreamError::StreamClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_codes() {
        let err = io_error("x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.code, PERMISSION_DENIED);
        let err = io_error("x", io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn stream_errors_unwrap_layers() {
        let err = stream_error(
            "send failed",
            StreamError::Transport(TransportError::Closed),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(err.message, "send failed: transport closed");

        let err = stream_error("send failed", StreamError::Heap(HeapError::DuplicateId(7)));
        assert_eq!(err.code, USAGE);
    }
}
