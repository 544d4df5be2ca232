use std::io::ErrorKind;

/// Errors that can occur in packet transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The packet does not fit the transport's datagram limit.
    #[error("packet too large ({size} bytes, max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// The other end went away; no more packets will flow.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Covers interrupted and would-block conditions as well as kernel send
    /// buffer exhaustion (`ENOBUFS`) on Unix.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Io(err) => is_transient_io(err),
            _ => false,
        }
    }
}

pub(crate) fn is_transient_io(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::ENOBUFS) {
            return true;
        }
    }
    false
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let err = TransportError::Io(std::io::Error::from(ErrorKind::WouldBlock));
        assert!(err.is_transient());

        let err = TransportError::Io(std::io::Error::from(ErrorKind::ConnectionRefused));
        assert!(!err.is_transient());

        assert!(!TransportError::Closed.is_transient());
    }

    #[test]
    #[cfg(unix)]
    fn enobufs_is_transient() {
        let err = TransportError::Io(std::io::Error::from_raw_os_error(libc::ENOBUFS));
        assert!(err.is_transient());
    }
}
