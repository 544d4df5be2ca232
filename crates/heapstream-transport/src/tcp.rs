//! TCP connection helpers.
//!
//! TCP carries packets back to back on a byte stream; each packet is
//! delimited by its own header. Framing is implemented by `heapstream-wire`
//! (`PacketReader` / `PacketWriter`), which wraps the streams returned here.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Bind a listening socket for inbound packet streams.
pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<TcpListener> {
    let label = format!("{addr:?}");
    let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
        addr: label,
        source: e,
    })?;
    info!(addr = %listener.local_addr()?, "listening for tcp packet streams");
    Ok(listener)
}

/// Accept one connection and arm its read timeout with `poll_interval`.
pub fn accept(listener: &TcpListener, poll_interval: Duration) -> Result<TcpStream> {
    let (stream, peer) = listener.accept().map_err(TransportError::Accept)?;
    stream.set_read_timeout(Some(poll_interval))?;
    debug!(%peer, "accepted packet stream");
    Ok(stream)
}

/// Like [`accept`], but checks `cancelled` every `poll_interval` while no
/// sender has connected. Returns `Ok(None)` once cancelled.
pub fn accept_until(
    listener: &TcpListener,
    poll_interval: Duration,
    cancelled: impl Fn() -> bool,
) -> Result<Option<TcpStream>> {
    listener.set_nonblocking(true)?;
    let accepted = loop {
        match listener.accept() {
            Ok(accepted) => break Ok(Some(accepted)),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if cancelled() {
                    break Ok(None);
                }
                thread::sleep(poll_interval);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => break Err(TransportError::Accept(err)),
        }
    };
    listener.set_nonblocking(false)?;

    let Some((stream, peer)) = accepted? else {
        debug!("accept cancelled");
        return Ok(None);
    };
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(poll_interval))?;
    debug!(%peer, "accepted packet stream");
    Ok(Some(stream))
}

/// Connect to a listening receiver, optionally bounding the connect time.
pub fn connect(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs: Vec<_> = addr.to_socket_addrs()?.collect();
    let mut last_err = None;

    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(%addr, "connected packet stream");
                return Ok(stream);
            }
            Err(err) => last_err = Some((addr, err)),
        }
    }

    match last_err {
        Some((addr, source)) => Err(TransportError::Connect {
            addr: addr.to_string(),
            source,
        }),
        None => Err(TransportError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "address resolved to nothing",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn connect_and_accept_loopback() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut stream = connect(addr, Some(Duration::from_secs(2))).unwrap();
            stream.write_all(b"spead").unwrap();
        });

        let mut stream = accept(&listener, Duration::from_millis(500)).unwrap();
        client.join().unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"spead");
    }

    #[test]
    fn connect_refused_reports_address() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(addr, Some(Duration::from_millis(200))).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn accept_until_gives_up_when_cancelled() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Instant;

        let listener = bind("127.0.0.1:0").unwrap();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });

        let is_cancelled = || cancelled.load(Ordering::SeqCst);
        let start = Instant::now();
        let accepted = accept_until(&listener, Duration::from_millis(10), is_cancelled).unwrap();
        canceller.join().unwrap();

        assert!(accepted.is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn accept_until_returns_blocking_stream() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = connect(addr, Some(Duration::from_secs(2))).unwrap();
            stream.write_all(b"spead").unwrap();
        });

        let mut stream = accept_until(&listener, Duration::from_millis(500), || false)
            .unwrap()
            .unwrap();
        client.join().unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"spead");
    }
}
