use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{PacketSink, PacketSource};

/// Default largest datagram accepted by [`UdpReceiver`].
pub const DEFAULT_MAX_PACKET_SIZE: usize = 9200;

/// Default kernel receive buffer requested by [`UdpReceiver`].
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Default interval after which [`UdpReceiver::recv_packet`] yields `None`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

/// Sends each packet as one UDP datagram to a fixed peer.
#[derive(Debug)]
pub struct UdpSender {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpSender {
    /// Bind an ephemeral local socket and connect it to `addr`.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let peer = resolve(addr)?;
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(local).map_err(|e| TransportError::Bind {
            addr: local.to_string(),
            source: e,
        })?;
        socket.connect(peer).map_err(|e| TransportError::Connect {
            addr: peer.to_string(),
            source: e,
        })?;

        debug!(%peer, "udp sender connected");
        Ok(Self { socket, peer })
    }

    /// Wrap an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        let peer = socket.peer_addr()?;
        Ok(Self { socket, peer })
    }

    /// Destination address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of the sending socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }
}

impl PacketSink for UdpSender {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > MAX_DATAGRAM {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                max: MAX_DATAGRAM,
            });
        }
        let sent = self.socket.send(packet)?;
        if sent != packet.len() {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::WriteZero,
                format!("short datagram write ({sent} of {} bytes)", packet.len()),
            )));
        }
        Ok(())
    }
}

/// Receives packets from a bound UDP socket.
///
/// Datagrams larger than the configured maximum packet size are dropped.
#[derive(Debug)]
pub struct UdpReceiver {
    socket: UdpSocket,
    max_packet_size: usize,
    buf: Vec<u8>,
}

impl UdpReceiver {
    /// Bind to `addr` with the default buffer size and poll interval.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let addr = resolve(addr)?;
        let socket = UdpSocket::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        socket.set_read_timeout(Some(DEFAULT_POLL_INTERVAL))?;

        if let Err(err) = set_recv_buffer_size(&socket, DEFAULT_BUFFER_SIZE) {
            warn!(error = %err, size = DEFAULT_BUFFER_SIZE, "could not set socket receive buffer");
        }

        info!(addr = %socket.local_addr()?, "listening for udp packets");
        Ok(Self::from_parts(socket, DEFAULT_MAX_PACKET_SIZE))
    }

    /// Wrap an already bound socket. The caller is responsible for its read timeout.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self::from_parts(socket, DEFAULT_MAX_PACKET_SIZE)
    }

    fn from_parts(socket: UdpSocket, max_packet_size: usize) -> Self {
        Self {
            socket,
            max_packet_size,
            buf: vec![0u8; max_packet_size + 1],
        }
    }

    /// Request a kernel receive buffer of `bytes`.
    pub fn with_buffer_size(self, bytes: usize) -> Result<Self> {
        set_recv_buffer_size(&self.socket, bytes)?;
        Ok(self)
    }

    /// Change how long a receive call waits before yielding `None`.
    pub fn with_poll_interval(self, interval: Duration) -> Result<Self> {
        self.socket.set_read_timeout(Some(interval))?;
        Ok(self)
    }

    /// Change the largest accepted datagram.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self.buf = vec![0u8; max_packet_size + 1];
        self
    }

    /// Bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }
}

impl PacketSource for UdpReceiver {
    fn recv_packet(&mut self) -> Result<Option<Bytes>> {
        let (len, src) = match self.socket.recv_from(&mut self.buf) {
            Ok(result) => result,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                return Ok(None);
            }
            Err(err) => return Err(TransportError::Io(err)),
        };

        if len > self.max_packet_size {
            debug!(%src, max = self.max_packet_size, "dropping oversized datagram");
            return Ok(None);
        }

        Ok(Some(Bytes::copy_from_slice(&self.buf[..len])))
    }
}

fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        TransportError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "address resolved to nothing",
        ))
    })
}

#[cfg(unix)]
fn set_recv_buffer_size(socket: &UdpSocket, bytes: usize) -> Result<()> {
    use std::os::fd::AsRawFd;

    let fd = socket.as_raw_fd();
    let value = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);

    // SAFETY: `value` is a valid readable c_int for the provided length, and
    // `fd` is an open UDP socket descriptor owned by `socket`.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(TransportError::Io(std::io::Error::last_os_error()))
    }
}

#[cfg(not(unix))]
fn set_recv_buffer_size(_socket: &UdpSocket, bytes: usize) -> Result<()> {
    debug!(bytes, "receive buffer sizing not supported on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_pair() -> (UdpSender, UdpReceiver) {
        let receiver = UdpReceiver::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();
        let sender = UdpSender::connect(addr).unwrap();
        (sender, receiver)
    }

    fn recv_within(receiver: &mut UdpReceiver, attempts: usize) -> Option<Bytes> {
        for _ in 0..attempts {
            if let Some(packet) = receiver.recv_packet().unwrap() {
                return Some(packet);
            }
        }
        None
    }

    #[test]
    fn roundtrip_single_datagram() {
        let (mut sender, mut receiver) = loopback_pair();
        sender.send_packet(b"heap-fragment").unwrap();

        let packet = recv_within(&mut receiver, 40).expect("datagram should arrive");
        assert_eq!(packet.as_ref(), b"heap-fragment");
    }

    #[test]
    fn poll_interval_yields_none() {
        let receiver = UdpReceiver::bind("127.0.0.1:0").unwrap();
        let mut receiver = receiver
            .with_poll_interval(Duration::from_millis(5))
            .unwrap();
        assert!(receiver.recv_packet().unwrap().is_none());
    }

    #[test]
    fn oversized_datagram_dropped() {
        let (mut sender, receiver) = loopback_pair();
        let mut receiver = receiver.with_max_packet_size(8);

        sender.send_packet(&[0xAB; 32]).unwrap();
        sender.send_packet(b"small").unwrap();

        let packet = recv_within(&mut receiver, 40).expect("small datagram should arrive");
        assert_eq!(packet.as_ref(), b"small");
    }

    #[test]
    fn rejects_datagram_over_udp_limit() {
        let (mut sender, _receiver) = loopback_pair();
        let err = sender.send_packet(&vec![0u8; MAX_DATAGRAM + 1]).unwrap_err();
        assert!(matches!(err, TransportError::PacketTooLarge { .. }));
    }

    #[test]
    fn explicit_buffer_size_applies() {
        let receiver = UdpReceiver::bind("127.0.0.1:0").unwrap();
        assert!(receiver.with_buffer_size(256 * 1024).is_ok());
    }
}
