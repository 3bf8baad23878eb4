//! The socket surface the core consumes. Interface discovery and raw-socket
//! / BPF setup are out of scope (§1); this trait is the seam the state
//! machine and dispatcher send/receive through, so a real implementation
//! can plug in raw or UDP sockets and tests can plug in an in-memory fake.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::packet::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

/// Where an outgoing datagram should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// 255.255.255.255:67 — used before a server identifier is known, and
    /// for DISCOVER/DECLINE/RELEASE-while-REBINDING.
    Broadcast,
    /// Unicast to a known server once BOUND.
    Unicast(Ipv4Addr),
}

/// Minimal datagram transport: send an already-encoded BOOTP packet, and
/// poll for one to arrive without blocking past `timeout`.
pub trait Socket {
    fn send(&self, dest: Destination, bytes: &[u8]) -> io::Result<()>;

    /// Returns `Ok(None)` on timeout with nothing to read.
    fn recv_timeout(&self, timeout: std::time::Duration) -> io::Result<Option<Vec<u8>>>;
}

/// `std::net::UdpSocket`-backed implementation. Per §6, transmission uses a
/// broadcast-capable socket for broadcast/unconfigured destinations and a
/// connected unicast socket once the server identifier is known; this
/// implementation uses a single broadcast-enabled socket bound to the
/// client port for both, which is sufficient once the interface already has
/// an address (raw-socket send before that point is the out-of-scope
/// interface-discovery collaborator's job).
pub struct UdpSocketTransport {
    socket: UdpSocket,
}

impl UdpSocketTransport {
    pub fn bind(interface_addr: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(interface_addr, DHCP_CLIENT_PORT))?;
        socket.set_broadcast(true)?;
        Ok(UdpSocketTransport { socket })
    }
}

impl Socket for UdpSocketTransport {
    fn send(&self, dest: Destination, bytes: &[u8]) -> io::Result<()> {
        let addr = match dest {
            Destination::Broadcast => SocketAddrV4::new(Ipv4Addr::BROADCAST, DHCP_SERVER_PORT),
            Destination::Unicast(ip) => SocketAddrV4::new(ip, DHCP_SERVER_PORT),
        };
        self.socket.send_to(bytes, addr).map(|_| ())
    }

    fn recv_timeout(&self, timeout: std::time::Duration) -> io::Result<Option<Vec<u8>>> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; 4096];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Records every send for assertions; always reports nothing to receive.
/// Used by unit/integration tests that drive the state machine by feeding
/// packets directly rather than through a real socket.
#[derive(Debug, Default)]
pub struct RecordingSocket {
    pub sent: std::cell::RefCell<Vec<(Destination, Vec<u8>)>>,
}

impl Socket for RecordingSocket {
    fn send(&self, dest: Destination, bytes: &[u8]) -> io::Result<()> {
        self.sent.borrow_mut().push((dest, bytes.to_vec()));
        Ok(())
    }

    fn recv_timeout(&self, _timeout: std::time::Duration) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recording_socket_captures_sends() {
        let socket = RecordingSocket::default();
        socket.send(Destination::Broadcast, &[1, 2, 3]).unwrap();
        assert_eq!(socket.sent.borrow().len(), 1);
    }
}
