//! Datagram socket abstraction.
//!
//! The transport only needs fire-and-forget sends and a non-blocking poll,
//! so any datagram carrier can drive it: a std UDP socket, a tokio UDP
//! socket (feature `tokio`), or the in-memory network used in tests.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// A non-blocking datagram endpoint.
pub trait DatagramSocket {
    /// Send one datagram. Delivery is not guaranteed.
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram if one is waiting.
    ///
    /// Returns `Ok(None)` instead of blocking when the queue is empty.
    fn try_recv_from(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Local address the socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Bind a std UDP socket and switch it to non-blocking mode.
pub fn bind_udp<A: ToSocketAddrs>(addr: A) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn would_block<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

/// Must be in non-blocking mode (see [`bind_udp`]), or `update` will stall.
impl DatagramSocket for UdpSocket {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, data, target)
    }

    fn try_recv_from(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        would_block(self.recv_from(buffer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

#[cfg(feature = "tokio")]
impl DatagramSocket for tokio::net::UdpSocket {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.try_send_to(data, target)
    }

    fn try_recv_from(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        would_block(tokio::net::UdpSocket::try_recv_from(self, buffer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::UdpSocket::local_addr(self)
    }
}

impl<T: DatagramSocket + ?Sized> DatagramSocket for &T {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, target)
    }

    fn try_recv_from(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).try_recv_from(buffer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}

impl<T: DatagramSocket + ?Sized> DatagramSocket for std::sync::Arc<T> {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, target)
    }

    fn try_recv_from(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).try_recv_from(buffer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        (**self).local_addr()
    }
}
