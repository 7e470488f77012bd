//! In-process datagram network.
//!
//! [`MemoryNetwork`] routes datagrams between [`MemorySocket`]s by address
//! with UDP semantics: unbound destinations swallow packets silently and
//! nothing is ever delivered twice unless duplication is switched on. A
//! filter can drop or rewrite datagrams in flight to simulate loss and
//! corruption.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

/// A datagram in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender address.
    pub from: SocketAddr,
    /// Destination address.
    pub to: SocketAddr,
    /// Datagram contents.
    pub payload: Vec<u8>,
}

/// Decides the fate of each datagram: return `false` to drop it. The
/// datagram may be modified in place.
pub type DatagramFilter = Box<dyn FnMut(&mut Datagram) -> bool + Send>;

#[derive(Default)]
struct NetworkInner {
    queues: HashMap<SocketAddr, VecDeque<Datagram>>,
    filter: Option<DatagramFilter>,
    duplicate: bool,
    delivered: u64,
    dropped: u64,
}

/// A shared in-memory network. Clones refer to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &inner.queues.len())
            .field("filtered", &inner.filter.is_some())
            .field("duplicate", &inner.duplicate)
            .field("delivered", &inner.delivered)
            .field("dropped", &inner.dropped)
            .finish()
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a socket at `addr`.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemorySocket> {
        let mut inner = self.inner.lock();
        if inner.queues.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            ));
        }
        inner.queues.insert(addr, VecDeque::new());
        Ok(MemorySocket {
            addr,
            network: self.clone(),
        })
    }

    /// Install a filter applied to every datagram sent from now on.
    pub fn set_filter<F>(&self, filter: F)
    where
        F: FnMut(&mut Datagram) -> bool + Send + 'static,
    {
        self.inner.lock().filter = Some(Box::new(filter));
    }

    /// Remove the filter.
    pub fn clear_filter(&self) {
        self.inner.lock().filter = None;
    }

    /// Deliver every datagram twice.
    pub fn set_duplicate(&self, duplicate: bool) {
        self.inner.lock().duplicate = duplicate;
    }

    /// Datagrams queued for `addr`.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.inner.lock().queues.get(&addr).map_or(0, VecDeque::len)
    }

    /// Datagrams queued so far (duplicates count twice).
    pub fn delivered(&self) -> u64 {
        self.inner.lock().delivered
    }

    /// Datagrams dropped by the filter or sent to unbound addresses.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    fn route(&self, mut datagram: Datagram) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let keep = inner.filter.as_mut().is_none_or(|filter| filter(&mut datagram));
        let Some(queue) = inner.queues.get_mut(&datagram.to).filter(|_| keep) else {
            inner.dropped += 1;
            return;
        };

        if inner.duplicate {
            queue.push_back(datagram.clone());
            inner.delivered += 1;
        }
        queue.push_back(datagram);
        inner.delivered += 1;
    }

    fn pop(&self, addr: SocketAddr) -> Option<Datagram> {
        self.inner.lock().queues.get_mut(&addr)?.pop_front()
    }

    fn unbind(&self, addr: SocketAddr) {
        self.inner.lock().queues.remove(&addr);
    }
}

/// One endpoint on a [`MemoryNetwork`]. Unbinds on drop.
#[derive(Debug)]
pub struct MemorySocket {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl MemorySocket {
    /// The network this socket is attached to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl super::DatagramSocket for MemorySocket {
    fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.network.route(Datagram {
            from: self.addr,
            to: target,
            payload: data.to_vec(),
        });
        Ok(data.len())
    }

    fn try_recv_from(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some(datagram) = self.network.pop(self.addr) else {
            return Ok(None);
        };
        // Oversized datagrams are truncated, as recv_from does.
        let len = datagram.payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&datagram.payload[..len]);
        Ok(Some((len, datagram.from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemorySocket {
    fn drop(&mut self) {
        self.network.unbind(self.addr);
    }
}
