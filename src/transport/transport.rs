//! The transport tick loop.
//!
//! A [`Transport`] owns one datagram socket and every connection made
//! through it. The embedder calls [`Transport::update`] once per tick; it
//! drains the socket, dispatches packets to the [`TransportHandler`] and
//! then runs the timeout, retransmission, heartbeat and statistics sweeps.
//! Nothing blocks and nothing runs in the background.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use super::config::TransportConfig;
use super::connection::{is_acknowledged_in, ClientConnection};
use super::error::{is_transient_io, DropReason, TransportError, TransportResult};
use super::handler::{DisconnectReason, PacketReader, TransportHandler};
use super::header::{Header, PacketKind};
use super::socket::DatagramSocket;
use super::stats::{NetworkStats, RateWindow};
use super::timing::{Clock, SystemClock};
use super::token::generate_token;
use crate::core::{
    BufferPool, PooledBuffer, Serialize, ACK_WINDOW, CHECKSUM_SIZE, HEADER_BITS, PACKET_MIN_SIZE,
};
use crate::stream::BitWriter;

/// A reliable or handshake packet waiting for its ack.
#[derive(Debug)]
struct Outstanding {
    kind: PacketKind,
    payload: BitWriter,
    sent_at: f64,
}

/// Datagram size for a payload of `payload_bits`, checksum included.
#[inline]
pub fn encoded_size(payload_bits: usize) -> usize {
    CHECKSUM_SIZE + (HEADER_BITS + payload_bits).div_ceil(8)
}

/// Peer-to-peer packet transport over a [`DatagramSocket`].
///
/// # Example
///
/// ```
/// use std::net::SocketAddr;
/// use tickwire::prelude::*;
/// use tickwire::transport::{ManualClock, MemoryNetwork};
///
/// struct Inbox(Vec<u32>);
///
/// impl TransportHandler for Inbox {
///     fn on_connect(&mut self, _: SocketAddr, _: &mut PacketReader) {}
///     fn on_disconnect(&mut self, _: SocketAddr, _: DisconnectReason) {}
///     fn on_receive(&mut self, _: SocketAddr, _: u16, reader: &mut PacketReader) {
///         self.0.push(reader.read_u32(20));
///     }
/// }
///
/// let network = MemoryNetwork::new();
/// let clock = ManualClock::new(0.0);
/// let a: SocketAddr = "10.0.0.1:4000".parse().unwrap();
/// let b: SocketAddr = "10.0.0.2:4000".parse().unwrap();
///
/// let config = TransportConfig::default();
/// let mut alice = Transport::with_clock(network.bind(a)?, config.clone(), clock.clone())?;
/// let mut bob = Transport::with_clock(network.bind(b)?, config, clock.clone())?;
/// let (mut alice_inbox, mut bob_inbox) = (Inbox(Vec::new()), Inbox(Vec::new()));
///
/// alice.connect(b, |_| {})?;
/// bob.update(&mut bob_inbox)?;
/// alice.update(&mut alice_inbox)?;
///
/// alice.send_reliable(b, |writer| writer.write_u32(12345, 20))?;
/// bob.update(&mut bob_inbox)?;
/// assert_eq!(bob_inbox.0, [12345]);
/// # Ok::<(), tickwire::TickwireError>(())
/// ```
#[derive(Debug)]
pub struct Transport<S, C = SystemClock> {
    config: TransportConfig,
    socket: S,
    clock: C,
    connections: HashMap<SocketAddr, ClientConnection>,
    outstanding: HashMap<(SocketAddr, u16), Outstanding>,
    pool: BufferPool,
    stats: NetworkStats,
    window: RateWindow,
}

impl<S: DatagramSocket> Transport<S, SystemClock> {
    /// Create a transport driven by the system clock.
    pub fn new(socket: S, config: TransportConfig) -> TransportResult<Self> {
        Self::with_clock(socket, config, SystemClock::new())
    }
}

impl<S: DatagramSocket, C: Clock> Transport<S, C> {
    /// Create a transport with an explicit clock.
    pub fn with_clock(socket: S, config: TransportConfig, clock: C) -> TransportResult<Self> {
        config.validate()?;
        let now = clock.now();
        debug!(
            "transport on {:?}, max packet {} bytes",
            socket.local_addr().ok(),
            config.max_packet_size
        );
        Ok(Self {
            pool: BufferPool::new(config.pool_capacity),
            config,
            socket,
            clock,
            connections: HashMap::new(),
            outstanding: HashMap::new(),
            stats: NetworkStats::default(),
            window: RateWindow::new(now),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Local socket address.
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Connection to `addr`, if any.
    pub fn connection(&self, addr: SocketAddr) -> Option<&ClientConnection> {
        self.connections.get(&addr)
    }

    /// All connections, pending and authenticated.
    pub fn connections(&self) -> impl Iterator<Item = &ClientConnection> {
        self.connections.values()
    }

    /// Number of connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Reliable and handshake packets still waiting for an ack.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Start a handshake with `addr`.
    ///
    /// `write_payload` fills the CONNECT payload, which the peer sees in
    /// [`TransportHandler::on_connect`]. The packet is padded to the maximum
    /// packet size and resent until acknowledged. Connecting to a peer that
    /// already has a connection does nothing.
    pub fn connect<F>(&mut self, addr: SocketAddr, write_payload: F) -> TransportResult<()>
    where
        F: FnOnce(&mut BitWriter),
    {
        if self.connections.contains_key(&addr) {
            debug!("already connected to {}", addr);
            return Ok(());
        }

        let payload = self.build_payload(write_payload)?;
        let now = self.clock.now();
        self.connections
            .insert(addr, ClientConnection::new(addr, generate_token(), now));
        debug!("connecting to {}", addr);
        self.transmit(addr, PacketKind::Connect, payload);
        Ok(())
    }

    /// Send a payload that is retransmitted until acknowledged.
    ///
    /// Returns the sequence number of the first transmission. Each
    /// retransmission uses a new sequence number.
    pub fn send_reliable<F>(&mut self, addr: SocketAddr, write_payload: F) -> TransportResult<u16>
    where
        F: FnOnce(&mut BitWriter),
    {
        self.send_payload(addr, PacketKind::Reliable, write_payload)
    }

    /// Send a payload once, without delivery guarantee.
    pub fn send_unreliable<F>(&mut self, addr: SocketAddr, write_payload: F) -> TransportResult<u16>
    where
        F: FnOnce(&mut BitWriter),
    {
        self.send_payload(addr, PacketKind::Unreliable, write_payload)
    }

    /// Close the connection to `addr`, telling the peer if the handshake
    /// had completed.
    pub fn disconnect(&mut self, addr: SocketAddr) -> TransportResult<()> {
        let Some(connection) = self.connections.get(&addr) else {
            return Err(TransportError::NotConnected(addr));
        };
        if connection.is_authenticated() {
            self.transmit(addr, PacketKind::Disconnect, BitWriter::new());
        }
        self.remove_connection(addr);
        debug!("disconnected from {}", addr);
        Ok(())
    }

    /// Disconnect every peer and drop all state.
    pub fn shutdown(&mut self) {
        let peers: Vec<SocketAddr> = self.connections.keys().copied().collect();
        for addr in peers {
            let _ = self.disconnect(addr);
        }
        self.outstanding.clear();
        debug!("transport shut down");
    }

    /// Run one tick.
    ///
    /// Only non-transient socket errors are returned; everything wrong with
    /// an individual datagram is logged and dropped.
    pub fn update<H: TransportHandler>(&mut self, handler: &mut H) -> TransportResult<()> {
        self.receive_all(handler)?;

        let now = self.clock.now();
        self.sweep_timeouts(handler, now);
        self.resend_outstanding(now);
        self.send_heartbeats();
        self.report_stats(handler, now);
        Ok(())
    }

    fn build_payload<F>(&self, write_payload: F) -> TransportResult<BitWriter>
    where
        F: FnOnce(&mut BitWriter),
    {
        let mut payload = BitWriter::new();
        write_payload(&mut payload);

        let size = encoded_size(payload.total_bits());
        let max = self.config.max_packet_size;
        if size > max {
            return Err(TransportError::PacketTooLarge { size, max });
        }
        Ok(payload)
    }

    fn send_payload<F>(
        &mut self,
        addr: SocketAddr,
        kind: PacketKind,
        write_payload: F,
    ) -> TransportResult<u16>
    where
        F: FnOnce(&mut BitWriter),
    {
        match self.connections.get(&addr) {
            None => return Err(TransportError::NotConnected(addr)),
            Some(connection) if !connection.is_authenticated() => {
                return Err(TransportError::NotAuthenticated(addr));
            }
            Some(_) => {}
        }

        let payload = self.build_payload(write_payload)?;
        self.transmit(addr, kind, payload)
            .ok_or(TransportError::NotConnected(addr))
    }

    /// Frame and send one packet under a new sequence number.
    ///
    /// The payload size has already been checked. Reliable kinds are kept
    /// for retransmission. Returns `None` if there is no connection.
    fn transmit(&mut self, addr: SocketAddr, kind: PacketKind, payload: BitWriter) -> Option<u16> {
        let now = self.clock.now();
        let connection = self.connections.get_mut(&addr)?;
        let sequence = connection.increment_sequence(now);

        let mut header = Header {
            kind,
            sequence,
            ack: connection.remote_sequence(),
            ack_bits: connection.ack_bits(),
            token: match kind {
                PacketKind::Connect => connection.local_token(),
                _ => connection.effective_token(),
            },
        };

        let max = self.config.max_packet_size;
        let mut writer = BitWriter::with_capacity(max);
        // Writing never fails.
        let _ = header.serialize(&mut writer);
        writer.write_stream(&payload);
        if kind == PacketKind::Connect {
            writer.pad_to_end(max - CHECKSUM_SIZE);
        }
        writer.write_checksum(&self.config.protocol_version);

        let bits = (writer.len() * 8) as u64;
        match self.socket.send_to(writer.as_bytes(), addr) {
            Ok(_) => {
                self.stats.packets_sent += 1;
                self.stats.bits_sent += bits;
                self.window.add_out(bits);
            }
            Err(e) => warn!("send to {} failed: {}", addr, e),
        }
        trace!("sent {:?} #{} to {} ({} bytes)", kind, sequence, addr, writer.len());

        if kind.is_reliable() {
            self.outstanding.insert(
                (addr, sequence),
                Outstanding {
                    kind,
                    payload,
                    sent_at: now,
                },
            );
        }
        Some(sequence)
    }

    fn remove_connection(&mut self, addr: SocketAddr) -> Option<ClientConnection> {
        self.outstanding.retain(|(peer, _), _| *peer != addr);
        self.connections.remove(&addr)
    }

    fn receive_all<H: TransportHandler>(&mut self, handler: &mut H) -> TransportResult<()> {
        loop {
            let mut buffer = self.pool.acquire(self.config.max_packet_size);
            let (len, from) = match self.socket.try_recv_from(&mut buffer) {
                Ok(Some(received)) => received,
                Ok(None) => return Ok(()),
                Err(e) if is_transient_io(&e) => {
                    warn!("socket error: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            buffer.truncate(len);

            let bits = (len * 8) as u64;
            self.stats.bits_received += bits;
            self.window.add_in(bits);

            if let Err(reason) = self.process_datagram(from, buffer, handler) {
                trace!("dropped datagram from {}: {}", from, reason);
                self.stats.record_drop(reason);
            }
        }
    }

    fn process_datagram<H: TransportHandler>(
        &mut self,
        from: SocketAddr,
        buffer: PooledBuffer,
        handler: &mut H,
    ) -> Result<(), DropReason> {
        let len = buffer.len();
        if len < PACKET_MIN_SIZE {
            return Err(DropReason::TooShort);
        }

        let mut reader = PacketReader::new(buffer);
        if !reader.verify_checksum(&self.config.protocol_version) {
            return Err(DropReason::ChecksumMismatch);
        }
        let mut header = Header::default();
        header.serialize(&mut reader)?;
        self.stats.packets_received += 1;

        match header.kind {
            PacketKind::Connect => self.handle_connect(from, &header, len, &mut reader, handler),
            PacketKind::Disconnect => self.handle_disconnect(from, &header, handler),
            _ => self.handle_packet(from, &header, &mut reader, handler),
        }
    }

    fn handle_connect<H: TransportHandler>(
        &mut self,
        from: SocketAddr,
        header: &Header,
        len: usize,
        reader: &mut PacketReader,
        handler: &mut H,
    ) -> Result<(), DropReason> {
        if len < self.config.max_packet_size {
            return Err(DropReason::UndersizedConnect);
        }
        let now = self.clock.now();

        let Some(connection) = self.connections.get_mut(&from) else {
            let mut connection = ClientConnection::new(from, generate_token(), now);
            connection.acknowledge(header.sequence);
            connection.authenticate(header.token, now);
            self.connections.insert(from, connection);
            debug!("accepted connection from {}", from);

            handler.on_connect(from, reader);
            self.transmit(from, PacketKind::Connect, BitWriter::new());
            return Ok(());
        };

        if connection.is_authenticated() {
            if !connection.verify_handshake_token(header.token, now) {
                return Err(self.reject_token(from, handler));
            }
            connection.acknowledge(header.sequence);
            self.process_acks(from, header, now);
            return Ok(());
        }

        connection.acknowledge(header.sequence);
        connection.authenticate(header.token, now);
        self.process_acks(from, header, now);
        debug!("connection to {} authenticated", from);
        handler.on_connect(from, reader);
        Ok(())
    }

    fn handle_disconnect<H: TransportHandler>(
        &mut self,
        from: SocketAddr,
        header: &Header,
        handler: &mut H,
    ) -> Result<(), DropReason> {
        let now = self.clock.now();
        let connection = self
            .connections
            .get_mut(&from)
            .ok_or(DropReason::UnknownPeer)?;
        if !connection.is_authenticated() {
            return Err(DropReason::NotAuthenticated);
        }
        if !connection.authenticate(header.token, now) {
            return Err(self.reject_token(from, handler));
        }

        self.remove_connection(from);
        debug!("{} disconnected", from);
        handler.on_disconnect(from, DisconnectReason::Remote);
        Ok(())
    }

    fn handle_packet<H: TransportHandler>(
        &mut self,
        from: SocketAddr,
        header: &Header,
        reader: &mut PacketReader,
        handler: &mut H,
    ) -> Result<(), DropReason> {
        let now = self.clock.now();
        let connection = self
            .connections
            .get_mut(&from)
            .ok_or(DropReason::UnknownPeer)?;
        if !connection.is_authenticated() {
            return Err(DropReason::NotAuthenticated);
        }

        if !connection.authenticate(header.token, now) {
            return Err(self.reject_token(from, handler));
        }

        let fresh = !connection.is_acknowledged(header.sequence);
        connection.acknowledge(header.sequence);
        self.process_acks(from, header, now);

        if !fresh {
            trace!("duplicate #{} from {}", header.sequence, from);
        } else if header.kind.has_payload() {
            handler.on_receive(from, header.sequence, reader);
        }
        Ok(())
    }

    /// Log a token mismatch already counted on the connection, and drop the
    /// peer once the configured limit is reached.
    fn reject_token<H: TransportHandler>(
        &mut self,
        from: SocketAddr,
        handler: &mut H,
    ) -> DropReason {
        let mismatches = self
            .connections
            .get(&from)
            .map_or(0, ClientConnection::token_mismatches);
        warn!("token mismatch from {} ({} in a row)", from, mismatches);
        if self
            .config
            .token_mismatch_limit
            .is_some_and(|limit| mismatches >= limit)
        {
            self.remove_connection(from);
            warn!("disconnecting {} after {} token mismatches", from, mismatches);
            handler.on_disconnect(from, DisconnectReason::TokenMismatch);
        }
        DropReason::TokenMismatch
    }

    /// Apply the ack fields of a packet from `from` to our sent packets.
    fn process_acks(&mut self, from: SocketAddr, header: &Header, now: f64) {
        let Some(connection) = self.connections.get_mut(&from) else {
            return;
        };
        for back in 0..=ACK_WINDOW {
            let sequence = header.ack.wrapping_sub(back);
            if is_acknowledged_in(header.ack_bits, header.ack, sequence) {
                connection.update_rtt(sequence, now);
                self.outstanding.remove(&(from, sequence));
            }
        }
    }

    fn sweep_timeouts<H: TransportHandler>(&mut self, handler: &mut H, now: f64) {
        let timeout = self.config.timeout;
        let expired: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|connection| now - connection.last_received() > timeout)
            .map(ClientConnection::address)
            .collect();

        for addr in expired {
            let Some(connection) = self.remove_connection(addr) else {
                continue;
            };
            if connection.is_authenticated() {
                debug!("{} timed out", addr);
                handler.on_disconnect(addr, DisconnectReason::Timeout);
            } else {
                debug!("handshake with {} timed out", addr);
            }
        }
    }

    fn resend_outstanding(&mut self, now: f64) {
        let resend_interval = self.config.resend_interval;
        let mut due: Vec<(f64, SocketAddr, u16)> = self
            .outstanding
            .iter()
            .filter(|(_, entry)| now - entry.sent_at > resend_interval)
            .map(|(&(addr, sequence), entry)| (entry.sent_at, addr, sequence))
            .collect();
        due.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.2.cmp(&b.2)));

        for (_, addr, sequence) in due {
            let Some(entry) = self.outstanding.remove(&(addr, sequence)) else {
                continue;
            };
            if !self.connections.contains_key(&addr) {
                continue;
            }
            debug!("resending {:?} #{} to {}", entry.kind, sequence, addr);
            self.stats.retransmits += 1;
            self.transmit(addr, entry.kind, entry.payload);
        }
    }

    fn send_heartbeats(&mut self) {
        let idle: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|connection| connection.is_authenticated() && !connection.sent_this_tick())
            .map(ClientConnection::address)
            .collect();
        for addr in idle {
            self.transmit(addr, PacketKind::Heartbeat, BitWriter::new());
        }
        for connection in self.connections.values_mut() {
            connection.end_tick();
        }
    }

    fn report_stats<H: TransportHandler>(&mut self, handler: &mut H, now: f64) {
        if let Some((out_bps, in_bps)) = self.window.roll(now, self.config.stats_interval) {
            info!(
                "network: {:.0} bit/s out, {:.0} bit/s in, {} connections",
                out_bps,
                in_bps,
                self.connections.len()
            );
            handler.on_network_stats(out_bps, in_bps);
        }
    }
}
