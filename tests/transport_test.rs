//! End-to-end tests: two transports talking over an in-memory network.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tickwire::core::{CHECKSUM_SIZE, DEFAULT_PROTOCOL_VERSION, INITIAL_RTT};
use tickwire::prelude::*;
use tickwire::transport::{Datagram, ManualClock, MemoryNetwork, MemorySocket};

const TICK: f64 = 0.05;

#[derive(Debug, Default)]
struct Recorder {
    connects: Vec<(SocketAddr, String)>,
    disconnects: Vec<(SocketAddr, DisconnectReason)>,
    received: Vec<(SocketAddr, u16, u32)>,
    stats: Vec<(f64, f64)>,
}

impl TransportHandler for Recorder {
    fn on_connect(&mut self, addr: SocketAddr, reader: &mut PacketReader) {
        self.connects.push((addr, reader.read_string()));
    }

    fn on_disconnect(&mut self, addr: SocketAddr, reason: DisconnectReason) {
        self.disconnects.push((addr, reason));
    }

    fn on_receive(&mut self, addr: SocketAddr, sequence: u16, reader: &mut PacketReader) {
        self.received.push((addr, sequence, reader.read_u32(32)));
    }

    fn on_network_stats(&mut self, out_bps: f64, in_bps: f64) {
        self.stats.push((out_bps, in_bps));
    }
}

struct Peer {
    addr: SocketAddr,
    transport: Transport<MemorySocket, ManualClock>,
    events: Recorder,
}

impl Peer {
    fn new(network: &MemoryNetwork, clock: &ManualClock, host: u8, config: TransportConfig) -> Self {
        let addr = test_addr(host);
        let transport =
            Transport::with_clock(network.bind(addr).unwrap(), config, clock.clone()).unwrap();
        Self {
            addr,
            transport,
            events: Recorder::default(),
        }
    }

    fn update(&mut self) {
        self.transport.update(&mut self.events).unwrap();
    }

    fn send(&mut self, to: SocketAddr, value: u32) -> u16 {
        self.transport
            .send_reliable(to, |writer| writer.write_u32(value, 32))
            .unwrap()
    }
}

struct Harness {
    network: MemoryNetwork,
    clock: ManualClock,
    a: Peer,
    b: Peer,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    fn with_config(config: TransportConfig) -> Self {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(100.0);
        let a = Peer::new(&network, &clock, 1, config.clone());
        let b = Peer::new(&network, &clock, 2, config);
        Self {
            network,
            clock,
            a,
            b,
        }
    }

    fn handshake(&mut self) {
        let b = self.b.addr;
        self.a
            .transport
            .connect(b, |writer| writer.write_string("hello"))
            .unwrap();
        self.b.update();
        self.a.update();
    }

    fn tick(&mut self) {
        self.clock.advance(TICK);
        self.a.update();
        self.b.update();
    }

    fn settle(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn connected() -> Self {
        let mut harness = Self::new();
        harness.handshake();
        harness.settle(4);
        harness
    }
}

fn test_addr(host: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)), 7000)
}

/// Kind bits of a framed datagram.
fn packet_kind(datagram: &Datagram) -> Option<PacketKind> {
    PacketKind::from_u8(datagram.payload.get(CHECKSUM_SIZE)? >> 5)
}

/// Rewrite the token of a framed datagram and fix up its checksum.
fn tamper_token(datagram: &mut Datagram) {
    let mut reader = BitReader::from_slice(&datagram.payload);
    assert!(reader.verify_checksum(&DEFAULT_PROTOCOL_VERSION));
    let mut header = Header::default();
    header.serialize(&mut reader).unwrap();
    let rest = reader.bits_remaining();
    let body = reader.read_raw(rest);

    header.token ^= 1;
    let mut writer = BitWriter::new();
    header.serialize(&mut writer).unwrap();
    writer.write_raw(&body, rest);
    writer.write_checksum(&DEFAULT_PROTOCOL_VERSION);
    datagram.payload = writer.into_bytes();
}

fn raw_packet(header: Header) -> Vec<u8> {
    let mut header = header;
    let mut writer = BitWriter::new();
    header.serialize(&mut writer).unwrap();
    writer.write_checksum(&DEFAULT_PROTOCOL_VERSION);
    writer.into_bytes()
}

#[test]
fn test_handshake_authenticates_both_sides() {
    let mut h = Harness::new();
    let (a, b) = (h.a.addr, h.b.addr);

    h.a.transport.connect(b, |writer| writer.write_string("hello")).unwrap();
    assert_eq!(
        h.a.transport.connection(b).unwrap().state(),
        ConnectionState::Pending
    );

    h.b.update();
    let at_b = h.b.transport.connection(a).expect("b accepted a");
    assert!(at_b.is_authenticated());
    assert_eq!(h.b.events.connects, [(a, "hello".to_string())]);
    // The reply CONNECT is on its way back.
    assert_eq!(h.network.pending(a), 1);

    h.a.update();
    let at_a = h.a.transport.connection(b).unwrap();
    assert!(at_a.is_authenticated());
    assert_eq!(h.a.events.connects, [(b, String::new())]);
    assert_eq!(
        at_a.effective_token(),
        h.b.transport.connection(a).unwrap().effective_token()
    );
    assert_eq!(at_a.remote_token(), h.b.transport.connection(a).unwrap().local_token());

    h.settle(2);
    assert_eq!(h.a.transport.outstanding_count(), 0);
    assert_eq!(h.b.transport.outstanding_count(), 0);
    assert_eq!(h.a.events.connects.len(), 1);
    assert_eq!(h.b.events.connects.len(), 1);
}

#[test]
fn test_reliable_delivered_exactly_once() {
    let mut h = Harness::connected();
    let (a, b) = (h.a.addr, h.b.addr);

    let sequence = h.a.send(b, 0xC0FF_EE00);
    assert_eq!(h.a.transport.outstanding_count(), 1);

    h.b.update();
    assert_eq!(h.b.events.received, [(a, sequence, 0xC0FF_EE00)]);

    h.settle(4);
    assert_eq!(h.b.events.received.len(), 1);
    assert_eq!(h.a.transport.outstanding_count(), 0);
    assert_eq!(h.a.transport.stats().retransmits, 0);

    let rtt = h.a.transport.connection(b).unwrap().rtt();
    assert!(rtt < INITIAL_RTT, "rtt = {rtt}");
}

#[test]
fn test_lost_connect_reply_recovered_by_resend() {
    let mut h = Harness::new();
    let (a, b) = (h.a.addr, h.b.addr);

    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);
    h.network
        .set_filter(move |datagram| datagram.from != b || flag.swap(true, Ordering::SeqCst));

    h.handshake();
    assert!(dropped.load(Ordering::SeqCst));
    assert!(!h.a.transport.connection(b).unwrap().is_authenticated());
    assert!(h.b.transport.connection(a).unwrap().is_authenticated());

    h.settle(10);
    assert!(h.a.transport.connection(b).unwrap().is_authenticated());
    assert_eq!(h.a.events.connects.len(), 1);
    assert_eq!(h.b.events.connects.len(), 1);
    assert!(h.b.transport.stats().retransmits >= 1);
    assert!(h.a.transport.stats().dropped_for(DropReason::NotAuthenticated) >= 1);

    h.a.send(b, 7);
    h.settle(4);
    assert_eq!(h.b.events.received.len(), 1);
    assert_eq!(h.b.events.received[0].2, 7);
    assert_eq!(h.a.transport.outstanding_count(), 0);
    assert_eq!(h.b.transport.outstanding_count(), 0);
}

#[test]
fn test_lost_reliable_resent_under_new_sequence() {
    let mut h = Harness::connected();
    let b = h.b.addr;

    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);
    h.network.set_filter(move |datagram| {
        packet_kind(datagram) != Some(PacketKind::Reliable) || flag.swap(true, Ordering::SeqCst)
    });

    let first = h.a.send(b, 99);
    h.b.update();
    assert!(h.b.events.received.is_empty());

    h.settle(8);
    assert_eq!(h.a.transport.stats().retransmits, 1);
    assert_eq!(h.b.events.received.len(), 1);
    let (_, sequence, value) = h.b.events.received[0];
    assert_eq!(value, 99);
    assert_ne!(sequence, first);
    assert_eq!(h.a.transport.outstanding_count(), 0);
}

#[test]
fn test_duplicate_datagrams_delivered_once() {
    let mut h = Harness::connected();
    let b = h.b.addr;
    h.network.set_duplicate(true);

    h.a.send(b, 1);
    h.a.transport
        .send_unreliable(b, |writer| writer.write_u32(2, 32))
        .unwrap();
    h.b.update();

    let values: Vec<u32> = h.b.events.received.iter().map(|event| event.2).collect();
    assert_eq!(values, [1, 2]);

    h.settle(3);
    assert_eq!(h.b.events.received.len(), 2);
}

#[test]
fn test_single_bit_flip_is_dropped() {
    let mut h = Harness::connected();
    let (a, b) = (h.a.addr, h.b.addr);

    let armed: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
    let target = Arc::clone(&armed);
    h.network.set_filter(move |datagram| {
        if datagram.from == a {
            if let Some(bit) = target.lock().unwrap().take() {
                datagram.payload[bit / 8] ^= 0x80 >> (bit % 8);
            }
        }
        true
    });

    // Unreliable packet with a 32-bit payload: 25 bytes.
    let positions = [0, 7, 31, 32, 34, 50, 100, 162, 190, 199];
    for bit in positions {
        *armed.lock().unwrap() = Some(bit);
        h.a.transport
            .send_unreliable(b, |writer| writer.write_u32(5, 32))
            .unwrap();
        h.b.update();
    }

    assert!(h.b.events.received.is_empty());
    assert_eq!(
        h.b.transport.stats().dropped_for(DropReason::ChecksumMismatch),
        positions.len() as u64
    );
    assert!(h.b.transport.connection(a).unwrap().is_authenticated());
}

#[test]
fn test_protocol_version_mismatch_is_silent() {
    let network = MemoryNetwork::new();
    let clock = ManualClock::new(0.0);
    let mut a = Peer::new(&network, &clock, 1, TransportConfig::default());
    let v2 = TransportConfig::builder().protocol_version(*b"TW02").build().unwrap();
    let mut b = Peer::new(&network, &clock, 2, v2);

    a.transport.connect(b.addr, |_| {}).unwrap();
    b.update();

    assert_eq!(b.transport.connection_count(), 0);
    assert_eq!(b.transport.stats().dropped_for(DropReason::ChecksumMismatch), 1);
    assert_eq!(network.pending(a.addr), 0);
    a.update();
    assert!(a.events.connects.is_empty());
}

#[test]
fn test_undersized_connect_is_dropped() {
    let mut h = Harness::new();
    let b = h.b.addr;
    let attacker = h.network.bind(test_addr(66)).unwrap();

    let packet = raw_packet(Header {
        kind: PacketKind::Connect,
        sequence: 1,
        token: 0x1234,
        ..Header::default()
    });
    attacker.send_to(&packet, b).unwrap();
    h.b.update();

    assert_eq!(h.b.transport.connection_count(), 0);
    assert!(h.b.events.connects.is_empty());
    assert_eq!(h.b.transport.stats().dropped_for(DropReason::UndersizedConnect), 1);
    // No reply to the forged source.
    assert_eq!(h.network.pending(test_addr(66)), 0);
}

#[test]
fn test_unknown_peer_is_dropped() {
    let mut h = Harness::new();
    let attacker = h.network.bind(test_addr(66)).unwrap();

    let packet = raw_packet(Header {
        kind: PacketKind::Reliable,
        sequence: 9,
        token: 0x1234,
        ..Header::default()
    });
    attacker.send_to(&packet, h.b.addr).unwrap();
    h.b.update();

    assert_eq!(h.b.transport.stats().dropped_for(DropReason::UnknownPeer), 1);
    assert!(h.b.events.received.is_empty());
    assert_eq!(h.network.pending(test_addr(66)), 0);
}

#[test]
fn test_token_mismatch_is_logged_and_dropped() {
    let mut h = Harness::connected();
    let (a, b) = (h.a.addr, h.b.addr);

    let tamper = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&tamper);
    h.network.set_filter(move |datagram| {
        if datagram.from == a && flag.load(Ordering::SeqCst) {
            tamper_token(datagram);
        }
        true
    });

    for value in 0..5 {
        h.a.send(b, value);
        h.b.update();
    }
    assert!(h.b.events.received.is_empty());
    assert!(h.b.events.disconnects.is_empty());
    assert_eq!(h.b.transport.stats().dropped_for(DropReason::TokenMismatch), 5);
    assert_eq!(h.b.transport.connection(a).unwrap().token_mismatches(), 5);

    // Untampered retransmissions get through.
    tamper.store(false, Ordering::SeqCst);
    h.settle(10);
    let mut values: Vec<u32> = h.b.events.received.iter().map(|event| event.2).collect();
    values.sort_unstable();
    assert_eq!(values, [0, 1, 2, 3, 4]);
    assert_eq!(h.b.transport.connection(a).unwrap().token_mismatches(), 0);
}

#[test]
fn test_token_mismatch_limit_disconnects() {
    let config = TransportConfig::builder().token_mismatch_limit(3).build().unwrap();
    let mut h = Harness::with_config(config);
    h.handshake();
    h.settle(4);
    let (a, b) = (h.a.addr, h.b.addr);

    h.network.set_filter(move |datagram| {
        if datagram.from == a {
            tamper_token(datagram);
        }
        true
    });

    for value in 0..3 {
        h.a.send(b, value);
        h.b.update();
    }
    assert_eq!(h.b.events.disconnects, [(a, DisconnectReason::TokenMismatch)]);
    assert!(h.b.transport.connection(a).is_none());
}

#[test]
fn test_forged_connect_counts_toward_mismatch_limit() {
    let config = TransportConfig::builder().token_mismatch_limit(3).build().unwrap();
    let max = config.max_packet_size;
    let mut h = Harness::with_config(config);
    h.handshake();
    h.settle(4);
    let (a, b) = (h.a.addr, h.b.addr);

    // Padded CONNECTs that claim to come from `a` with the wrong token.
    let attacker = h.network.bind(test_addr(66)).unwrap();
    let spoofed = test_addr(66);
    h.network.set_filter(move |datagram| {
        if datagram.from == spoofed {
            datagram.from = a;
        }
        true
    });
    let mut header = Header {
        kind: PacketKind::Connect,
        sequence: 500,
        token: 0xBAD,
        ..Header::default()
    };
    let mut writer = BitWriter::new();
    header.serialize(&mut writer).unwrap();
    writer.pad_to_end(max - CHECKSUM_SIZE);
    writer.write_checksum(&DEFAULT_PROTOCOL_VERSION);
    let packet = writer.into_bytes();
    assert_eq!(packet.len(), max);

    for _ in 0..2 {
        attacker.send_to(&packet, b).unwrap();
        h.b.update();
    }
    assert_eq!(h.b.transport.stats().dropped_for(DropReason::TokenMismatch), 2);
    assert_eq!(h.b.transport.connection(a).unwrap().token_mismatches(), 2);
    assert!(h.b.events.disconnects.is_empty());

    attacker.send_to(&packet, b).unwrap();
    h.b.update();
    assert_eq!(h.b.events.disconnects, [(a, DisconnectReason::TokenMismatch)]);
    assert!(h.b.transport.connection(a).is_none());
}

#[test]
fn test_timeout_disconnects_both_sides() {
    let mut h = Harness::connected();
    let (a, b) = (h.a.addr, h.b.addr);

    h.network.set_filter(|_| false);
    // Consume what is already queued for a.
    h.a.update();
    h.clock.advance(h.a.transport.config().timeout + 0.5);
    h.a.update();
    h.b.update();

    assert_eq!(h.a.events.disconnects, [(b, DisconnectReason::Timeout)]);
    assert_eq!(h.b.events.disconnects, [(a, DisconnectReason::Timeout)]);
    assert_eq!(h.a.transport.connection_count(), 0);
    assert_eq!(h.b.transport.connection_count(), 0);
    assert_eq!(h.a.transport.outstanding_count(), 0);
}

#[test]
fn test_heartbeats_keep_connection_alive() {
    let mut h = Harness::connected();
    let timeout = h.a.transport.config().timeout;
    let ticks = (timeout * 2.0 / TICK) as usize;
    h.settle(ticks);

    assert!(h.a.events.disconnects.is_empty());
    assert!(h.b.events.disconnects.is_empty());
    assert_eq!(h.a.transport.connection_count(), 1);
    assert_eq!(h.a.transport.stats().retransmits, 0);
}

#[test]
fn test_explicit_disconnect() {
    let mut h = Harness::connected();
    let (a, b) = (h.a.addr, h.b.addr);

    h.a.transport.disconnect(b).unwrap();
    assert!(h.a.transport.connection(b).is_none());
    assert!(matches!(
        h.a.transport.send_reliable(b, |_| {}),
        Err(TransportError::NotConnected(_))
    ));

    h.b.update();
    assert_eq!(h.b.events.disconnects, [(a, DisconnectReason::Remote)]);
    assert_eq!(h.b.transport.connection_count(), 0);
}

#[test]
fn test_shutdown_notifies_peers() {
    let mut h = Harness::connected();
    let a = h.a.addr;

    h.a.transport.shutdown();
    assert_eq!(h.a.transport.connection_count(), 0);
    assert_eq!(h.a.transport.outstanding_count(), 0);

    h.b.update();
    assert_eq!(h.b.events.disconnects, [(a, DisconnectReason::Remote)]);
}

#[test]
fn test_packet_size_limit() {
    let mut h = Harness::connected();
    let b = h.b.addr;
    let max = h.a.transport.config().max_packet_size;

    let sizes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&sizes);
    h.network.set_filter(move |datagram| {
        if packet_kind(datagram) == Some(PacketKind::Unreliable) {
            seen.lock().unwrap().push(datagram.payload.len());
        }
        true
    });

    // Largest payload that fits: every bit after the checksum and header.
    let fit_bits = (max - CHECKSUM_SIZE) * 8 - tickwire::core::HEADER_BITS;
    let before = h.a.transport.connection(b).unwrap().local_sequence();
    let err = h
        .a
        .transport
        .send_unreliable(b, |writer| {
            writer.write_bytes(&vec![0xAB; fit_bits / 8]);
            writer.write_bits(0, (fit_bits % 8) as u32 + 1);
        })
        .unwrap_err();
    assert!(matches!(err, TransportError::PacketTooLarge { size, max: m } if size == max + 1 && m == max));
    assert_eq!(h.a.transport.connection(b).unwrap().local_sequence(), before);

    h.a.transport
        .send_unreliable(b, |writer| {
            writer.write_bytes(&vec![0xAB; fit_bits / 8]);
            writer.write_bits(0, (fit_bits % 8) as u32);
        })
        .unwrap();
    assert_eq!(*sizes.lock().unwrap(), [max]);

    h.b.update();
    assert_eq!(h.b.events.received.len(), 1);
    assert_eq!(h.b.events.received[0].2, 0xABAB_ABAB);
}

#[test]
fn test_network_stats_reported() {
    let mut h = Harness::connected();
    let b = h.b.addr;
    for value in 0..10 {
        h.a.send(b, value);
        h.tick();
    }
    h.settle(20);

    assert!(!h.a.events.stats.is_empty());
    let (out_bps, in_bps) = h.a.events.stats[0];
    assert!(out_bps > 0.0);
    assert!(in_bps > 0.0);

    let stats = h.a.transport.stats();
    assert!(stats.packets_sent > 10);
    assert!(stats.packets_received > 0);
    assert_eq!(stats.dropped_total(), 0);
}

#[test]
fn test_over_loopback_udp() {
    use std::time::{Duration, Instant};
    use tickwire::transport::bind_udp;

    let mut a = Transport::new(bind_udp("127.0.0.1:0").unwrap(), TransportConfig::default()).unwrap();
    let mut b = Transport::new(bind_udp("127.0.0.1:0").unwrap(), TransportConfig::default()).unwrap();
    let (mut a_events, mut b_events) = (Recorder::default(), Recorder::default());
    let b_addr = b.local_addr().unwrap();

    a.connect(b_addr, |writer| writer.write_string("udp")).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut sent = false;
    while b_events.received.is_empty() && Instant::now() < deadline {
        b.update(&mut b_events).unwrap();
        a.update(&mut a_events).unwrap();
        if !sent && a.connection(b_addr).is_some_and(|c| c.is_authenticated()) {
            a.send_reliable(b_addr, |writer| writer.write_u32(31337, 32)).unwrap();
            sent = true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(b_events.connects.len(), 1);
    assert_eq!(b_events.connects[0].1, "udp");
    assert_eq!(b_events.received.len(), 1);
    assert_eq!(b_events.received[0].2, 31337);
}
