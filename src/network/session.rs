//! UDP/RTP transport sessions
//!
//! [`SendSession`] stamps and sends one RTP packet per encoded frame.
//! [`ReceiveSession`] drains the socket into a jitter buffer and maps the
//! receiver's media-sample position onto the sender's wire timestamps:
//!
//! ```text
//! wire_target = anchor.wire + (expected - anchor.local) * 8000 / sample_rate
//! ```
//!
//! Both sides are unwrapped to 64 bits first, so the mapping keeps working
//! after either 32-bit counter rolls over. The anchor is fixed on the first
//! packet, `jitter_ms` behind it, and moved whenever a packet lands too far
//! from where it was expected.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use super::jitter::{JitterBuffer, JitterBufferStats, DEFAULT_CAPACITY};
use super::rtp::{self, RtpHeader};
use super::udp::{create_receive_socket, create_send_socket, resolve};
use super::{Discontinuity, DiscontinuityHandler, Received, TransportReceiver, TransportSender};
use crate::clock::TimestampUnwrapper;
use crate::config::NetworkConfig;
use crate::constants::{MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, REFERENCE_CLOCK_RATE, RTP_HEADER_SIZE};
use crate::error::NetworkError;

/// Reference ticks per millisecond
const TICKS_PER_MS: u32 = REFERENCE_CLOCK_RATE / 1000;

/// Jump tolerance in multiples of the jitter delay
const JUMP_FACTOR: u32 = 16;

/// Transport counters
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Datagrams that were not valid RTP
    pub invalid: u64,
    /// Valid RTP with a different payload type
    pub wrong_payload_type: u64,
    /// At or before the last packet played out
    pub stale: u64,
    /// Discontinuities raised
    pub jumps: u64,
}

/// Send-only RTP session
pub struct SendSession {
    socket: UdpSocket,
    remote: SocketAddr,
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    first_packet: bool,
    /// Packet buffer (reused to avoid allocations)
    packet: BytesMut,
    stats: SessionStats,
}

impl SendSession {
    /// Resolve the destination and open the socket
    pub fn connect(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let remote = resolve(&config.address, config.port)?;
        let socket = create_send_socket(&remote, config.dscp, config.multicast_ttl)?;

        let session = Self {
            socket,
            remote,
            payload_type: config.payload_type,
            ssrc: rand::random(),
            sequence: rand::random(),
            first_packet: true,
            packet: BytesMut::with_capacity(MAX_PACKET_SIZE),
            stats: SessionStats::default(),
        };

        tracing::info!(
            remote = %remote,
            ssrc = format_args!("{:08x}", session.ssrc),
            payload_type = session.payload_type,
            "RTP send session ready"
        );

        Ok(session)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

impl TransportSender for SendSession {
    fn send(&mut self, payload: &[u8], timestamp: u32) -> Result<(), NetworkError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetworkError::PacketTooLarge(payload.len()));
        }

        let mut header = RtpHeader::new(self.payload_type, self.sequence, timestamp, self.ssrc);
        header.marker = self.first_packet;

        self.packet.clear();
        header.write(&mut self.packet);
        self.packet.put_slice(payload);

        // The sequence number counts attempts so the receiver can see losses
        self.sequence = self.sequence.wrapping_add(1);

        let sent = self
            .socket
            .send_to(&self.packet, self.remote)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        self.first_packet = false;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += sent as u64;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    /// Extended receiver position (media samples) at anchoring time
    local: i64,
    /// Extended wire timestamp that position maps to
    wire: i64,
}

/// Receive-only RTP session
pub struct ReceiveSession {
    socket: UdpSocket,
    payload_type: u8,
    sample_rate: u32,
    /// Playout delay behind the anchoring packet
    delay_ticks: u32,
    /// Largest tolerated distance from the expected position
    jump_limit: i64,
    anchor: Option<Anchor>,
    wire_clock: TimestampUnwrapper,
    local_clock: TimestampUnwrapper,
    /// Offset of the last packet handed out
    last_played: Option<i64>,
    last_expected: u32,
    jitter: JitterBuffer,
    /// Datagram buffer (reused to avoid allocations)
    scratch: Vec<u8>,
    handler: Option<DiscontinuityHandler>,
    stats: SessionStats,
}

impl ReceiveSession {
    /// Bind to the configured address and port.
    ///
    /// `handler` is invoked on the receiving thread for every timestamp jump.
    pub fn bind(
        config: &NetworkConfig,
        sample_rate: u32,
        handler: Option<DiscontinuityHandler>,
    ) -> Result<Self, NetworkError> {
        let local = resolve(&config.address, config.port)?;
        let socket = create_receive_socket(&local)?;

        let delay_ticks = config.jitter_ms * TICKS_PER_MS;

        tracing::info!(
            local = %local,
            jitter_ms = config.jitter_ms,
            payload_type = config.payload_type,
            "RTP receive session ready"
        );

        Ok(Self {
            socket,
            payload_type: config.payload_type,
            sample_rate,
            delay_ticks,
            jump_limit: delay_ticks as i64 * JUMP_FACTOR as i64,
            anchor: None,
            wire_clock: TimestampUnwrapper::new(),
            local_clock: TimestampUnwrapper::new(),
            last_played: None,
            last_expected: 0,
            jitter: JitterBuffer::new(DEFAULT_CAPACITY),
            scratch: vec![0u8; MAX_PACKET_SIZE + RTP_HEADER_SIZE],
            handler,
            stats: SessionStats::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn jitter_stats(&self) -> &JitterBufferStats {
        self.jitter.stats()
    }

    /// Extended wire timestamp due at extended position `expected`
    fn wire_target(&self, anchor: Anchor, expected: i64) -> i64 {
        let elapsed = expected - anchor.local;
        anchor.wire + (elapsed * REFERENCE_CLOCK_RATE as i64).div_euclid(self.sample_rate as i64)
    }

    fn reanchor(&mut self, expected: i64, timestamp: i64) -> Anchor {
        let anchor = Anchor {
            local: expected,
            wire: timestamp - self.delay_ticks as i64,
        };
        self.anchor = Some(anchor);
        self.wire_clock.rebase(timestamp);
        self.last_played = None;
        anchor
    }

    /// Pull every pending datagram off the socket
    fn drain(&mut self, expected: i64) -> Result<(), NetworkError> {
        loop {
            match self.socket.recv_from(&mut self.scratch) {
                Ok((len, _from)) => {
                    let data = Bytes::copy_from_slice(&self.scratch[..len]);
                    self.accept(data, expected);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
            }
        }
    }

    fn accept(&mut self, data: Bytes, expected: i64) {
        let len = data.len();
        let (header, payload) = match rtp::parse_packet(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.invalid += 1;
                tracing::trace!(error = %e, len, "Dropping datagram");
                return;
            }
        };

        if header.payload_type != self.payload_type {
            self.stats.wrong_payload_type += 1;
            return;
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += len as u64;

        let timestamp = self.wire_clock.extend(header.timestamp);
        let mut anchor = match self.anchor {
            Some(anchor) => anchor,
            None => {
                tracing::debug!(timestamp, ssrc = header.ssrc, "First packet, anchoring");
                self.reanchor(expected, timestamp)
            }
        };

        let target = self.wire_target(anchor, expected);
        if (timestamp - target).abs() > self.jump_limit {
            self.stats.jumps += 1;
            tracing::debug!(expected = target, received = timestamp, "Timestamp jump");

            if let Some(handler) = &self.handler {
                handler(Discontinuity {
                    expected: target as u32,
                    received: header.timestamp,
                });
            }

            self.jitter.clear();
            anchor = self.reanchor(expected, timestamp);
        }

        let offset = timestamp - anchor.wire;
        if self.last_played.map_or(false, |last| offset <= last) {
            self.stats.stale += 1;
            return;
        }

        self.jitter.insert(offset, payload);
    }
}

impl TransportReceiver for ReceiveSession {
    fn receive(&mut self, expected: u32, buf: &mut [u8]) -> Result<Received, NetworkError> {
        self.last_expected = expected;
        let expected = self.local_clock.extend(expected);
        self.drain(expected)?;

        let Some(anchor) = self.anchor else {
            return Ok(Received::nothing());
        };

        let target = self.wire_target(anchor, expected) - anchor.wire;
        let Some((offset, payload)) = self.jitter.pop_due(target) else {
            return Ok(Received::nothing());
        };

        self.last_played = Some(offset);

        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);

        Ok(Received {
            len,
            more: payload.len() > buf.len(),
        })
    }

    fn resync(&mut self) -> u32 {
        self.anchor.map_or(self.last_expected, |a| a.local as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// 8 kHz media rate so receiver positions equal wire ticks
    const RATE: u32 = 8000;

    fn receiver(handler: Option<DiscontinuityHandler>) -> ReceiveSession {
        receiver_at(RATE, handler)
    }

    fn receiver_at(rate: u32, handler: Option<DiscontinuityHandler>) -> ReceiveSession {
        let config = NetworkConfig {
            port: 0,
            jitter_ms: 16,
            ..NetworkConfig::default()
        };
        ReceiveSession::bind(&config, rate, handler).unwrap()
    }

    fn sender_to(rx: &ReceiveSession) -> SendSession {
        let config = NetworkConfig {
            port: rx.local_addr().unwrap().port(),
            ..NetworkConfig::default()
        };
        SendSession::connect(&config).unwrap()
    }

    /// Poll until `count` packets have been seen, without consuming any
    fn wait_for(rx: &mut ReceiveSession, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut buf = [0u8; 64];
        while rx.stats().packets_received + rx.stats().wrong_payload_type < count {
            assert!(Instant::now() < deadline, "packets never arrived");
            // Expected position before the anchor keeps everything buffered
            let expected = rx.anchor.map_or(0, |a| a.local as u32);
            rx.receive(expected, &mut buf).unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Poll at a fixed position until a packet comes out
    fn deliver_at(rx: &mut ReceiveSession, expected: u32, buf: &mut [u8]) -> Received {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let got = rx.receive(expected, buf).unwrap();
            if !got.is_empty() {
                return got;
            }
            assert!(Instant::now() < deadline, "packet never delivered");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_delivers_in_timestamp_order_after_delay() {
        let mut rx = receiver(None);
        let mut tx = sender_to(&rx);

        tx.send(b"a", 1000).unwrap();
        tx.send(b"b", 1160).unwrap();
        tx.send(b"c", 1320).unwrap();
        wait_for(&mut rx, 3);

        let mut buf = [0u8; 64];

        // 16 ms delay = 128 ticks before the first packet is due
        assert!(rx.receive(0, &mut buf).unwrap().is_empty());
        assert!(rx.receive(127, &mut buf).unwrap().is_empty());

        let got = rx.receive(128, &mut buf).unwrap();
        assert_eq!(&buf[..got.len], b"a");

        let got = rx.receive(288, &mut buf).unwrap();
        assert_eq!(&buf[..got.len], b"b");

        let got = rx.receive(448, &mut buf).unwrap();
        assert_eq!(&buf[..got.len], b"c");

        assert!(rx.receive(608, &mut buf).unwrap().is_empty());
        assert_eq!(tx.stats().packets_sent, 3);
    }

    #[test]
    fn test_late_reader_skips_stale_packets() {
        let mut rx = receiver(None);
        let mut tx = sender_to(&rx);

        for i in 0..4u32 {
            tx.send(&[i as u8], i * 160).unwrap();
        }
        wait_for(&mut rx, 4);

        let mut buf = [0u8; 8];
        let got = rx.receive(128 + 480, &mut buf).unwrap();
        assert_eq!(&buf[..got.len], &[3]);
        assert_eq!(rx.jitter_stats().late, 3);
    }

    #[test]
    fn test_jump_raises_discontinuity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut rx = receiver(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let mut tx = sender_to(&rx);

        tx.send(b"x", 0).unwrap();
        wait_for(&mut rx, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut buf = [0u8; 8];
        assert!(rx.receive(128, &mut buf).unwrap().len == 1);

        // Sender restarted far away: 16 ms * 16 = 2048 ticks tolerance
        tx.send(b"y", 500_000).unwrap();
        wait_for(&mut rx, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rx.stats().jumps, 1);

        let position = rx.resync();
        let got = rx.receive(position + 128, &mut buf).unwrap();
        assert_eq!(&buf[..got.len], b"y");
    }

    #[test]
    fn test_wire_timestamps_past_half_range() {
        let mut rx = receiver(None);
        let mut tx = sender_to(&rx);

        tx.send(b"a", 0).unwrap();
        wait_for(&mut rx, 1);
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(128, &mut buf).unwrap().len, 1);

        // Straddle 2^31 ticks after the anchor
        let start = (1u32 << 31) - 320;
        for k in 0..4u32 {
            let ts = start + 160 * k;
            tx.send(&[k as u8], ts).unwrap();
            let got = deliver_at(&mut rx, ts + 128, &mut buf);
            assert_eq!(&buf[..got.len], &[k as u8]);
        }

        assert_eq!(rx.stats().stale, 0);
        assert_eq!(rx.stats().jumps, 0);
    }

    #[test]
    fn test_wire_timestamp_wraps_to_zero() {
        let mut rx = receiver(None);
        let mut tx = sender_to(&rx);

        let first = u32::MAX - 319;
        tx.send(&[0], first).unwrap();
        wait_for(&mut rx, 1);
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(128, &mut buf).unwrap().len, 1);

        // u32::MAX - 159, 0, 160, 320
        for k in 1..5u32 {
            tx.send(&[k as u8], first.wrapping_add(160 * k)).unwrap();
            let got = deliver_at(&mut rx, 128 + 160 * k, &mut buf);
            assert_eq!(&buf[..got.len], &[k as u8]);
        }

        assert_eq!(rx.stats().stale, 0);
        assert_eq!(rx.stats().jumps, 0);
    }

    #[test]
    fn test_local_position_wraps_at_48k() {
        let mut rx = receiver_at(48000, None);
        let mut tx = sender_to(&rx);

        tx.send(b"a", 0).unwrap();
        wait_for(&mut rx, 1);
        let mut buf = [0u8; 8];
        // 128 ticks of delay are 768 samples at 48 kHz
        assert_eq!(rx.receive(768, &mut buf).unwrap().len, 1);

        // Walk the position up to the 32-bit limit with nothing in flight
        for position in [1u32 << 30, 1 << 31, 3 << 30] {
            assert!(rx.receive(position, &mut buf).unwrap().is_empty());
        }

        for j in 0..3i64 {
            let ts = 715_827_755 + 160 * j;
            // Past 2^32 samples: 4294968066 wraps to 770
            let due = (6 * (ts + 128) + 768) as u32;
            tx.send(&[j as u8], ts as u32).unwrap();
            let got = deliver_at(&mut rx, due, &mut buf);
            assert_eq!(&buf[..got.len], &[j as u8]);
        }

        assert_eq!(rx.stats().jumps, 0);
        assert_eq!(rx.stats().stale, 0);
    }

    #[test]
    fn test_drops_foreign_payload_type_and_duplicates() {
        let mut rx = receiver(None);
        let mut tx = sender_to(&rx);

        let mut foreign = sender_to(&rx);
        foreign.payload_type = 0;
        foreign.send(b"pcmu", 0).unwrap();

        tx.send(b"a", 0).unwrap();
        wait_for(&mut rx, 2);
        assert_eq!(rx.stats().wrong_payload_type, 1);

        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(128, &mut buf).unwrap().len, 1);

        // Same timestamp again after it was played
        tx.send(b"a", 0).unwrap();
        wait_for(&mut rx, 3);
        assert_eq!(rx.stats().stale, 1);
        assert!(rx.receive(288, &mut buf).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_payload_sets_more() {
        let mut rx = receiver(None);
        let mut tx = sender_to(&rx);

        tx.send(&[7u8; 10], 0).unwrap();
        wait_for(&mut rx, 1);

        let mut buf = [0u8; 4];
        let got = rx.receive(128, &mut buf).unwrap();
        assert_eq!(got, Received { len: 4, more: true });
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let rx = receiver(None);
        let mut tx = sender_to(&rx);
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            tx.send(&payload, 0),
            Err(NetworkError::PacketTooLarge(_))
        ));
    }
}
