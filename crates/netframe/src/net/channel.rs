use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Frame;

use super::protocol::{ChannelHeader, Packet};
use super::schema::WireSchema;
use super::stats::{NetworkStats, ThroughputWindow};
use super::tracking::{AckTracker, ReceiveTracker};
use super::transport::{Transport, TransportEvent};

/// Sends older than this without an ack are counted as lost.
pub const LOSS_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_PENDING_ACKS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Close,
    /// Application payload of one datagram, channel header stripped.
    Payload(Vec<u8>),
    /// The peer has now seen a datagram sent with `tag`.
    AckInfo { tag: Frame },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Pending,
    Open,
    Closed,
}

/// Sequenced, acknowledged framing over one unreliable transport. Nothing
/// is retransmitted here.
pub struct Channel {
    transport: Box<dyn Transport>,
    schema: Arc<WireSchema>,
    state: ChannelState,
    next_sequence: u32,
    acks: AckTracker,
    received: ReceiveTracker,
    last_acked_tag: Option<Frame>,
    stats: NetworkStats,
    window: ThroughputWindow,
    send_buffer: Vec<u8>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer_id", &self.transport.peer_id())
            .field("state", &self.state)
            .field("next_sequence", &self.next_sequence)
            .field("last_acked_tag", &self.last_acked_tag)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn new(transport: Box<dyn Transport>, schema: Arc<WireSchema>) -> Self {
        let send_buffer = Vec::with_capacity(schema.max_packet_size());
        Self {
            transport,
            schema,
            state: ChannelState::Pending,
            next_sequence: 1,
            acks: AckTracker::new(MAX_PENDING_ACKS),
            received: ReceiveTracker::new(),
            last_acked_tag: None,
            stats: NetworkStats::default(),
            window: ThroughputWindow::new(Instant::now()),
            send_buffer,
        }
    }

    pub fn peer_id(&self) -> &str {
        self.transport.peer_id()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn schema(&self) -> &Arc<WireSchema> {
        &self.schema
    }

    /// An empty payload buffer sized so header plus payload fits one datagram.
    pub fn allocate_packet(&self) -> Packet {
        Packet::with_limit(self.schema.max_payload_size())
    }

    /// Transmits `packet` and remembers `tag` until the peer acknowledges
    /// it. Returns `false` if the channel is not open or the transport
    /// refused the datagram.
    pub fn send(&mut self, packet: &Packet, tag: Frame) -> bool {
        if self.state != ChannelState::Open {
            log::debug!("Send to {} while {:?}", self.peer_id(), self.state);
            return false;
        }

        let (ack, ack_bits) = self.received.ack_data();
        let header = ChannelHeader {
            magic: self.schema.magic(),
            sequence: self.next_sequence,
            ack,
            ack_bits,
        };

        self.send_buffer.clear();
        self.send_buffer.extend_from_slice(&header.to_bytes());
        self.send_buffer.extend_from_slice(packet.as_bytes());
        debug_assert!(self.send_buffer.len() <= self.schema.max_packet_size());

        if !self.transport.send(&self.send_buffer) {
            return false;
        }

        let now = Instant::now();
        let evicted = self.acks.track_packet(self.next_sequence, tag, now);
        self.record_lost(evicted);
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += self.send_buffer.len() as u64;
        self.window.record_sent(self.send_buffer.len());
        true
    }

    /// Drains every event the transport queued since the last call.
    pub fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Open => {
                    if self.state == ChannelState::Pending {
                        self.state = ChannelState::Open;
                        events.push(ChannelEvent::Open);
                    }
                }
                TransportEvent::Close => {
                    if self.state != ChannelState::Closed {
                        self.state = ChannelState::Closed;
                        events.push(ChannelEvent::Close);
                    }
                }
                TransportEvent::Message(datagram) => {
                    if self.state == ChannelState::Closed {
                        continue;
                    }
                    self.receive_datagram(&datagram, &mut events);
                }
            }
        }

        events
    }

    fn receive_datagram(&mut self, datagram: &[u8], events: &mut Vec<ChannelEvent>) {
        let (header, payload) = match ChannelHeader::decode(datagram, self.schema.magic()) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("Dropping datagram from {}: {}", self.peer_id(), e);
                return;
            }
        };

        if !self.received.record_received(header.sequence) {
            log::trace!("Duplicate sequence {} from {}", header.sequence, self.peer_id());
            return;
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += datagram.len() as u64;
        self.window.record_received(datagram.len());

        let outcome = self
            .acks
            .process_ack(header.ack, header.ack_bits, Instant::now());
        if let Some(tag) = outcome.highest_tag {
            if self.last_acked_tag.is_none_or(|last| tag > last) {
                self.last_acked_tag = Some(tag);
                events.push(ChannelEvent::AckInfo { tag });
            }
        }

        if !payload.is_empty() {
            events.push(ChannelEvent::Payload(payload.to_vec()));
        }
    }

    /// Smoothed round-trip time in milliseconds.
    pub fn ping(&self) -> f32 {
        self.acks.srtt()
    }

    pub fn rtt_variance(&self) -> f32 {
        self.acks.rtt_var()
    }

    pub fn last_acked_tag(&self) -> Option<Frame> {
        self.last_acked_tag
    }

    pub fn unacked_count(&self) -> usize {
        self.acks.unacked_count()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn compute_stats(&mut self) {
        let now = Instant::now();
        let lost = self.acks.expire(now, LOSS_TIMEOUT);
        self.record_lost(lost);

        self.stats.rtt_ms = self.acks.srtt();
        self.stats.rtt_variance = self.acks.rtt_var();
        self.window.roll(now, &mut self.stats);
    }

    fn record_lost(&mut self, count: usize) {
        if count > 0 {
            self.stats.packets_lost += count as u64;
            self.window.record_lost(count);
        }
    }

    pub fn close(&mut self) {
        if self.state != ChannelState::Closed {
            self.transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::memory::MemoryTransport;
    use crate::net::protocol::{CHANNEL_HEADER_SIZE, Message};

    fn linked() -> (Channel, Channel, crate::net::memory::LinkControl) {
        let schema = Arc::new(WireSchema::default());
        let (a, b) = MemoryTransport::pair("a", "b");
        let controls = a.controls();
        let mut a = Channel::new(Box::new(a), Arc::clone(&schema));
        let mut b = Channel::new(Box::new(b), schema);
        assert_eq!(a.poll(), vec![ChannelEvent::Open]);
        assert_eq!(b.poll(), vec![ChannelEvent::Open]);
        (a, b, controls)
    }

    #[test]
    fn payload_arrives_without_header() {
        let (mut a, mut b, _) = linked();

        let mut packet = a.allocate_packet();
        packet
            .push(&Message::VisibilityChange { visible: true }, false)
            .unwrap();
        assert!(a.send(&packet, 1));

        let events = b.poll();
        assert_eq!(events, vec![ChannelEvent::Payload(packet.as_bytes().to_vec())]);
        assert_eq!(b.stats().packets_received, 1);
    }

    #[test]
    fn ack_info_reports_highest_tag_once() {
        let (mut a, mut b, _) = linked();

        for tag in [5, 6, 7] {
            assert!(a.send(&a.allocate_packet(), tag));
        }
        b.poll();
        assert!(b.send(&b.allocate_packet(), 100));

        assert_eq!(a.poll(), vec![ChannelEvent::AckInfo { tag: 7 }]);
        assert_eq!(a.last_acked_tag(), Some(7));
        assert_eq!(a.unacked_count(), 0);

        // The same ack state echoed again reports nothing new.
        assert!(b.send(&b.allocate_packet(), 101));
        assert!(a.poll().is_empty());
    }

    #[test]
    fn send_on_closed_channel_fails() {
        let (mut a, mut b, _) = linked();
        b.close();

        assert_eq!(a.poll(), vec![ChannelEvent::Close]);
        assert_eq!(a.state(), ChannelState::Closed);
        assert!(!a.send(&a.allocate_packet(), 1));
        assert_eq!(b.poll(), vec![ChannelEvent::Close]);
    }

    #[test]
    fn send_before_open_fails() {
        let schema = Arc::new(WireSchema::default());
        let (a, _b) = MemoryTransport::pair("a", "b");
        let mut a = Channel::new(Box::new(a), schema);
        assert!(!a.send(&a.allocate_packet(), 1));
    }

    #[test]
    fn duplicate_datagram_is_dropped() {
        let (mut a, mut b, controls) = linked();

        let mut packet = a.allocate_packet();
        packet.write(&[0x02]).unwrap();
        a.send(&packet, 1);
        controls.replay_last();

        assert_eq!(b.poll().len(), 1);
        assert_eq!(b.stats().packets_received, 1);
    }

    #[test]
    fn foreign_magic_is_dropped() {
        let schema = Arc::new(WireSchema::default());
        let other = Arc::new(WireSchema::new(0x1111, 1200, 5).unwrap());
        let (a, b) = MemoryTransport::pair("a", "b");
        let mut a = Channel::new(Box::new(a), other);
        let mut b = Channel::new(Box::new(b), schema);
        a.poll();
        b.poll();

        assert!(a.send(&a.allocate_packet(), 1));
        assert!(b.poll().is_empty());
        assert_eq!(b.stats().packets_received, 0);
    }

    #[test]
    fn stats_track_throughput() {
        let (mut a, mut b, _) = linked();
        let mut packet = a.allocate_packet();
        packet.write(&[0u8; 100]).unwrap();

        for tag in 0..10 {
            a.send(&packet, tag);
        }
        b.poll();

        a.compute_stats();
        assert_eq!(a.stats().packets_sent, 10);
        assert_eq!(a.stats().bytes_sent, 10 * (100 + CHANNEL_HEADER_SIZE) as u64);
        assert!(a.stats().sent_kbps > 0.0);
        assert_eq!(a.stats().packet_loss_percent, 0.0);
    }
}
