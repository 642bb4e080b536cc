use std::collections::VecDeque;
use std::sync::Arc;

use crate::Frame;
use crate::simulation::{CommandRing, DEFAULT_COMMAND_CAPACITY, UserCommand};
use crate::snapshot::{DEFAULT_SNAPSHOT_CAPACITY, SnapshotRing, WorldSnapshot};

use super::channel::{Channel, ChannelEvent};
use super::protocol::{Envelope, Message};
use super::schema::WireSchema;
use super::stats::NetworkStats;
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Free,
    Connected,
    Disconnected,
}

/// Which side of the link this connection lives on. A server connection
/// receives client frames, a client connection receives server frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectionConfig {
    pub command_capacity: usize,
    pub snapshot_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}

/// Diagnostic counters. None of them affect protocol behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConnectionStats {
    /// Frames that arrived before anyone asked for them.
    pub received: u64,
    /// Frames that arrived after they were already requested.
    pub late: u64,
    /// Gaps behind the newest frame filled in after the fact.
    pub filled: u64,
    pub duplicates: u64,
    pub decode_errors: u64,
    pub missing_inputs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Received,
    Late,
    Filled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    VisibilityChanged(bool),
}

/// What the consumer gets for a simulation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSample<'a> {
    /// The command the peer sent for exactly this frame.
    Fresh(&'a UserCommand),
    /// The frame's command is missing; this is the newest one known.
    Fallback(&'a UserCommand),
    Empty,
}

impl<'a> InputSample<'a> {
    pub fn command(&self) -> Option<&'a UserCommand> {
        match *self {
            Self::Fresh(command) | Self::Fallback(command) => Some(command),
            Self::Empty => None,
        }
    }
}

#[derive(Debug)]
struct PendingReliable {
    message: Message,
    /// Tag of the first packet that carried this payload.
    start_frame: Option<Frame>,
}

/// Protocol state for one remote endpoint.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    schema: Arc<WireSchema>,
    channel: Channel,
    state: ConnectionState,
    commands: CommandRing<UserCommand>,
    snapshots: SnapshotRing<WorldSnapshot>,
    last_requested_frame: Option<Frame>,
    last_received_frame: Option<Frame>,
    last_transmitted_frame: Option<Frame>,
    last_acked_frame: Option<Frame>,
    send_parity: bool,
    expected_parity: bool,
    reliable: VecDeque<PendingReliable>,
    remote_visible: bool,
    stats: ConnectionStats,
}

impl Connection {
    pub fn new(
        role: Role,
        transport: Box<dyn Transport>,
        schema: Arc<WireSchema>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            role,
            channel: Channel::new(transport, Arc::clone(&schema)),
            schema,
            state: ConnectionState::Free,
            commands: CommandRing::new(config.command_capacity),
            snapshots: SnapshotRing::new(config.snapshot_capacity),
            last_requested_frame: None,
            last_received_frame: None,
            last_transmitted_frame: None,
            last_acked_frame: None,
            send_parity: false,
            expected_parity: false,
            reliable: VecDeque::new(),
            remote_visible: true,
            stats: ConnectionStats::default(),
        }
    }

    pub fn peer_id(&self) -> &str {
        self.channel.peer_id()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Drains the channel and applies everything that arrived.
    pub fn receive(&mut self) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();

        for event in self.channel.poll() {
            match event {
                ChannelEvent::Open => {
                    if self.state == ConnectionState::Free {
                        log::debug!("Connection to {} open", self.peer_id());
                        self.state = ConnectionState::Connected;
                        events.push(ConnectionEvent::Connected);
                    }
                }
                ChannelEvent::Close => {
                    if self.state != ConnectionState::Disconnected {
                        log::debug!("Connection to {} closed", self.peer_id());
                        self.teardown();
                        events.push(ConnectionEvent::Disconnected);
                    }
                }
                ChannelEvent::AckInfo { tag } => self.on_ack(tag),
                ChannelEvent::Payload(payload) => {
                    if self.state == ConnectionState::Connected {
                        self.receive_payload(&payload, &mut events);
                    }
                }
            }
        }

        events
    }

    fn on_ack(&mut self, tag: Frame) {
        self.last_acked_frame = Some(self.last_acked_frame.map_or(tag, |f| f.max(tag)));

        let retired = self
            .reliable
            .front()
            .and_then(|pending| pending.start_frame)
            .is_some_and(|start| tag >= start);
        if retired {
            self.reliable.pop_front();
            self.send_parity = !self.send_parity;
            log::trace!("Reliable payload to {} acknowledged at {}", self.peer_id(), tag);
        }
    }

    /// Decodes every message in `payload`. A message that cannot be decoded
    /// ends the packet, since the bytes after it have no known boundary.
    fn receive_payload(&mut self, payload: &[u8], events: &mut Vec<ConnectionEvent>) {
        let mut rest = payload;
        while !rest.is_empty() {
            match Message::decode(rest) {
                Ok((envelope, tail)) => {
                    self.apply(envelope, events);
                    rest = tail;
                }
                Err(e) => {
                    log::warn!("Bad message from {}: {}", self.peer_id(), e);
                    self.stats.decode_errors += 1;
                    break;
                }
            }
        }
    }

    fn apply(&mut self, envelope: Envelope, events: &mut Vec<ConnectionEvent>) {
        let Envelope { parity, message } = envelope;

        if message.is_reliable() {
            if parity != self.expected_parity {
                self.stats.duplicates += 1;
                log::trace!("Reliable {:?} from {} already applied", message.kind(), self.peer_id());
                return;
            }
            self.expected_parity = !self.expected_parity;
        }

        match message {
            Message::VisibilityChange { visible } => {
                self.remote_visible = visible;
                events.push(ConnectionEvent::VisibilityChanged(visible));
            }
            Message::ClientFrame { frame, commands } => {
                if self.role != Role::Server {
                    log::warn!("Ignoring client frame {} from server {}", frame, self.peer_id());
                    return;
                }
                for (i, command) in commands.into_iter().enumerate() {
                    let frame = frame - i as Frame;
                    if self.commands.contains(frame) {
                        continue;
                    }
                    self.commands.set(frame, command);
                    self.classify(frame);
                }
            }
            Message::ServerFrame(snapshot) => {
                if self.role != Role::Client {
                    log::warn!(
                        "Ignoring server frame {} from client {}",
                        snapshot.frame,
                        self.peer_id()
                    );
                    return;
                }
                let frame = snapshot.frame;
                if self.snapshots.get_frame(frame).is_some() {
                    self.stats.duplicates += 1;
                    return;
                }
                self.snapshots.set(snapshot);
                self.classify(frame);
            }
        }
    }

    fn classify(&mut self, frame: Frame) -> PacketClass {
        let class = if self.last_requested_frame.is_some_and(|f| frame <= f) {
            self.stats.late += 1;
            PacketClass::Late
        } else if self.last_received_frame.is_some_and(|f| frame < f) {
            self.stats.filled += 1;
            PacketClass::Filled
        } else {
            self.stats.received += 1;
            PacketClass::Received
        };

        self.last_received_frame = Some(self.last_received_frame.map_or(frame, |f| f.max(frame)));
        class
    }

    /// Records the local command for `frame` so it can be transmitted and
    /// resent as backlog.
    pub fn sample(&mut self, frame: Frame, command: UserCommand) {
        self.commands.set(frame, command);
    }

    /// Sends `frame`'s command together with as much backlog as the peer
    /// may still be missing.
    pub fn transmit_commands(&mut self, frame: Frame) -> bool {
        let body = self.client_frame(frame);
        if body.is_none() {
            log::debug!("No command sampled for frame {}", frame);
        }
        self.transmit(frame, body.as_ref())
    }

    fn client_frame(&self, frame: Frame) -> Option<Message> {
        let backlog_start = frame.saturating_sub(self.schema.max_command_backlog());
        let lowest = self.last_acked_frame.unwrap_or(0).max(backlog_start);
        let span = frame.checked_sub(lowest).map_or(1, |d| d + 1);
        let count = span.min(self.schema.max_repeat_count() as Frame);

        let commands: Vec<UserCommand> = (0..count)
            .map_while(|i| self.commands.get(frame - i).copied())
            .collect();

        if commands.is_empty() {
            None
        } else {
            Some(Message::ClientFrame { frame, commands })
        }
    }

    /// Records `snapshot` as sent and transmits it.
    pub fn transmit_snapshot(&mut self, snapshot: WorldSnapshot) -> bool {
        let frame = snapshot.frame;
        let message = Message::ServerFrame(snapshot);
        let sent = self.transmit(frame, Some(&message));
        if let Message::ServerFrame(snapshot) = message {
            self.snapshots.set(snapshot);
        }
        sent
    }

    fn transmit(&mut self, tag: Frame, body: Option<&Message>) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }

        let mut packet = self.channel.allocate_packet();
        let mut carries_reliable = false;
        if let Some(pending) = self.reliable.front() {
            match packet.push(&pending.message, self.send_parity) {
                Ok(()) => carries_reliable = true,
                Err(e) => log::warn!("Reliable payload for {} not sent: {}", self.peer_id(), e),
            }
        }
        if let Some(body) = body {
            if let Err(e) = packet.push(body, false) {
                log::warn!("{:?} for {} not sent: {}", body.kind(), self.peer_id(), e);
            }
        }

        if !self.channel.send(&packet, tag) {
            return false;
        }

        self.last_transmitted_frame = Some(tag);
        if carries_reliable {
            if let Some(pending) = self.reliable.front_mut() {
                pending.start_frame.get_or_insert(tag);
            }
        }
        true
    }

    /// Queues a reliable message. Once the in-flight payload has been put
    /// on the wire it is never replaced; a newer payload of the same kind
    /// that is still waiting replaces the waiting one.
    pub fn send_reliable(&mut self, message: Message) {
        if !message.is_reliable() {
            log::warn!("{:?} is not a reliable message kind", message.kind());
            return;
        }
        if self.state == ConnectionState::Disconnected {
            return;
        }

        let kind = message.kind();
        let waiting = self
            .reliable
            .iter_mut()
            .find(|pending| pending.start_frame.is_none() && pending.message.kind() == kind);
        match waiting {
            Some(pending) => pending.message = message,
            None => self.reliable.push_back(PendingReliable {
                message,
                start_frame: None,
            }),
        }
    }

    pub fn set_visibility(&mut self, visible: bool) {
        self.send_reliable(Message::VisibilityChange { visible });
    }

    /// The command to simulate for `frame`. Falls back to the newest known
    /// command instead of waiting for a missing one.
    pub fn input_for_frame(&mut self, frame: Frame) -> InputSample<'_> {
        self.last_requested_frame = Some(self.last_requested_frame.map_or(frame, |f| f.max(frame)));

        if let Some(command) = self.commands.get(frame) {
            return InputSample::Fresh(command);
        }
        match self.commands.latest() {
            Some(command) => {
                if self.remote_visible {
                    self.stats.missing_inputs += 1;
                    log::debug!("Missing input from {} for frame {}", self.channel.peer_id(), frame);
                }
                InputSample::Fallback(command)
            }
            None => InputSample::Empty,
        }
    }

    /// Interpolated world state at the fractional `frame`.
    pub fn snapshot_at(&mut self, frame: f64, out: &mut WorldSnapshot) -> bool {
        if frame.is_finite() && frame >= 0.0 {
            let requested = frame.floor() as Frame;
            self.last_requested_frame =
                Some(self.last_requested_frame.map_or(requested, |f| f.max(requested)));
        }
        self.snapshots.get(frame, out)
    }

    /// Closes the transport and drops pending reliable payloads. The
    /// connection cannot be reused.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.channel.close();
        self.teardown();
    }

    fn teardown(&mut self) {
        self.state = ConnectionState::Disconnected;
        if !self.reliable.is_empty() {
            log::debug!("Dropping {} reliable payloads for {}", self.reliable.len(), self.peer_id());
        }
        self.reliable.clear();
    }

    pub fn compute_stats(&mut self) {
        self.channel.compute_stats();
    }

    pub fn ping(&self) -> f32 {
        self.channel.ping()
    }

    pub fn network_stats(&self) -> &NetworkStats {
        self.channel.stats()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn commands(&self) -> &CommandRing<UserCommand> {
        &self.commands
    }

    pub fn snapshots(&self) -> &SnapshotRing<WorldSnapshot> {
        &self.snapshots
    }

    pub fn remote_visible(&self) -> bool {
        self.remote_visible
    }

    pub fn pending_reliable(&self) -> usize {
        self.reliable.len()
    }

    pub fn last_requested_frame(&self) -> Option<Frame> {
        self.last_requested_frame
    }

    pub fn last_received_frame(&self) -> Option<Frame> {
        self.last_received_frame
    }

    pub fn last_transmitted_frame(&self) -> Option<Frame> {
        self.last_transmitted_frame
    }

    pub fn last_acked_frame(&self) -> Option<Frame> {
        self.last_acked_frame
    }
}
