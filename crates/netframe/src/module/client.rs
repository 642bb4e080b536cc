use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::Frame;
use crate::net::{
    Connection, ConnectionConfig, ConnectionEvent, NetError, Role, Transport, UdpTransport,
    WireSchema,
};
use crate::simulation::{TimeBase, UserCommand};
use crate::snapshot::WorldSnapshot;

use super::events::{DisconnectReason, ModuleEvent};

/// Server time estimates further than this from the local clock trigger a
/// correction.
pub const RESYNC_THRESHOLD_MS: f64 = 250.0;

/// The single connection of a client to its server.
#[derive(Debug)]
pub struct ClientModule {
    connection: Connection,
    newest_snapshot: Option<Frame>,
    pending_events: VecDeque<ModuleEvent>,
}

impl ClientModule {
    /// Connects over UDP. This is the only call that waits on the network.
    pub async fn connect(
        addr: &str,
        timeout: Duration,
        schema: Arc<WireSchema>,
        config: ConnectionConfig,
    ) -> Result<Self, NetError> {
        let transport = UdpTransport::connect(addr, timeout, schema.max_packet_size()).await?;
        Ok(Self::with_transport(transport, schema, config))
    }

    pub fn with_transport<T: Transport + 'static>(
        transport: T,
        schema: Arc<WireSchema>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            connection: Connection::new(Role::Client, Box::new(transport), schema, &config),
            newest_snapshot: None,
            pending_events: VecDeque::new(),
        }
    }

    pub fn sample(&mut self, frame: Frame, command: UserCommand) {
        self.connection.sample(frame, command);
    }

    pub fn transmit(&mut self, frame: Frame) -> bool {
        self.connection.transmit_commands(frame)
    }

    /// Drains the connection and keeps `clock` on the server's timeline.
    pub fn receive(&mut self, clock: &mut TimeBase) {
        for event in self.connection.receive() {
            let peer_id = self.connection.peer_id().to_string();
            let event = match event {
                ConnectionEvent::Connected => ModuleEvent::PeerConnected { peer_id },
                ConnectionEvent::Disconnected => ModuleEvent::PeerLeft {
                    peer_id,
                    reason: DisconnectReason::Closed,
                },
                ConnectionEvent::VisibilityChanged(visible) => {
                    ModuleEvent::VisibilityChanged { peer_id, visible }
                }
            };
            self.pending_events.push_back(event);
        }

        let Some(snapshot) = self.connection.snapshots().latest() else {
            return;
        };
        if self.newest_snapshot.is_some_and(|frame| snapshot.frame <= frame) {
            return;
        }
        self.newest_snapshot = Some(snapshot.frame);

        let estimate = snapshot.server_time_ms + self.connection.ping() as f64 / 2.0;
        match clock.server_time() {
            None => {
                log::info!(
                    "Synced to server time {:.1} ms at frame {}",
                    estimate,
                    snapshot.frame
                );
                clock.sync_to_server_time(estimate);
            }
            Some(current) if estimate - current > RESYNC_THRESHOLD_MS => {
                log::debug!("Server time ran {:.1} ms ahead, resyncing", estimate - current);
                clock.sync_to_server_time(estimate);
            }
            // Frame tags already sent must stay unique, so a late clock only
            // moves the estimate and lets the simulation wait.
            Some(current) if current - estimate > RESYNC_THRESHOLD_MS => {
                log::debug!("Server time fell {:.1} ms behind, holding frames", current - estimate);
                clock.rewind_server_time(estimate);
            }
            Some(_) => {}
        }
    }

    /// Interpolated world state at the fractional `render_frame`.
    pub fn snapshot_at(&mut self, render_frame: f64, out: &mut WorldSnapshot) -> bool {
        self.connection.snapshot_at(render_frame, out)
    }

    pub fn set_visibility(&mut self, visible: bool) {
        self.connection.set_visibility(visible);
    }

    pub fn compute_stats(&mut self) {
        self.connection.compute_stats();
    }

    pub fn ping(&self) -> f32 {
        self.connection.ping()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn newest_snapshot(&self) -> Option<Frame> {
        self.newest_snapshot
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ModuleEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }
}
