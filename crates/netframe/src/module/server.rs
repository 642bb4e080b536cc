use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::Frame;
use crate::net::{
    Connection, ConnectionConfig, ConnectionEvent, InputSample, Role, Transport, WireSchema,
};
use crate::snapshot::WorldSnapshot;

use super::events::{DisconnectReason, ModuleEvent};

pub const DEFAULT_MAX_CLIENTS: usize = 32;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerModuleConfig {
    pub max_clients: usize,
    pub connection: ConnectionConfig,
}

impl Default for ServerModuleConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Owns one connection per peer. Joins and removals requested between
/// ticks are applied at the start of the next `receive`.
pub struct ServerModule {
    schema: Arc<WireSchema>,
    config: ServerModuleConfig,
    connections: BTreeMap<String, Connection>,
    pending_joins: VecDeque<Box<dyn Transport>>,
    pending_removals: VecDeque<String>,
    pending_events: VecDeque<ModuleEvent>,
}

impl ServerModule {
    pub fn new(schema: Arc<WireSchema>, config: ServerModuleConfig) -> Self {
        Self {
            schema,
            config,
            connections: BTreeMap::new(),
            pending_joins: VecDeque::new(),
            pending_removals: VecDeque::new(),
            pending_events: VecDeque::new(),
        }
    }

    pub fn add_peer<T: Transport + 'static>(&mut self, transport: T) {
        self.pending_joins.push_back(Box::new(transport));
    }

    pub fn remove_peer(&mut self, peer_id: &str) {
        self.pending_removals.push_back(peer_id.to_string());
    }

    /// Applies queued joins and removals, then drains every connection.
    pub fn receive(&mut self) {
        self.apply_membership();

        let mut closed = Vec::new();
        for (peer_id, connection) in &mut self.connections {
            for event in connection.receive() {
                match event {
                    ConnectionEvent::Connected => {
                        self.pending_events.push_back(ModuleEvent::PeerConnected {
                            peer_id: peer_id.clone(),
                        });
                    }
                    ConnectionEvent::Disconnected => closed.push(peer_id.clone()),
                    ConnectionEvent::VisibilityChanged(visible) => {
                        self.pending_events.push_back(ModuleEvent::VisibilityChanged {
                            peer_id: peer_id.clone(),
                            visible,
                        });
                    }
                }
            }
        }

        for peer_id in closed {
            self.connections.remove(&peer_id);
            log::info!("Peer {} left", peer_id);
            self.pending_events.push_back(ModuleEvent::PeerLeft {
                peer_id,
                reason: DisconnectReason::Closed,
            });
        }
    }

    fn apply_membership(&mut self) {
        while let Some(peer_id) = self.pending_removals.pop_front() {
            if let Some(mut connection) = self.connections.remove(&peer_id) {
                connection.disconnect();
                log::info!("Peer {} removed", peer_id);
                self.pending_events.push_back(ModuleEvent::PeerLeft {
                    peer_id,
                    reason: DisconnectReason::Kicked,
                });
            }
        }

        while let Some(mut transport) = self.pending_joins.pop_front() {
            let peer_id = transport.peer_id().to_string();

            let denial = if self.connections.contains_key(&peer_id) {
                Some("duplicate peer id")
            } else if self.connections.len() >= self.config.max_clients {
                Some("server full")
            } else {
                None
            };
            if let Some(reason) = denial {
                log::warn!("Denied peer {}: {}", peer_id, reason);
                transport.close();
                self.pending_events.push_back(ModuleEvent::PeerDenied {
                    peer_id,
                    reason: reason.to_string(),
                });
                continue;
            }

            let connection = Connection::new(
                Role::Server,
                transport,
                Arc::clone(&self.schema),
                &self.config.connection,
            );
            self.connections.insert(peer_id.clone(), connection);
            log::info!("Peer {} joined", peer_id);
            self.pending_events.push_back(ModuleEvent::PeerJoined { peer_id });
        }
    }

    /// Sends `snapshot` to every connected peer, each copy stamped with the
    /// newest command frame received from that peer. Returns how many sends
    /// succeeded.
    pub fn broadcast(&mut self, snapshot: &WorldSnapshot) -> usize {
        let mut sent = 0;
        for connection in self.connections.values_mut() {
            if !connection.is_connected() {
                continue;
            }
            let mut copy = snapshot.clone();
            copy.last_command_frame = connection.last_received_frame().unwrap_or(0);
            if connection.transmit_snapshot(copy) {
                sent += 1;
            }
        }
        sent
    }

    pub fn input_for_frame(&mut self, peer_id: &str, frame: Frame) -> Option<InputSample<'_>> {
        self.connections
            .get_mut(peer_id)
            .map(|connection| connection.input_for_frame(frame))
    }

    pub fn compute_stats(&mut self) {
        for connection in self.connections.values_mut() {
            connection.compute_stats();
        }
    }

    pub fn connection(&self, peer_id: &str) -> Option<&Connection> {
        self.connections.get(peer_id)
    }

    pub fn connection_mut(&mut self, peer_id: &str) -> Option<&mut Connection> {
        self.connections.get_mut(peer_id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ModuleEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn shutdown(&mut self) {
        for mut transport in self.pending_joins.drain(..) {
            transport.close();
        }
        for (peer_id, mut connection) in std::mem::take(&mut self.connections) {
            connection.disconnect();
            self.pending_events.push_back(ModuleEvent::PeerLeft {
                peer_id,
                reason: DisconnectReason::Shutdown,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MemoryTransport;

    fn module(max_clients: usize) -> ServerModule {
        ServerModule::new(
            Arc::new(WireSchema::default()),
            ServerModuleConfig {
                max_clients,
                ..Default::default()
            },
        )
    }

    #[test]
    fn joins_apply_at_tick_boundary() {
        let mut server = module(4);
        let (_client, transport) = MemoryTransport::pair("client", "server");
        server.add_peer(transport);
        assert_eq!(server.peer_count(), 0);

        server.receive();
        assert_eq!(server.peer_count(), 1);
        assert_eq!(server.connected_count(), 1);

        let events: Vec<_> = server.drain_events().collect();
        assert_eq!(
            events,
            vec![
                ModuleEvent::PeerJoined {
                    peer_id: "client".into()
                },
                ModuleEvent::PeerConnected {
                    peer_id: "client".into()
                },
            ]
        );
    }

    #[test]
    fn excess_peers_are_denied() {
        let mut server = module(1);
        let (_a, ta) = MemoryTransport::pair("a", "server");
        let (b, tb) = MemoryTransport::pair("b", "server");
        server.add_peer(ta);
        server.add_peer(tb);
        server.receive();

        assert_eq!(server.peer_ids(), vec!["a".to_string()]);
        assert!(!b.is_open());
        assert!(server.drain_events().any(|e| matches!(
            e,
            ModuleEvent::PeerDenied { ref peer_id, .. } if peer_id == "b"
        )));
    }

    #[test]
    fn removal_and_remote_close() {
        let mut server = module(4);
        let (_a, ta) = MemoryTransport::pair("a", "server");
        let (mut b, tb) = MemoryTransport::pair("b", "server");
        server.add_peer(ta);
        server.add_peer(tb);
        server.receive();
        server.drain_events().for_each(drop);

        server.remove_peer("a");
        b.close();
        assert_eq!(server.peer_count(), 2);

        server.receive();
        assert_eq!(server.peer_count(), 0);
        let events: Vec<_> = server.drain_events().collect();
        assert_eq!(
            events,
            vec![
                ModuleEvent::PeerLeft {
                    peer_id: "a".into(),
                    reason: DisconnectReason::Kicked
                },
                ModuleEvent::PeerLeft {
                    peer_id: "b".into(),
                    reason: DisconnectReason::Closed
                },
            ]
        );
    }

    #[test]
    fn unknown_peer_has_no_input() {
        let mut server = module(4);
        assert!(server.input_for_frame("nobody", 3).is_none());
    }
}
