use std::sync::Arc;
use std::time::{Duration, Instant};

use netframe::net::LinkControl;
use netframe::{
    ClientModule, ClockConfig, ConnectionConfig, EntityKind, EntityState, InputSample,
    MemoryTransport, ModuleEvent, ServerModule, ServerModuleConfig, TimeBase, UdpHost,
    UserCommand, WireSchema, WorldSnapshot,
};

struct Session {
    server: ServerModule,
    client: ClientModule,
    clock: TimeBase,
    upstream: LinkControl,
    downstream: LinkControl,
}

impl Session {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let schema = Arc::new(WireSchema::default());
        let (c, s) = MemoryTransport::pair("client", "server");
        let upstream = c.controls();
        let downstream = s.controls();

        let mut server = ServerModule::new(Arc::clone(&schema), ServerModuleConfig::default());
        server.add_peer(s);
        let client = ClientModule::with_transport(c, schema, ConnectionConfig::default());

        let mut session = Self {
            server,
            client,
            clock: TimeBase::new(ClockConfig::default()),
            upstream,
            downstream,
        };
        session.pump();
        assert!(session.client.is_connected());
        assert_eq!(session.server.connected_count(), 1);
        session
    }

    fn pump(&mut self) {
        self.server.receive();
        self.client.receive(&mut self.clock);
    }

    fn send_frame(&mut self, frame: u32) -> bool {
        self.client.sample(frame, command(frame));
        self.client.transmit(frame)
    }

    fn pending_reliable(&self) -> usize {
        self.client.connection().pending_reliable()
    }

    fn server_events(&mut self) -> Vec<ModuleEvent> {
        self.server.drain_events().collect()
    }
}

fn command(frame: u32) -> UserCommand {
    let mut command = UserCommand::default();
    command.move_direction = [(frame % 100) as i8, 0, 1];
    command.encode_view_angles(frame as f32 * 0.01, 0.0);
    command
}

fn snapshot(frame: u32, x: f32) -> WorldSnapshot {
    let mut snapshot = WorldSnapshot::new(frame, frame as f64 * 1000.0 / 60.0);
    let mut state = EntityState::new(1, EntityKind::Player);
    state.position = [x, 0.0, 0.0];
    snapshot.entities.push(state);
    snapshot
}

fn visibility_events(events: &[ModuleEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            ModuleEvent::VisibilityChanged { visible, .. } => Some(*visible),
            _ => None,
        })
        .collect()
}

#[test]
fn test_commands_and_snapshots_flow() {
    let mut session = Session::new();

    for frame in 1..=10 {
        assert!(session.send_frame(frame));
    }
    session.pump();

    for frame in 1..=10 {
        assert_eq!(
            session.server.input_for_frame("client", frame),
            Some(InputSample::Fresh(&command(frame)))
        );
    }

    assert_eq!(session.server.broadcast(&snapshot(20, 20.0)), 1);
    assert_eq!(session.server.broadcast(&snapshot(22, 22.0)), 1);
    session.pump();

    let mut out = WorldSnapshot::default();
    assert!(session.client.snapshot_at(21.0, &mut out));
    assert_eq!(out.entity(1).map(|e| e.position[0]), Some(21.0));
    assert_eq!(out.last_command_frame, 10);

    assert!(!session.client.snapshot_at(23.0, &mut out));
    assert!(session.clock.server_time().is_some());
}

#[test]
fn test_backlog_recovers_dropped_frames() {
    let mut session = Session::new();

    session.send_frame(1);
    session.send_frame(2);
    session.pump();

    session.upstream.set_blocked(true);
    session.send_frame(3);
    session.send_frame(4);
    session.upstream.set_blocked(false);
    session.pump();
    assert!(!session.server.connection("client").unwrap().commands().contains(3));

    session.send_frame(5);
    session.pump();

    let connection = session.server.connection("client").unwrap();
    for frame in 1..=5 {
        assert_eq!(connection.commands().get(frame), Some(&command(frame)));
    }
    assert_eq!(connection.stats().filled, 2);
}

#[test]
fn test_acked_frames_shrink_the_backlog() {
    let mut session = Session::new();

    for frame in 1..=3 {
        session.send_frame(frame);
    }
    session.pump();
    session.server.broadcast(&snapshot(1, 0.0));
    session.pump();
    assert_eq!(session.client.connection().last_acked_frame(), Some(3));

    // Frames 4 and 5 are lost; 6 still carries them since they are past the ack.
    session.upstream.set_blocked(true);
    session.send_frame(4);
    session.send_frame(5);
    session.upstream.set_blocked(false);
    session.send_frame(6);
    session.pump();

    let connection = session.server.connection("client").unwrap();
    assert!(connection.commands().contains(4));
    assert!(connection.commands().contains(5));
}

#[test]
fn test_fallback_uses_newest_frame_after_backfill() {
    let mut session = Session::new();

    session.upstream.set_blocked(true);
    for frame in 1..=5 {
        session.send_frame(frame);
    }
    session.upstream.set_blocked(false);
    session.send_frame(6);
    session.pump();

    let connection = session.server.connection("client").unwrap();
    for frame in 1..=6 {
        assert!(connection.commands().contains(frame));
    }
    assert_eq!(
        session.server.input_for_frame("client", 7),
        Some(InputSample::Fallback(&command(6)))
    );
}

#[test]
fn test_reliable_visibility_survives_loss_and_applies_once() {
    let mut session = Session::new();
    session.server_events();

    session.client.set_visibility(false);
    session.upstream.set_blocked(true);
    session.send_frame(1);
    session.send_frame(2);
    session.upstream.set_blocked(false);

    // Three more packets repeat the payload with the same parity before any ack.
    for frame in 3..=5 {
        session.send_frame(frame);
    }
    session.pump();

    assert_eq!(visibility_events(&session.server_events()), vec![false]);
    let connection = session.server.connection("client").unwrap();
    assert!(!connection.remote_visible());
    assert_eq!(connection.stats().duplicates, 2);
    assert_eq!(session.pending_reliable(), 1);

    session.server.broadcast(&snapshot(1, 0.0));
    session.pump();
    assert_eq!(session.pending_reliable(), 0);

    session.client.set_visibility(true);
    session.send_frame(6);
    session.pump();
    assert_eq!(visibility_events(&session.server_events()), vec![true]);
}

#[test]
fn test_replayed_datagram_is_not_applied_twice() {
    let mut session = Session::new();
    session.server_events();

    session.client.set_visibility(false);
    session.send_frame(1);
    session.upstream.replay_last();
    session.upstream.replay_last();
    session.pump();

    assert_eq!(visibility_events(&session.server_events()), vec![false]);
}

#[test]
fn test_queued_reliable_waits_for_in_flight() {
    let mut session = Session::new();
    session.server_events();

    session.client.set_visibility(false);
    session.send_frame(1);
    session.client.set_visibility(true);
    assert_eq!(session.pending_reliable(), 2);

    session.pump();
    assert_eq!(visibility_events(&session.server_events()), vec![false]);

    // Ack for frame 1 retires the first payload; the second goes out next.
    session.server.broadcast(&snapshot(1, 0.0));
    session.pump();
    assert_eq!(session.pending_reliable(), 1);

    session.send_frame(2);
    session.pump();
    assert_eq!(visibility_events(&session.server_events()), vec![true]);
    assert!(session.server.connection("client").unwrap().remote_visible());
}

#[test]
fn test_lost_snapshots_are_interpolated_over() {
    let mut session = Session::new();

    session.server.broadcast(&snapshot(10, 0.0));
    session.downstream.set_blocked(true);
    session.server.broadcast(&snapshot(11, 5.0));
    session.downstream.set_blocked(false);
    session.server.broadcast(&snapshot(12, 10.0));
    session.pump();

    let mut out = WorldSnapshot::default();
    assert!(session.client.snapshot_at(11.0, &mut out));
    assert_eq!(out.entity(1).map(|e| e.position[0]), Some(5.0));
    assert!(!session.client.snapshot_at(9.0, &mut out));
}

#[test]
fn test_client_disconnect_reaches_server() {
    let mut session = Session::new();
    session.server_events();

    session.client.set_visibility(false);
    session.client.disconnect();
    assert_eq!(session.pending_reliable(), 0);
    assert!(!session.send_frame(1));

    session.pump();
    assert_eq!(session.server.peer_count(), 0);
    assert!(
        session
            .server_events()
            .iter()
            .any(|e| matches!(e, ModuleEvent::PeerLeft { .. }))
    );
}

/// Connects a `ClientModule` to a fresh loopback `UdpHost` and returns the
/// server side already holding the accepted peer.
async fn udp_session(schema: Arc<WireSchema>) -> (ClientModule, UdpHost, ServerModule, String) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut host = UdpHost::bind("127.0.0.1:0", schema.max_packet_size()).unwrap();
    let addr = host.local_addr().unwrap().to_string();

    let connect = ClientModule::connect(
        &addr,
        Duration::from_secs(2),
        Arc::clone(&schema),
        ConnectionConfig::default(),
    );
    let accept = async {
        loop {
            let peers = host.poll();
            if !peers.is_empty() {
                return peers;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let (client, mut peers) = tokio::join!(connect, accept);
    let client = client.unwrap();
    assert_eq!(peers.len(), 1);
    let peer = peers.remove(0);
    let peer_id = peer.addr().to_string();

    let mut server = ServerModule::new(schema, ServerModuleConfig::default());
    server.add_peer(peer);
    (client, host, server, peer_id)
}

#[tokio::test]
async fn test_udp_loopback_round_trip() {
    let schema = Arc::new(WireSchema::default());
    let (mut client, mut host, mut server, peer_id) = udp_session(schema).await;
    let mut clock = TimeBase::new(ClockConfig::default());

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut frame = 0;
    loop {
        frame += 1;
        client.sample(frame, command(frame));
        client.transmit(frame);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(host.poll().is_empty());
        server.receive();
        server.broadcast(&snapshot(frame, frame as f32));
        client.receive(&mut clock);

        let has_command = server
            .connection(&peer_id)
            .is_some_and(|c| c.commands().get(1) == Some(&command(1)));
        if has_command && client.newest_snapshot().is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "no round trip over loopback");
    }

    assert!(clock.server_time().is_some());
    client.disconnect();

    let deadline = Instant::now() + Duration::from_secs(2);
    while server.peer_count() > 0 {
        host.poll();
        server.receive();
        assert!(Instant::now() < deadline, "goodbye never arrived");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_udp_carries_snapshots_up_to_schema_packet_size() {
    let schema = Arc::new(WireSchema::new(0x4E46, 1400, 5).unwrap());
    let (mut client, mut host, mut server, _) = udp_session(Arc::clone(&schema)).await;

    let mut large = snapshot(1, 1.0);
    let mut id = 2;
    while large.to_bytes().unwrap().len() <= netframe::net::MAX_PACKET_SIZE {
        large.entities.push(EntityState::new(id, EntityKind::Projectile));
        id += 1;
    }
    assert!(large.to_bytes().unwrap().len() + 3 <= schema.max_payload_size());

    let mut clock = TimeBase::new(ClockConfig::default());
    server.receive();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut frame = 0;
    while client.newest_snapshot().is_none() {
        frame += 1;
        large.frame = frame;
        assert_eq!(server.broadcast(&large), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        host.poll();
        client.receive(&mut clock);
        assert!(Instant::now() < deadline, "large snapshot never decoded");
    }

    assert_eq!(client.connection().stats().decode_errors, 0);
    let mut out = WorldSnapshot::default();
    let newest = client.newest_snapshot().unwrap();
    assert!(client.snapshot_at(newest as f64, &mut out));
    assert_eq!(out.entities.len(), large.entities.len());
}
