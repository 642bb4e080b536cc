use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use netframe::{
    ClockConfig, ModuleEvent, ServerModule, TimeBase, UdpHost, WireSchema,
};

use crate::config::ServerConfig;
use crate::simulation::{World, apply_command};

pub struct GameServer {
    host: UdpHost,
    module: ServerModule,
    clock: TimeBase,
    world: World,
    config: ServerConfig,
    last_stats: Instant,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Result<Self> {
        let schema = Arc::new(WireSchema::default());
        let mut host = UdpHost::bind(bind_addr, schema.max_packet_size())?;
        host.set_simulation(config.global_packet_loss.clone());

        let clock = TimeBase::new(ClockConfig {
            sim_dt_ms: config.sim_dt_ms(),
            render_delay_ms: 0.0,
            sim_lead_ms: 0.0,
        });
        let module = ServerModule::new(schema, config.module_config());

        Ok(Self {
            host,
            module,
            clock,
            world: World::default(),
            config,
            last_stats: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.host.local_addr()
    }

    /// Ticks until `duration` elapses, or forever.
    pub fn run(&mut self, duration: Option<Duration>) {
        let deadline = duration.map(|d| Instant::now() + d);
        while deadline.is_none_or(|d| Instant::now() < d) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        for peer in self.host.poll() {
            self.module.add_peer(peer);
        }
        self.module.receive();
        self.handle_events();

        self.clock.tick_now();
        for _ in 0..self.clock.fixed_updates_due() {
            self.clock.update_fixed();
            self.simulate_frame();
        }

        let interval = Duration::from_secs(self.config.stats_interval_secs);
        if !interval.is_zero() && self.last_stats.elapsed() >= interval {
            self.last_stats = Instant::now();
            self.log_stats();
        }
    }

    fn handle_events(&mut self) {
        let events: Vec<_> = self.module.drain_events().collect();
        for event in events {
            match event {
                ModuleEvent::PeerJoined { peer_id } => {
                    let entity = self.world.spawn(&peer_id);
                    log::info!("Client {} joined as entity {}", peer_id, entity);
                }
                ModuleEvent::PeerConnected { .. } => {}
                ModuleEvent::PeerLeft { peer_id, reason } => {
                    self.world.despawn(&peer_id);
                    log::info!("Client {} {}", peer_id, reason.as_str());
                }
                ModuleEvent::PeerDenied { peer_id, reason } => {
                    log::warn!("Connection denied to {}: {}", peer_id, reason);
                }
                ModuleEvent::VisibilityChanged { peer_id, visible } => {
                    log::debug!("Client {} visible: {}", peer_id, visible);
                }
            }
        }
    }

    fn simulate_frame(&mut self) {
        let frame = self.clock.sim_frame();
        let dt = (self.clock.sim_dt() / 1000.0) as f32;

        for peer_id in self.module.peer_ids() {
            let Some(avatar) = self.world.avatar_mut(&peer_id) else {
                continue;
            };
            let sample = self.module.input_for_frame(&peer_id, frame);
            if let Some(command) = sample.and_then(|s| s.command()) {
                apply_command(avatar, command, dt);
            }
        }

        let snapshot = self.world.snapshot(frame, self.clock.sim_time());
        self.module.broadcast(&snapshot);
    }

    fn log_stats(&mut self) {
        self.module.compute_stats();
        log::info!(
            "Frame {} | {} clients | {} entities",
            self.clock.sim_frame(),
            self.module.connected_count(),
            self.world.len()
        );
        for connection in self.module.connections() {
            let net = connection.network_stats();
            let stats = connection.stats();
            log::info!(
                "  {} | ping {:.1} ms | loss {:.1}% | up {:.1} kbps | down {:.1} kbps | late {} | filled {} | missing {}",
                connection.peer_id(),
                net.rtt_ms,
                net.packet_loss_percent,
                net.received_kbps,
                net.sent_kbps,
                stats.late,
                stats.filled,
                stats.missing_inputs
            );
        }
    }

    pub fn shutdown(&mut self) {
        self.module.shutdown();
        self.handle_events();
        log::info!("Server shutting down");
    }
}
