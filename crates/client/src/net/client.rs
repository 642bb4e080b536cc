use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use netframe::{ClientModule, ModuleEvent, TimeBase, WireSchema, WorldSnapshot};

use crate::debug::DebugStats;
use crate::game::Bot;

use super::config::ClientConfig;

/// Drives one `ClientModule`: samples the bot every fixed step, transmits,
/// and interpolates the server's world at render time.
pub struct NetworkClient {
    module: ClientModule,
    clock: TimeBase,
    config: ClientConfig,
    bot: Bot,
    stats: DebugStats,
    view: WorldSnapshot,
    has_view: bool,
    last_report: Instant,
}

impl NetworkClient {
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self> {
        log::info!("Connecting to {}", addr);
        let module = ClientModule::connect(
            addr,
            Duration::from_secs(config.connection_timeout_secs),
            Arc::new(WireSchema::default()),
            config.connection.clone(),
        )
        .await?;

        Ok(Self {
            module,
            clock: TimeBase::new(config.clock_config()),
            config,
            bot: Bot::default(),
            stats: DebugStats::new(),
            view: WorldSnapshot::default(),
            has_view: false,
            last_report: Instant::now(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.module.is_connected()
    }

    /// Runs until `duration` elapses or the server goes away.
    pub async fn run(&mut self, duration: Option<Duration>) {
        let deadline = duration.map(|d| Instant::now() + d);
        while self.is_connected() && deadline.is_none_or(|d| Instant::now() < d) {
            self.tick_once();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.disconnect();
    }

    pub fn tick_once(&mut self) {
        self.clock.tick_now();
        self.stats.record_frame((self.clock.real_dt() / 1000.0) as f32);

        self.module.receive(&mut self.clock);
        for event in self.module.drain_events() {
            match event {
                ModuleEvent::PeerConnected { peer_id } => log::info!("Linked to {}", peer_id),
                ModuleEvent::PeerLeft { peer_id, reason } => {
                    log::warn!("Server {} {}", peer_id, reason.as_str());
                }
                other => log::debug!("{:?}", other),
            }
        }

        // Frame numbers are meaningless until the clock follows the server.
        if self.clock.server_time().is_some() {
            for _ in 0..self.clock.fixed_updates_due() {
                self.clock.update_fixed();
                let frame = self.clock.sim_frame();
                self.module.sample(frame, self.bot.input_for(frame).to_command());
                self.module.transmit(frame);
                self.stats.record_tick();
            }
        }

        if self.module.newest_snapshot().is_some() {
            let hit = self.module.snapshot_at(self.clock.render_frame(), &mut self.view);
            self.has_view |= hit;
            self.stats.record_lookup(hit);
        }

        let interval = Duration::from_secs(self.config.report_interval_secs);
        if !interval.is_zero() && self.last_report.elapsed() >= interval {
            self.last_report = Instant::now();
            self.report();
        }
    }

    fn report(&mut self) {
        self.module.compute_stats();
        let connection = self.module.connection();
        let net = connection.network_stats();

        log::info!(
            "Frame {} | render {:.1} | ping {:.1} ms | loss {:.1}% | {:.0} fps | {:.0} Hz | interp {:.0}%",
            self.clock.sim_frame(),
            self.clock.render_frame(),
            net.rtt_ms,
            net.packet_loss_percent,
            self.stats.fps(),
            self.stats.tick_rate(),
            self.stats.hit_percent()
        );

        if self.has_view {
            for entity in &self.view.entities {
                let p = entity.position();
                log::info!(
                    "  entity {} at ({:.2}, {:.2}, {:.2}) yaw {:.2}",
                    entity.id,
                    p.x,
                    p.y,
                    p.z,
                    entity.yaw
                );
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.is_connected() {
            log::info!("Disconnecting");
        }
        self.module.disconnect();
    }
}
