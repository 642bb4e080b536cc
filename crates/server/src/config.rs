use netframe::net::DEFAULT_TICK_RATE;
use netframe::{ConnectionConfig, PacketLossSimulation, ServerModuleConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub snapshot_buffer_size: usize,
    pub stats_interval_secs: u64,
    pub global_packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            snapshot_buffer_size: 64,
            stats_interval_secs: 5,
            global_packet_loss: None,
        }
    }
}

impl ServerConfig {
    pub fn sim_dt_ms(&self) -> f64 {
        1000.0 / self.tick_rate.max(1) as f64
    }

    pub fn module_config(&self) -> ServerModuleConfig {
        ServerModuleConfig {
            max_clients: self.max_clients,
            connection: ConnectionConfig {
                snapshot_capacity: self.snapshot_buffer_size,
                ..Default::default()
            },
        }
    }
}
