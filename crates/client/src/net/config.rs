use netframe::net::DEFAULT_TICK_RATE;
use netframe::{ClockConfig, ConnectionConfig};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_tick_rate: u32,
    pub render_delay_ms: f64,
    pub sim_lead_ms: f64,
    pub connection_timeout_secs: u64,
    pub report_interval_secs: u64,
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_tick_rate: DEFAULT_TICK_RATE,
            render_delay_ms: 100.0,
            sim_lead_ms: 50.0,
            connection_timeout_secs: 10,
            report_interval_secs: 1,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig {
            sim_dt_ms: 1000.0 / self.server_tick_rate.max(1) as f64,
            render_delay_ms: self.render_delay_ms,
            sim_lead_ms: self.sim_lead_ms,
        }
    }
}
