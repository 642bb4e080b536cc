mod config;
mod server;
mod simulation;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use config::ServerConfig;
use netframe::PacketLossSimulation;
use netframe::net::{DEFAULT_PORT, DEFAULT_TICK_RATE};
use server::GameServer;

#[derive(Parser)]
#[command(name = "netframe-server")]
#[command(about = "Headless netframe server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 5, help = "Seconds between stats lines (0 disables)")]
    stats_interval_secs: u64,

    #[arg(long, help = "Stop after this many seconds")]
    duration_secs: Option<u64>,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let global_packet_loss = args
        .simulate_packet_loss
        .then(|| PacketLossSimulation::lossy(args.loss_percent));

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        stats_interval_secs: args.stats_interval_secs,
        global_packet_loss,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)?;
    log::info!(
        "Server started on {} at {} Hz",
        server.local_addr()?,
        args.tick_rate
    );
    server.run(args.duration_secs.map(Duration::from_secs));

    Ok(())
}
