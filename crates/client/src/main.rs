mod debug;
mod game;
mod net;

use std::time::Duration;

use clap::Parser;

use net::{ClientConfig, NetworkClient};
use netframe::net::{DEFAULT_PORT, DEFAULT_TICK_RATE};

#[derive(Parser)]
#[command(name = "netframe-client")]
#[command(about = "Headless netframe client driven by a scripted bot")]
struct Args {
    #[arg(short, long, help = "Server address to connect to (e.g., 127.0.0.1:27015)")]
    server: Option<String>,

    #[arg(long, help = "Stop after this many seconds")]
    duration_secs: Option<u64>,

    #[arg(long, default_value_t = 100.0)]
    render_delay_ms: f64,

    #[arg(long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let addr = args
        .server
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));

    let config = ClientConfig {
        server_tick_rate: args.tick_rate,
        render_delay_ms: args.render_delay_ms,
        ..Default::default()
    };

    let mut client = NetworkClient::connect(&addr, config).await?;
    client.run(args.duration_secs.map(Duration::from_secs)).await;
    log::info!("Exiting");

    Ok(())
}
