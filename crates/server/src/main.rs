mod server;
mod simulation;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use replica::NetConfig;
use server::GameServer;

#[derive(Parser)]
#[command(name = "replica-server")]
#[command(about = "Headless replication server running a demo world")]
struct Args {
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Overrides server.server_port")]
    port: Option<u16>,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, help = "Stop after this many ticks")]
    ticks: Option<u64>,

    #[arg(long, default_value_t = 8)]
    walkers: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NetConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.server_port = port;
    }

    let mut server = GameServer::new(&config, args.tick_rate, args.walkers)?;
    if let Some(addr) = server.local_addr() {
        log::info!("Server started on {}", addr);
    }

    server.run(args.ticks);
    log::info!("Server shutting down");
    Ok(())
}
