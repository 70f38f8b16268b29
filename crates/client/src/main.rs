mod session;
mod world;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use replica::NetConfig;
use session::Session;

#[derive(Parser)]
#[command(name = "replica-client")]
#[command(about = "Headless replication client")]
struct Args {
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Overrides client.client_port (0 scans the port range)")]
    port: Option<u16>,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long, help = "Stop after this many ticks")]
    ticks: Option<u64>,
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
        config.client.client_port = port;
    }

    let mut session = Session::new(
        config.client,
        config.replication.max_entities,
        args.tick_rate,
    )?;
    session.run(args.ticks);
    log::info!("Client shutting down");
    Ok(())
}
