//! netsim - run a demo network
//!
//! Usage:
//!   netsim --devices 4 --miners 2
//!   netsim --config config/netsim.toml --json-logs

use anyhow::{Context, Result};
use clap::Parser;
use netsim_kernel::{
    exit_code, load_config, ApplicationSpec, DeviceRole, PortKind, SimulationBuilder,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netsim")]
#[command(about = "Distributed-actor network simulator")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Devices in the line topology
    #[arg(short, long, default_value_t = 3)]
    devices: usize,

    /// Override the configured miner count
    #[arg(short, long)]
    miners: Option<usize>,

    /// Messages sent end to end
    #[arg(short, long, default_value_t = 3)]
    rounds: u32,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(miners) = args.miners {
        config.miners = miners;
    }
    let count = args.devices.max(2);
    let rounds = args.rounds;
    info!(devices = count, miners = config.miners, rounds, "Building line topology");

    let mut builder = SimulationBuilder::new(config);
    let labels: Vec<String> = (0..count).map(|i| format!("d{}", i)).collect();
    for label in &labels {
        builder.add_device(label, DeviceRole::Ordinary)?;
    }
    for pair in labels.windows(2) {
        builder.add_channel(PortKind::Classic, &pair[0], &pair[1], 1.0)?;
    }

    let first = labels[0].clone();
    let last = labels[count - 1].clone();
    let target = last.clone();
    builder.add_application(
        &first,
        ApplicationSpec::new("ping", move |app| {
            for round in 0..rounds {
                let code = app.send_classic(&target, "pong", json!({ "round": round }));
                if code != exit_code::OK {
                    warn!(round, code, "Send failed");
                }
                app.dump(json!({ "round": round, "exit_code": code }));
            }
            Ok(())
        }),
    )?;
    builder.add_application(
        &last,
        ApplicationSpec::new("pong", move |app| {
            for _ in 0..rounds {
                match app.recv_classic(None, Duration::from_secs(5)) {
                    Some(packet) => app.dump(json!({
                        "from": packet.sender,
                        "hops": packet.hops,
                        "payload": packet.classic_payload(),
                    })),
                    None => break,
                }
            }
            Ok(())
        })
        .with_deadline(Duration::from_secs(30)),
    )?;

    let result = builder.build()?.run()?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
