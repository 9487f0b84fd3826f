use clap::Parser;
use magnetron::mem::channel::ChannelConfig;
use magnetron::mem::config::MemConfig;
use magnetron::sim::config::{Config, SimConfig};
use magnetron::sim::top::SimTop;
use magnetron::traffic::TrafficConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct MagnetronArgs {
    /// TOML file with [sim], [mem], [channel] and [traffic] sections.
    config_path: Option<PathBuf>,

    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    num_requests: Option<u64>,
    #[arg(long)]
    pattern: Option<String>,
}

pub fn main() {
    env_logger::init();
    let argv = MagnetronArgs::parse();

    let root: toml::Value = match &argv.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .unwrap_or_else(|err| panic!("cannot read {}: {err}", path.display()));
            text.parse().expect("cannot parse config file")
        }
        None => toml::Value::Table(Default::default()),
    };

    let mut sim = SimConfig::from_section(root.get("sim"));
    let mem = MemConfig::from_section(root.get("mem"));
    let channel = ChannelConfig::from_section(root.get("channel"));
    let mut traffic = TrafficConfig::from_section(root.get("traffic"));

    sim.timeout = argv.timeout.unwrap_or(sim.timeout);
    sim.num_requests = argv.num_requests.unwrap_or(sim.num_requests);
    if let Some(pattern) = argv.pattern {
        traffic.kind = pattern;
    }

    let mut top = match SimTop::new(&sim, mem, channel, &traffic) {
        Ok(top) => top,
        Err(err) => {
            eprintln!("magnetron: bad configuration: {err}");
            std::process::exit(1);
        }
    };

    match top.run() {
        Ok(summary) => {
            println!(
                "{} cycles, {}/{} transactions completed, {} refreshes, {} power-downs",
                summary.cycles,
                summary.completed,
                summary.injected,
                summary.issued_refreshes,
                summary.power_downs
            );
        }
        Err(dead) => {
            eprintln!("magnetron: {dead}");
            std::process::exit(1);
        }
    }
}
