//! Entry point for a single PBFT replica process.

use clap::Parser;
use pbft_ledger::config::{initialize_logging, resolve_log_level, ReplicaArgs, Timeouts};
use pbft_ledger::replica::Replica;

fn main() -> anyhow::Result<()> {
    let args = ReplicaArgs::parse();
    let log_level = resolve_log_level(&args.config, &args.log_level);
    initialize_logging(&args.id, log_level);

    let timeouts = Timeouts::load(&args.config);
    let bootstrap = args
        .bootstrap
        .as_deref()
        .map(|hp| parse_host_port(hp))
        .transpose()?;

    let replica = Replica::new(args.id, args.host, args.port, args.checkpoint_dir, timeouts);
    replica.start(bootstrap)?;
    replica.run_console();
    Ok(())
}

fn parse_host_port(raw: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got `{raw}`"))?;
    Ok((host.to_string(), port.parse()?))
}
