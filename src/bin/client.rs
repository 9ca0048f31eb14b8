//! Entry point for the PBFT client console.

use clap::Parser;
use pbft_ledger::client::Client;
use pbft_ledger::config::{initialize_logging, resolve_log_level, ClientArgs, Timeouts};

fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    let log_level = resolve_log_level(&args.config, &args.log_level);
    initialize_logging(&format!("client_{}", args.port), log_level);

    let timeouts = Timeouts::load(&args.config);
    let (primary_host, primary_port) = args
        .primary
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got `{}`", args.primary))?;

    let client = Client::new(
        args.host,
        args.port,
        (primary_host.to_string(), primary_port.parse()?),
        timeouts.send,
        timeouts.recv,
    );
    client.start()?;
    client.run_console();
    Ok(())
}
