//! Command-line parsing, optional `.ini` overrides, and log4rs setup for
//! the replica/client binaries.

use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use mc_utils::ini;
use std::time::Duration;

/// CLI arguments for the `replica` binary.
#[derive(Parser, Debug)]
#[command(name = "replica", about = "A single PBFT replica")]
pub struct ReplicaArgs {
    /// This replica's id, e.g. `P0`.
    #[arg(long)]
    pub id: String,

    /// Host to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long)]
    pub port: u16,

    /// `host:port` of an existing replica to REGISTER with. Omit to start
    /// a fresh cluster with this replica as `P0`.
    #[arg(long)]
    pub bootstrap: Option<String>,

    /// Directory checkpoint files are written under.
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Optional `.ini` file with timeout/log-level overrides.
    #[arg(long, default_value = "pbft.ini")]
    pub config: String,

    /// Console/file log level, overridden by `[logging] level` in the ini
    /// file if present there and not given here.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// CLI arguments for the `client` binary.
#[derive(Parser, Debug)]
#[command(name = "client", about = "A PBFT client console")]
pub struct ClientArgs {
    /// Host to listen for REPLYs on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen for REPLYs on.
    #[arg(long)]
    pub port: u16,

    /// `host:port` of any replica, used to send CLIENT_HELLO and submit
    /// transactions to.
    #[arg(long)]
    pub primary: String,

    /// Optional `.ini` file with timeout/log-level overrides.
    #[arg(long, default_value = "pbft.ini")]
    pub config: String,

    /// Console/file log level.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Resolved transport timeouts, layering CLI/ini overrides over the
/// protocol defaults (§11).
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Time allowed to connect and write one outbound record.
    pub send: Duration,
    /// Time an accepted connection is given to produce its one line.
    pub recv: Duration,
}

impl Timeouts {
    /// Loads overrides from `config` (if it exists and parses), falling
    /// back to the protocol defaults for anything absent.
    pub fn load(config_path: &str) -> Self {
        let mut send = crate::transport::DEFAULT_SEND_TIMEOUT;
        let mut recv = crate::transport::DEFAULT_RECV_TIMEOUT;
        if let Some(ini) = ini::load(config_path) {
            if let Some(ms) = ini::section2var::<u64>(&ini, "timeouts", "send_ms") {
                send = Duration::from_millis(ms);
            }
            if let Some(ms) = ini::section2var::<u64>(&ini, "timeouts", "recv_ms") {
                recv = Duration::from_millis(ms);
            }
        }
        Timeouts { send, recv }
    }
}

/// Resolves the effective log level: CLI flag, then `[logging] level` in
/// the ini file, then `info`.
pub fn resolve_log_level(config_path: &str, cli_level: &Option<String>) -> LevelFilter {
    let raw = cli_level
        .clone()
        .or_else(|| ini::load(config_path).and_then(|ini| ini::section2var::<String>(&ini, "logging", "level")));
    raw.and_then(|s| s.parse().ok()).unwrap_or(LevelFilter::Info)
}

/// Sets up a console appender at `console_level` and a debug-level file
/// appender at `logs/<file_stem>.log`, with per-target loggers for the
/// protocol's noisier subsystems.
pub fn initialize_logging(file_stem: &str, console_level: LevelFilter) {
    let pattern = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
    let console = ConsoleAppender::builder().encoder(Box::new(PatternEncoder::new(pattern))).build();
    let log_path = format!("logs/{file_stem}.log");
    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .append(true)
        .build(&log_path)
        .expect("logs directory must be creatable next to the binary's working directory");

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .logger(Logger::builder().appender("file").additive(true).build("transport", LevelFilter::Debug))
        .logger(Logger::builder().appender("file").additive(true).build("engine", LevelFilter::Debug))
        .logger(Logger::builder().appender("file").additive(true).build("view_change", LevelFilter::Debug))
        .logger(Logger::builder().appender("file").additive(true).build("checkpoint", LevelFilter::Debug))
        .build(Root::builder().appender("console").appender("file").build(console_level))
        .expect("log4rs config should be valid");

    log4rs::init_config(config).expect("log4rs should only be initialized once per process");
}
