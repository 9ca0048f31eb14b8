//! The client console: registers with the cluster, submits transactions to
//! the primary, and prints REPLYs as they arrive (§4.5, §6, §7).

use crate::tx::Tx;
use crate::wire::Record;
use log::{error, info};
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A running client.
pub struct Client {
    host: String,
    port: u16,
    primary: (String, u16),
    send_timeout: Duration,
    recv_timeout: Duration,
    pending: Arc<Mutex<Vec<Record>>>,
}

impl Client {
    /// Builds a client listening on `host:port`, addressing transactions to
    /// `primary`.
    pub fn new(host: String, port: u16, primary: (String, u16), send_timeout: Duration, recv_timeout: Duration) -> Self {
        Client { host, port, primary, send_timeout, recv_timeout, pending: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Starts the REPLY listener on a background thread and sends
    /// CLIENT_HELLO to the primary.
    pub fn start(&self) -> std::io::Result<()> {
        let pending = Arc::clone(&self.pending);
        let host = self.host.clone();
        let port = self.port;
        let recv_timeout = self.recv_timeout;
        std::thread::Builder::new().name("client-listener".into()).spawn(move || {
            let result = crate::transport::serve(&host, port, recv_timeout, move |record| {
                if let Record::Reply { .. } = &record {
                    pending.lock().unwrap().push(record);
                }
            });
            if let Err(e) = result {
                error!(target: "transport", "client listener stopped: {e}");
            }
        })?;

        let hello = Record::ClientHello { host: self.host.clone(), port: self.port };
        crate::transport::send(&self.primary.0, self.primary.1, &hello, self.send_timeout)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    /// Submits `payload` (as `key=value,...`) to the primary.
    pub fn submit(&self, payload: &str) -> std::io::Result<()> {
        Tx::validate(&Tx::parse_kv(payload)).map_err(std::io::Error::other)?;
        let record = Record::ClientTx { data: payload.to_string(), from_port: self.port };
        crate::transport::send(&self.primary.0, self.primary.1, &record, self.send_timeout)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    /// Runs the blocking console loop: `send <payload>`, `list`, `quit`.
    pub fn run_console(&self) {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                break;
            }
            if line == "list" {
                for reply in self.pending.lock().unwrap().iter() {
                    println!("{reply:?}");
                }
                continue;
            }
            if let Some(payload) = line.strip_prefix("send ") {
                match self.submit(payload) {
                    Ok(()) => info!(target: "console", "submitted transaction"),
                    Err(e) => println!("rejected: {e}"),
                }
                continue;
            }
            println!("unknown command: {line}");
        }
    }
}
