//! Real TCP transport, grounded in the reference's `json_send`/`json_server`
//! (`pbft_utils.py`): newline-delimited JSON over a one-shot connection per
//! message, a listener that spawns a thread per accepted connection, and
//! fixed send/receive timeouts so a hung peer can't block a caller forever.

use crate::error::{PbftError, TransportError};
use crate::wire::{decode, encode, Record};
use log::{debug, warn};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Default time allowed to establish a connection and write one record.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);
/// Default time allowed to wait for one inbound record on an accepted
/// connection before giving up on it.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to `host:port`, writes `record` as one newline-terminated JSON
/// line, and returns. Each call opens and tears down its own connection —
/// there is no persistent peer socket, matching the reference's model of
/// "a message is a connection".
pub fn send(host: &str, port: u16, record: &Record, timeout: Duration) -> Result<(), PbftError> {
    let addr = format!("{host}:{port}");
    let mut stream = TcpStream::connect(&addr).map_err(|source| TransportError::Connect { addr: addr.clone(), source })?;
    stream.set_write_timeout(Some(timeout)).map_err(|source| TransportError::Send { addr: addr.clone(), source })?;
    let line = encode(record)?;
    debug!(target: "transport", "-> {addr}: {line}");
    stream
        .write_all(format!("{line}\n").as_bytes())
        .map_err(|source| TransportError::Send { addr: addr.clone(), source })?;
    stream.shutdown(std::net::Shutdown::Write).ok();
    Ok(())
}

/// Starts a listener on `host:port` and spawns a thread per accepted
/// connection; each thread reads exactly one line, decodes it, and invokes
/// `handler`. Returns once the listener itself fails to bind; the spawned
/// threads run detached for the lifetime of the process.
pub fn serve<F>(host: &str, port: u16, recv_timeout: Duration, handler: F) -> std::io::Result<()>
where
    F: Fn(Record) + Send + Sync + 'static,
{
    let listener = TcpListener::bind((host, port))?;
    let handler = Arc::new(handler);
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "transport", "accept failed: {e}");
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        std::thread::spawn(move || handle_connection(stream, recv_timeout, handler.as_ref()));
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, recv_timeout: Duration, handler: &(impl Fn(Record) + Send + Sync)) {
    if stream.set_read_timeout(Some(recv_timeout)).is_err() {
        return;
    }
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
    let mut reader = BufReader::new(&mut stream);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => {}
        Ok(_) => match decode(&line) {
            Ok(record) => {
                debug!(target: "transport", "<- {peer}: {line}", line = line.trim());
                handler(record);
            }
            Err(e) => warn!(target: "transport", "malformed record from {peer}: {e}"),
        },
        Err(e) => warn!(target: "transport", "read from {peer} failed: {e}"),
    }
}
