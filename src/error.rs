//! Error hierarchy for the crate. Transport and wire failures are expected to
//! happen constantly in an unreliable network and are almost always logged
//! and swallowed rather than propagated; `EngineError` is the one variant
//! that reaches the operator console as a rejected command.

use thiserror::Error;

/// Top-level error type returned by library functions that can fail at more
/// than one layer (transport, wire decoding, or protocol rule).
#[derive(Debug, Error)]
pub enum PbftError {
    /// A send or connect attempt failed or timed out.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A record could not be decoded from (or encoded to) the wire.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A protocol-level rule was violated by the requested operation.
    #[error("protocol error: {0}")]
    Protocol(#[from] EngineError),

    /// A filesystem operation (checkpoint read/write) failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures in actually moving bytes between processes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `TcpStream::connect`/`connect_timeout` failed.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// Peer address we attempted to reach.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The send completed the connect but failed to write or shut down.
    #[error("send to {addr} failed: {source}")]
    Send {
        /// Peer address we attempted to reach.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Failures decoding a newline-delimited record.
#[derive(Debug, Error)]
pub enum WireError {
    /// `serde_json` could not parse the line as a `Record`.
    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),

    /// The record parsed but was missing a field required for its `type`.
    #[error("record of type {type_name} is missing field {field}")]
    MissingField {
        /// The record's `type` tag.
        type_name: String,
        /// The field that was required but absent.
        field: &'static str,
    },
}

/// Rule violations raised by the protocol engine in response to an operator
/// command or an inbound message.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum EngineError {
    /// The command requires the local replica to be the current primary.
    #[error("not the current primary (leader is {leader})")]
    NotLeader {
        /// The id of the replica that is actually the primary right now.
        leader: String,
    },

    /// `submit` was called with a payload that fails validation.
    #[error("invalid transaction payload: {reason}")]
    InvalidPayload {
        /// Human-readable reason the payload was rejected.
        reason: String,
    },

    /// A leader-only command was issued before any participant registered.
    #[error("no participants registered; cannot start a transaction")]
    NoParticipants,

    /// The operator referenced a transaction id that has no ongoing work.
    #[error("no ongoing transaction")]
    NoOngoingTransaction,

    /// A targeted vote/ack command was issued by a node that isn't the
    /// designated Byzantine id.
    #[error("only the Byzantine node ({byzantine_id}) may send targeted votes")]
    NotByzantine {
        /// The id actually designated as Byzantine (if any has been chosen).
        byzantine_id: String,
    },

    /// A targeted vote/ack command referenced an unknown peer id.
    #[error("unknown peer id: {id}")]
    UnknownPeer {
        /// The id the operator tried to target.
        id: String,
    },
}
