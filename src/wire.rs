//! On-wire record types. Every record is a `serde_json` object carrying a
//! `type` tag (via `#[serde(tag = "type")]`), sent newline-delimited over a
//! single-shot TCP connection — the same framing the reference used, ported
//! from ad hoc `dict`s to a typed enum so a malformed peer produces a decode
//! error instead of a runtime `KeyError` three call frames away.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A transaction payload: an ordered mapping of string keys to string values.
/// `BTreeMap` rather than `HashMap` so snapshot text (§4.3, built from this
/// type) is deterministic across nodes without an explicit sort step.
pub type Payload = BTreeMap<String, String>;

/// `(host, port)`, the address shape used throughout the wire format.
pub type Addr = (String, u16);

/// A vote on the PREPARE phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrepareVote {
    /// Replica approves the proposed transaction.
    #[serde(rename = "VOTE_YES")]
    Yes,
    /// Replica rejects the proposed transaction.
    #[serde(rename = "VOTE_NO")]
    No,
}

/// A vote on the COMMIT phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitAck {
    /// Replica acknowledges the commit.
    #[serde(rename = "ACK_COMMIT")]
    Commit,
    /// Replica declines the commit.
    #[serde(rename = "ACK_ABORT")]
    Abort,
}

/// The terminal result carried on a REPLY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxResult {
    /// The transaction reached quorum and was applied.
    #[serde(rename = "COMMITTED")]
    Committed,
    /// The transaction failed to reach quorum and was discarded.
    #[serde(rename = "ABORTED")]
    Aborted,
}

/// Every message type recognized on the wire (§6). `#[serde(tag = "type")]`
/// makes the `type` field double as the enum discriminant, so a `Record`
/// round-trips through JSON exactly as the reference's tagged dicts did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Record {
    /// replica→P0: join the roster.
    #[serde(rename = "REGISTER")]
    Register {
        /// Joining replica's id.
        id: String,
        /// Joining replica's host.
        host: String,
        /// Joining replica's listen port.
        port: u16,
    },
    /// P0→all: roster snapshot.
    #[serde(rename = "MEMBERS")]
    Members {
        /// Full id → (host, port) roster, including P0.
        members: BTreeMap<String, Addr>,
        /// Current view number.
        view: u64,
        /// Current primary id.
        leader: String,
        /// The designated Byzantine id, once chosen.
        byzantine_id: Option<String>,
    },
    /// client→P0: register for REPLYs.
    #[serde(rename = "CLIENT_HELLO")]
    ClientHello {
        /// Client's host.
        host: String,
        /// Client's listen port.
        port: u16,
    },
    /// P0→replicas: advertise a known client.
    #[serde(rename = "CLIENT_JOIN")]
    ClientJoin {
        /// Client's host.
        host: String,
        /// Client's listen port.
        port: u16,
    },
    /// client→primary: submit payload.
    #[serde(rename = "CLIENT_TX")]
    ClientTx {
        /// Raw `key=value,...` payload string, parsed by the primary.
        data: String,
        /// Client's listen port, so the primary knows where the REPLY goes
        /// in case it hasn't seen a CLIENT_HELLO from this client yet.
        from_port: u16,
    },
    /// primary→replicas.
    #[serde(rename = "PRE_PREPARE")]
    PrePrepare {
        /// Transaction id.
        txid: String,
        /// Primary-assigned monotonic sequence number (§3).
        seq: u64,
        /// Transaction payload.
        data: Payload,
        /// Proposing primary's id.
        from: String,
        /// Primary's host, for correlating later REPLY/ABORT traffic.
        primary_host: String,
        /// Primary's port.
        primary_port: u16,
    },
    /// replica→all (or targeted, from the Byzantine node).
    #[serde(rename = "PREPARE")]
    Prepare {
        /// Voting replica's id.
        from: String,
        /// Transaction id being voted on.
        txid: String,
        /// The vote.
        vote: PrepareVote,
    },
    /// replica→all (or targeted, from the Byzantine node).
    #[serde(rename = "COMMIT_VOTE")]
    CommitVote {
        /// Voting replica's id.
        from: String,
        /// Transaction id being voted on.
        txid: String,
        /// The acknowledgement.
        ack: CommitAck,
    },
    /// primary→all (legacy courtesy notice; no safety obligation, §9).
    #[serde(rename = "ABORT")]
    Abort {
        /// Transaction id.
        txid: String,
        /// Primary's id.
        from: String,
    },
    /// primary→clients & replicas.
    #[serde(rename = "REPLY")]
    Reply {
        /// Transaction id.
        txid: String,
        /// Terminal result.
        result: TxResult,
        /// Transaction payload (for the client to read back).
        data: Payload,
        /// Primary's id.
        from: String,
    },
    /// replica→all.
    #[serde(rename = "VIEW_CHANGE")]
    ViewChange {
        /// Requesting replica's id.
        from: String,
    },
    /// new primary→all.
    #[serde(rename = "NEW_VIEW")]
    NewView {
        /// The view being entered.
        new_view: u64,
        /// The new primary's id.
        from: String,
        /// New primary's host.
        primary_host: String,
        /// New primary's port.
        primary_port: u16,
        /// Refreshed roster, if the new primary chooses to carry one.
        members: Option<BTreeMap<String, Addr>>,
        /// The designated Byzantine id, if known.
        byzantine_id: Option<String>,
    },
    /// leader→replicas.
    #[serde(rename = "CHECKPOINT_REQUEST")]
    CheckpointRequest {
        /// Checkpoint id (a monotonic timestamp chosen by the coordinator).
        checkpoint_id: String,
        /// Collector's host, to send the CHECKPOINT_REPORT back to.
        collector_host: String,
        /// Collector's port.
        collector_port: u16,
    },
    /// replica→collector.
    #[serde(rename = "CHECKPOINT_REPORT")]
    CheckpointReport {
        /// Checkpoint id this report belongs to.
        checkpoint_id: String,
        /// Reporting node's id.
        node_id: String,
        /// Snapshot text (§4.3).
        text: String,
    },
    /// primary→recovering replica.
    #[serde(rename = "CHECKPOINT_SYNC")]
    CheckpointSync {
        /// Latest final checkpoint text, concatenated from all nodes.
        text: String,
        /// Sender's current view.
        view: u64,
        /// Sender's current primary id.
        current_primary: String,
        /// Sender's roster.
        members: BTreeMap<String, Addr>,
        /// Sender's host.
        primary_host: String,
        /// Sender's port.
        primary_port: u16,
        /// Full transaction log, keyed by txid.
        tx_log: BTreeMap<String, TxSnapshot>,
        /// Committed transaction payloads, keyed by txid. May be omitted by
        /// a sender that expects the recipient to derive it from `tx_log`.
        state_data: Option<BTreeMap<String, Payload>>,
        /// The designated Byzantine id, if known.
        byzantine_id: Option<String>,
    },
    /// recovering replica→primary.
    #[serde(rename = "RECOVER_HELLO")]
    RecoverHello {
        /// Recovering replica's host.
        host: String,
        /// Recovering replica's port.
        port: u16,
    },
}

/// A single transaction's state as carried inside a CHECKPOINT_SYNC payload;
/// mirrors `tx::Tx` but only what's needed to reconstruct the log on the
/// receiving end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSnapshot {
    /// Status string, one of STARTED/PREPARED/COMMITTED/ABORTED.
    pub status: String,
    /// Transaction payload.
    pub data: Payload,
    /// Primary-assigned sequence number.
    pub seq: u64,
}

/// Parses a single line of newline-delimited input into a `Record`.
pub fn decode(line: &str) -> Result<Record, crate::error::WireError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Serializes `record` as a single line (no trailing newline — the caller
/// appends it when framing for the wire, so this also works for tests that
/// want the bare JSON).
pub fn encode(record: &Record) -> Result<String, crate::error::WireError> {
    Ok(serde_json::to_string(record)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pre_prepare() {
        let mut data = Payload::new();
        data.insert("account".into(), "alice".into());
        data.insert("amount".into(), "100".into());
        data.insert("operation".into(), "deposit".into());
        let record = Record::PrePrepare {
            txid: "a3f09c12".into(),
            seq: 1,
            data,
            from: "P0".into(),
            primary_host: "127.0.0.1".into(),
            primary_port: 5000,
        };
        let line = encode(&record).unwrap();
        assert!(line.contains("\"type\":\"PRE_PREPARE\""));
        let decoded = decode(&line).unwrap();
        match decoded {
            Record::PrePrepare { txid, seq, .. } => {
                assert_eq!(txid, "a3f09c12");
                assert_eq!(seq, 1);
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(decode("not json at all").is_err());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(decode(r#"{"type":"NOT_A_REAL_TYPE"}"#).is_err());
    }

    #[test]
    fn prepare_vote_uses_reference_tag_names() {
        let line = encode(&Record::Prepare {
            from: "P1".into(),
            txid: "deadbeef".into(),
            vote: PrepareVote::Yes,
        })
        .unwrap();
        assert!(line.contains("\"vote\":\"VOTE_YES\""));
    }
}
