//! Transaction records and payload validation (§3).

use crate::error::EngineError;
use crate::wire::Payload;

/// Lifecycle state of a transaction as tracked by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// PRE_PREPARE received or (at the primary) proposed; prepare votes
    /// still being collected.
    Started,
    /// Prepare quorum reached; commit acks being collected.
    Prepared,
    /// Commit quorum reached; the transaction is final and folded into
    /// balances.
    Committed,
    /// Quorum could not be reached at some phase; the transaction is final
    /// and has no effect on balances.
    Aborted,
}

impl TxStatus {
    /// The wire spelling used in CHECKPOINT_SYNC's `TxSnapshot::status`.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            TxStatus::Started => "STARTED",
            TxStatus::Prepared => "PREPARED",
            TxStatus::Committed => "COMMITTED",
            TxStatus::Aborted => "ABORTED",
        }
    }

    /// Parses the wire spelling back into a status. Unknown strings fall
    /// back to `Started` rather than failing the whole sync, since the
    /// field is advisory context for a newly joined replica, not itself
    /// safety-relevant.
    pub fn from_wire_str(s: &str) -> Self {
        match s {
            "PREPARED" => TxStatus::Prepared,
            "COMMITTED" => TxStatus::Committed,
            "ABORTED" => TxStatus::Aborted,
            _ => TxStatus::Started,
        }
    }
}

/// A single transaction as tracked in a replica's log.
#[derive(Debug, Clone)]
pub struct Tx {
    /// 8 hex-character id, minted by the primary at proposal time.
    pub id: String,
    /// Primary-assigned monotonic sequence number.
    pub seq: u64,
    /// The validated payload.
    pub data: Payload,
    /// Current lifecycle status.
    pub status: TxStatus,
    /// Set once the primary has broadcast COMMIT_VOTE collection has begun,
    /// so a duplicate `progress` command doesn't re-announce.
    pub commit_started: bool,
}

impl Tx {
    /// Validates a client-submitted payload: `operation` must be `deposit`
    /// or `withdraw`, `account` must be non-empty, and `amount` must parse
    /// as an integer (§3, §7).
    pub fn validate(data: &Payload) -> Result<(), EngineError> {
        let operation = data.get("operation").ok_or_else(|| EngineError::InvalidPayload {
            reason: "missing `operation`".into(),
        })?;
        if operation != "deposit" && operation != "withdraw" {
            return Err(EngineError::InvalidPayload {
                reason: format!("unsupported operation `{operation}`"),
            });
        }
        let account = data.get("account").ok_or_else(|| EngineError::InvalidPayload {
            reason: "missing `account`".into(),
        })?;
        if account.trim().is_empty() {
            return Err(EngineError::InvalidPayload {
                reason: "`account` must be non-empty".into(),
            });
        }
        let amount = data.get("amount").ok_or_else(|| EngineError::InvalidPayload {
            reason: "missing `amount`".into(),
        })?;
        let _: i64 = amount.parse().map_err(|_| EngineError::InvalidPayload {
            reason: format!("`amount` is not an integer: {amount}"),
        })?;
        Ok(())
    }

    /// Parses the `key=value,key=value` form the console and CLIENT_TX
    /// record use for payloads.
    pub fn parse_kv(raw: &str) -> Payload {
        raw.split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect()
    }
}
