//! `ReplicaState`: every piece of mutable state a replica holds, combined
//! behind the single `Mutex` that `Replica` (in `replica.rs`) serializes all
//! access through. Nothing here talks to the network — `engine.rs` mutates
//! this struct and hands back the outbound messages for the caller to send
//! once the lock is released.

use crate::membership::Roster;
use crate::tx::{Tx, TxStatus};
use crate::votes::VoteTable;
use crate::wire::{Addr, CommitAck, Payload, PrepareVote};
use std::collections::BTreeMap;

/// Per-transaction bookkeeping: the record itself plus its two vote tables.
pub struct TxEntry {
    /// The transaction record.
    pub tx: Tx,
    /// PREPARE votes, keyed by voting replica id.
    pub prepare_votes: VoteTable<PrepareVote>,
    /// COMMIT_VOTE acks, keyed by voting replica id.
    pub commit_votes: VoteTable<CommitAck>,
}

impl TxEntry {
    fn new(tx: Tx) -> Self {
        Self { tx, prepare_votes: VoteTable::new(), commit_votes: VoteTable::new() }
    }
}

/// A client the replica knows how to reach with a REPLY.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Client's host.
    pub host: String,
    /// Client's listen port.
    pub port: u16,
}

/// A pending coordinated checkpoint this node started collecting reports
/// for.
#[derive(Debug, Clone, Default)]
pub struct CheckpointCollection {
    /// The id assigned to the round in progress, if any.
    pub checkpoint_id: Option<String>,
    /// Reports received so far, keyed by reporting node id.
    pub reports: BTreeMap<String, String>,
}

/// All mutable state for one replica.
pub struct ReplicaState {
    /// This replica's own id.
    pub id: String,
    /// This replica's host.
    pub host: String,
    /// This replica's listen port.
    pub port: u16,
    /// Known cluster membership.
    pub roster: Roster,
    /// Current view number; the primary is `roster.primary_for(view)`.
    pub view: u64,
    /// Sequence number the primary hands out to the next proposal. Ignored
    /// by non-primary replicas except for display.
    pub next_seq: u64,
    /// Transactions indexed by id, in the order they were first seen.
    pub tx_log: BTreeMap<String, TxEntry>,
    /// Clients known to this replica, keyed by `host:port`.
    pub clients: BTreeMap<String, ClientInfo>,
    /// Whether this replica is presently "crashed" (ignores all inbound
    /// traffic and operator commands except `recover`), per §5/§7.
    pub crashed: bool,
    /// VIEW_CHANGE votes received for the view currently being negotiated.
    pub view_change_votes: VoteTable<bool>,
    /// The view a VIEW_CHANGE round is trying to reach, if one is underway.
    pub pending_view: Option<u64>,
    /// The designated Byzantine id, once the roster is large enough to have
    /// one (§9).
    pub byzantine_id: Option<String>,
    /// In-progress checkpoint collection, if this node is the coordinator.
    pub checkpoint: CheckpointCollection,
    /// Path to this replica's append-only local checkpoint log.
    pub checkpoint_log_path: String,
    /// Directory final (coordinated) checkpoints are written under.
    pub checkpoint_dir: String,
    /// The id of the most recently proposed or received transaction, used
    /// by the console's implicit-subject commands (`prepare yes|no`,
    /// `ack commit|abort`, `progress`) under the one-transaction-at-a-time
    /// operator discipline (§7). Explicit-id commands don't consult this.
    pub current_txid: Option<String>,
}

impl ReplicaState {
    /// Creates state for a fresh replica with id `id`, listening on
    /// `host:port`, writing checkpoint files under `checkpoint_dir`.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, checkpoint_dir: impl Into<String>) -> Self {
        let id = id.into();
        let checkpoint_dir = checkpoint_dir.into();
        let checkpoint_log_path = format!("{checkpoint_dir}/{id}_checkpoints.log");
        Self {
            id,
            host: host.into(),
            port,
            roster: Roster::new(),
            view: 0,
            next_seq: 0,
            tx_log: BTreeMap::new(),
            clients: BTreeMap::new(),
            crashed: false,
            view_change_votes: VoteTable::new(),
            pending_view: None,
            byzantine_id: None,
            checkpoint: CheckpointCollection::default(),
            checkpoint_log_path,
            checkpoint_dir,
            current_txid: None,
        }
    }

    /// This replica's own address.
    pub fn self_addr(&self) -> Addr {
        (self.host.clone(), self.port)
    }

    /// The current primary, if the roster is non-empty.
    pub fn primary(&self) -> Option<String> {
        self.roster.primary_for(self.view)
    }

    /// True if this replica is the current primary.
    pub fn is_primary(&self) -> bool {
        self.primary().as_deref() == Some(self.id.as_str())
    }

    /// Inserts a freshly-proposed or freshly-received transaction, returning
    /// `false` if `txid` was already known (the caller should treat a
    /// duplicate PRE_PREPARE as a no-op, not an error).
    pub fn insert_tx(&mut self, id: String, seq: u64, data: Payload) -> bool {
        if self.tx_log.contains_key(&id) {
            return false;
        }
        self.current_txid = Some(id.clone());
        self.tx_log.insert(
            id.clone(),
            TxEntry::new(Tx { id, seq, data, status: TxStatus::Started, commit_started: false }),
        );
        true
    }

    /// Mutable access to a transaction's bookkeeping.
    pub fn entry_mut(&mut self, txid: &str) -> Option<&mut TxEntry> {
        self.tx_log.get_mut(txid)
    }

    /// Inserts or overwrites a transaction from a CHECKPOINT_SYNC snapshot.
    /// Vote tables are reset, since the sender's votes aren't transferred —
    /// only the outcome (status/data/seq) is, which is all a recovering
    /// replica needs to resume participating.
    pub fn apply_tx_snapshot(&mut self, id: String, status: TxStatus, data: Payload, seq: u64) {
        self.current_txid = Some(id.clone());
        self.tx_log.insert(id.clone(), TxEntry::new(Tx { id, seq, data, status, commit_started: status != TxStatus::Started }));
    }

    /// Read access to a transaction's bookkeeping.
    pub fn entry(&self, txid: &str) -> Option<&TxEntry> {
        self.tx_log.get(txid)
    }

    /// Payloads of every committed transaction, in log order — the input to
    /// `balances::fold`.
    pub fn committed_payloads(&self) -> impl Iterator<Item = &Payload> {
        self.tx_log.values().filter(|e| e.tx.status == TxStatus::Committed).map(|e| &e.tx.data)
    }

    /// Renders a human-readable snapshot of committed balances, the text
    /// embedded in CHECKPOINT_REPORT and appended to the local checkpoint
    /// log (§4.3).
    pub fn snapshot_text(&self) -> String {
        let balances = crate::balances::fold(self.committed_payloads());
        let mut lines: Vec<String> = balances.iter().map(|(acct, bal)| format!("{acct}={bal}")).collect();
        lines.sort();
        format!("node={} view={} txs={} | {}", self.id, self.view, self.tx_log.len(), lines.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ReplicaState {
        let mut s = ReplicaState::new("P0", "127.0.0.1", 5000, "/tmp/pbft_test_checkpoints");
        s.roster.insert("P0", ("127.0.0.1".into(), 5000));
        s.roster.insert("P1", ("127.0.0.1".into(), 5001));
        s.roster.insert("P2", ("127.0.0.1".into(), 5002));
        s.roster.insert("P3", ("127.0.0.1".into(), 5003));
        s
    }

    #[test]
    fn is_primary_reflects_view_rotation() {
        let mut s = state();
        assert!(s.is_primary());
        s.view = 1;
        assert!(!s.is_primary());
    }

    #[test]
    fn insert_tx_rejects_duplicate_id() {
        let mut s = state();
        assert!(s.insert_tx("abc12345".into(), 1, Payload::new()));
        assert!(!s.insert_tx("abc12345".into(), 2, Payload::new()));
    }

    #[test]
    fn snapshot_text_reflects_only_committed_txs() {
        let mut s = state();
        let mut data = Payload::new();
        data.insert("operation".into(), "deposit".into());
        data.insert("account".into(), "alice".into());
        data.insert("amount".into(), "100".into());
        s.insert_tx("abc12345".into(), 1, data);
        assert!(!s.snapshot_text().contains("alice=100"));
        s.entry_mut("abc12345").unwrap().tx.status = TxStatus::Committed;
        assert!(s.snapshot_text().contains("alice=100"));
    }
}
