//! The protocol engine: the state machine that turns operator commands and
//! inbound wire records into state mutations plus the outbound records the
//! caller must send. Every public method here takes `&mut ReplicaState` and
//! returns `Result<Vec<Outbound>, EngineError>` — the lock is held for the
//! duration of the call and released before any of the returned messages
//! hit the network (§5).

use crate::error::EngineError;
use crate::membership::Roster;
use crate::state::{ClientInfo, ReplicaState};
use crate::tx::{Tx, TxStatus};
use crate::wire::{Addr, CommitAck, Payload, PrepareVote, Record, TxResult};
use mc_utils::ids::short_hex_id;

/// Where an outbound record should go.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Every other known replica.
    BroadcastReplicas,
    /// Every known client.
    BroadcastClients,
    /// A single replica, by id.
    Replica(String),
    /// A single address not (yet) in the roster (used for REGISTER/
    /// CLIENT_HELLO replies and CHECKPOINT_SYNC to a recovering node).
    Addr(Addr),
}

/// An outbound record paired with where it should go.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Destination.
    pub to: Destination,
    /// The record to send.
    pub record: Record,
}

fn out(to: Destination, record: Record) -> Outbound {
    Outbound { to, record }
}

/// Registers a newly-joined replica (REGISTER) or a returning one. Only
/// meaningful at the bootstrap node; other replicas learn the roster from
/// MEMBERS broadcasts. Returns a MEMBERS broadcast to everyone, including
/// the new member.
pub fn on_register(state: &mut ReplicaState, id: String, host: String, port: u16) -> Vec<Outbound> {
    state.roster.insert(id, (host, port));
    state.byzantine_id = state.roster.byzantine_id();
    broadcast_members(state)
}

fn broadcast_members(state: &ReplicaState) -> Vec<Outbound> {
    let record = Record::Members {
        members: state.roster.as_map(),
        view: state.view,
        leader: state.primary().unwrap_or_default(),
        byzantine_id: state.byzantine_id.clone(),
    };
    vec![out(Destination::BroadcastReplicas, record)]
}

/// Applies a MEMBERS record received from the bootstrap node.
pub fn on_members(
    state: &mut ReplicaState,
    members: std::collections::BTreeMap<String, Addr>,
    view: u64,
    byzantine_id: Option<String>,
) {
    state.roster.replace(members);
    state.view = view;
    state.byzantine_id = byzantine_id;
}

/// Records a client registration (CLIENT_HELLO) and, if this replica is the
/// primary, fans it out as CLIENT_JOIN so every replica can reply directly
/// later.
pub fn on_client_hello(state: &mut ReplicaState, host: String, port: u16) -> Vec<Outbound> {
    let key = format!("{host}:{port}");
    state.clients.insert(key, ClientInfo { host: host.clone(), port });
    if state.is_primary() {
        vec![out(Destination::BroadcastReplicas, Record::ClientJoin { host, port })]
    } else {
        Vec::new()
    }
}

/// Records a CLIENT_JOIN advertisement from the primary.
pub fn on_client_join(state: &mut ReplicaState, host: String, port: u16) {
    let key = format!("{host}:{port}");
    state.clients.insert(key, ClientInfo { host, port });
}

/// Proposes a new transaction. Only valid at the primary; fails with
/// `NotLeader` otherwise. Validates the payload, mints an id and sequence
/// number, records the primary's own PREPARE vote (§9's resolution of the
/// "implicit primary vote" question — the primary's YES is a real vote in
/// the same table everyone else's is), and returns the PRE_PREPARE
/// broadcast.
pub fn submit(state: &mut ReplicaState, data: Payload) -> Result<(String, Vec<Outbound>), EngineError> {
    if !state.is_primary() {
        return Err(EngineError::NotLeader { leader: state.primary().unwrap_or_default() });
    }
    if state.roster.is_empty() {
        return Err(EngineError::NoParticipants);
    }
    Tx::validate(&data)?;
    let id = short_hex_id();
    let seq = state.next_seq;
    state.next_seq += 1;
    let my_id = state.id.clone();
    state.insert_tx(id.clone(), seq, data.clone());
    state.entry_mut(&id).unwrap().prepare_votes.record(my_id, PrepareVote::Yes);

    let record = Record::PrePrepare {
        txid: id.clone(),
        seq,
        data,
        from: state.id.clone(),
        primary_host: state.host.clone(),
        primary_port: state.port,
    };
    Ok((id, vec![out(Destination::BroadcastReplicas, record)]))
}

/// Applies an inbound PRE_PREPARE: records the transaction (idempotent on
/// duplicates) and leaves it awaiting a manual PREPARE vote. The engine
/// never auto-votes; the operator casts the vote via the console's
/// `prepare yes|no`, which calls [`cast_prepare_vote`]. A crashed replica
/// drops the message entirely (§5, §7).
pub fn on_pre_prepare(state: &mut ReplicaState, txid: String, seq: u64, data: Payload) -> Vec<Outbound> {
    if state.crashed {
        return Vec::new();
    }
    state.insert_tx(txid, seq, data);
    Vec::new()
}

/// Applies an inbound PREPARE vote. If this pushes the transaction over
/// quorum and the caller is the primary, moves the transaction to
/// `Prepared` and returns nothing further yet — the primary announces the
/// commit phase explicitly via `progress` (§4.1), mirroring the reference's
/// operator-driven phase advance.
pub fn on_prepare(state: &mut ReplicaState, from: String, txid: String, vote: PrepareVote) -> Vec<Outbound> {
    if state.crashed {
        return Vec::new();
    }
    let quorum = state.roster.quorum();
    let Some(entry) = state.entry_mut(&txid) else { return Vec::new() };
    entry.prepare_votes.record(from, vote);
    if entry.tx.status == TxStatus::Started && entry.prepare_votes.count_matching(&PrepareVote::Yes) >= quorum {
        entry.tx.status = TxStatus::Prepared;
    }
    Vec::new()
}

/// Casts this replica's own PREPARE vote (`prepare yes|no`, §4.7): records
/// it locally exactly as an inbound vote from any other peer would be, then
/// broadcasts it so the rest of the cluster can count it too.
pub fn cast_prepare_vote(state: &mut ReplicaState, txid: &str, vote: PrepareVote) -> Result<Vec<Outbound>, EngineError> {
    if state.entry(txid).is_none() {
        return Err(EngineError::NoOngoingTransaction);
    }
    let my_id = state.id.clone();
    let record = Record::Prepare { from: my_id.clone(), txid: txid.to_string(), vote };
    on_prepare(state, my_id, txid.to_string(), vote);
    Ok(vec![out(Destination::BroadcastReplicas, record)])
}

/// Casts this replica's own COMMIT_VOTE (`ack commit|abort`, §4.7); the
/// commit-phase equivalent of [`cast_prepare_vote`]. If this replica is the
/// primary, the same call may also push the transaction over quorum and
/// trigger `finalize` — those messages are appended to the broadcast.
pub fn cast_commit_vote(state: &mut ReplicaState, txid: &str, ack: CommitAck) -> Result<Vec<Outbound>, EngineError> {
    if state.entry(txid).is_none() {
        return Err(EngineError::NoOngoingTransaction);
    }
    let my_id = state.id.clone();
    let mut outbound = vec![out(Destination::BroadcastReplicas, Record::CommitVote { from: my_id.clone(), txid: txid.to_string(), ack })];
    outbound.extend(on_commit_vote(state, my_id, txid.to_string(), ack));
    Ok(outbound)
}

/// Operator-driven advance of the transaction's phase (`progress`, §4.1/§7),
/// primary-only:
/// - If the tx is still `Started` (prepare quorum not reached), it finalizes
///   as `Aborted` right away — it can never collect more PREPAREs once the
///   operator gives up on it.
/// - If `Prepared` and the commit phase hasn't started, announces it by
///   broadcasting the primary's own COMMIT_VOTE, recorded in the same
///   first-writer-wins table as everyone else's.
/// - If already `Committed`/`Aborted`, there is nothing left to advance.
pub fn progress(state: &mut ReplicaState, txid: &str) -> Result<Vec<Outbound>, EngineError> {
    if !state.is_primary() {
        return Err(EngineError::NotLeader { leader: state.primary().unwrap_or_default() });
    }
    let my_id = state.id.clone();
    let status = state.entry(txid).ok_or(EngineError::NoOngoingTransaction)?.tx.status;
    match status {
        TxStatus::Started => {
            state.entry_mut(txid).unwrap().tx.status = TxStatus::Aborted;
            Ok(finalize(state, txid, TxResult::Aborted, &my_id))
        }
        TxStatus::Prepared => {
            let entry = state.entry_mut(txid).unwrap();
            if entry.tx.commit_started {
                return Ok(Vec::new());
            }
            entry.tx.commit_started = true;
            entry.commit_votes.record(my_id.clone(), CommitAck::Commit);
            let record = Record::CommitVote { from: my_id, txid: txid.to_string(), ack: CommitAck::Commit };
            Ok(vec![out(Destination::BroadcastReplicas, record)])
        }
        TxStatus::Committed | TxStatus::Aborted => {
            Err(EngineError::InvalidPayload { reason: "transaction already reached a terminal status".into() })
        }
    }
}

/// Applies an inbound COMMIT_VOTE. Once quorum is reached the transaction
/// becomes `Committed`; if this replica is the primary it also sends the
/// REPLY to the submitting client and, per §9's resolution of the open
/// question, an ABORT-style REPLY is sent on the abort path too so clients
/// never block waiting on a transaction that can't finish.
pub fn on_commit_vote(state: &mut ReplicaState, from: String, txid: String, ack: CommitAck) -> Vec<Outbound> {
    if state.crashed {
        return Vec::new();
    }
    let quorum = state.roster.quorum();
    let total = state.roster.len();
    let is_primary = state.is_primary();
    let my_id = state.id.clone();

    let mut newly_committed = false;
    let mut newly_aborted = false;
    {
        let Some(entry) = state.entry_mut(&txid) else { return Vec::new() };
        entry.commit_votes.record(from, ack);
        if entry.tx.status != TxStatus::Prepared {
            return Vec::new();
        }
        let commits = entry.commit_votes.count_matching(&CommitAck::Commit);
        let aborts = entry.commit_votes.count_matching(&CommitAck::Abort);
        if commits >= quorum {
            entry.tx.status = TxStatus::Committed;
            newly_committed = true;
        } else if aborts >= quorum || commits + (total - entry.commit_votes.len()) < quorum {
            entry.tx.status = TxStatus::Aborted;
            newly_aborted = true;
        }
    }

    let mut outbound = Vec::new();
    if is_primary && newly_committed {
        outbound.extend(finalize(state, &txid, TxResult::Committed, &my_id));
    } else if is_primary && newly_aborted {
        outbound.extend(finalize(state, &txid, TxResult::Aborted, &my_id));
    }
    outbound
}

/// Sends the terminal REPLY (to every known client) and an ABORT courtesy
/// notice to replicas when the result is an abort. Only called by the
/// primary.
fn finalize(state: &ReplicaState, txid: &str, result: TxResult, from: &str) -> Vec<Outbound> {
    let Some(entry) = state.entry(txid) else { return Vec::new() };
    let mut outbound = vec![out(
        Destination::BroadcastClients,
        Record::Reply { txid: txid.to_string(), result, data: entry.tx.data.clone(), from: from.to_string() },
    )];
    if result == TxResult::Aborted {
        outbound.push(out(Destination::BroadcastReplicas, Record::Abort { txid: txid.to_string(), from: from.to_string() }));
    }
    outbound
}

/// A targeted PREPARE or COMMIT_VOTE (`prepare to <id> yes|no`, `ack to <id>
/// commit|abort`), usable only by the designated Byzantine node, letting it
/// equivocate by sending a different vote to different peers instead of one
/// broadcast value (§4.1, §7).
pub fn targeted_vote(state: &ReplicaState, txid: &str, target: &str, vote: PrepareVote) -> Result<Outbound, EngineError> {
    require_byzantine(state)?;
    require_known_peer(state, target)?;
    Ok(out(Destination::Replica(target.to_string()), Record::Prepare { from: state.id.clone(), txid: txid.to_string(), vote }))
}

/// See [`targeted_vote`]; the commit-phase equivalent.
pub fn targeted_ack(state: &ReplicaState, txid: &str, target: &str, ack: CommitAck) -> Result<Outbound, EngineError> {
    require_byzantine(state)?;
    require_known_peer(state, target)?;
    Ok(out(Destination::Replica(target.to_string()), Record::CommitVote { from: state.id.clone(), txid: txid.to_string(), ack }))
}

fn require_byzantine(state: &ReplicaState) -> Result<(), EngineError> {
    match &state.byzantine_id {
        Some(id) if id == &state.id => Ok(()),
        Some(id) => Err(EngineError::NotByzantine { byzantine_id: id.clone() }),
        None => Err(EngineError::NotByzantine { byzantine_id: String::new() }),
    }
}

fn require_known_peer(state: &ReplicaState, id: &str) -> Result<(), EngineError> {
    if state.roster.addr_of(id).is_some() {
        Ok(())
    } else {
        Err(EngineError::UnknownPeer { id: id.to_string() })
    }
}

/// Toggles the `crashed` flag (`crash` / `recover` console commands, §7).
/// While crashed, `on_pre_prepare`/`on_prepare`/`on_commit_vote` all become
/// no-ops, simulating a replica that stops processing messages without
/// closing its socket.
pub fn toggle_crashed(state: &mut ReplicaState, crashed: bool) {
    state.crashed = crashed;
}

/// Returns the id→addr roster for the `status` console command, paired with
/// view/primary/byzantine info (§7's `status`).
pub fn status_report(state: &ReplicaState) -> (Roster, u64, Option<String>, Option<String>) {
    (state.roster.clone(), state.view, state.primary(), state.byzantine_id.clone())
}

/// Returns a rendering of every transaction's id/status/data for the `data`
/// and `list` console commands.
pub fn data_report(state: &ReplicaState) -> Vec<(String, &'static str, Payload)> {
    state.tx_log.values().map(|e| (e.tx.id.clone(), e.tx.status.as_wire_str(), e.tx.data.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ReplicaState;

    fn cluster() -> Vec<ReplicaState> {
        let mut nodes = Vec::new();
        for i in 0..4 {
            nodes.push(ReplicaState::new(format!("P{i}"), "127.0.0.1", 5000 + i as u16, "/tmp/pbft_engine_test"));
        }
        for n in nodes.iter_mut() {
            for i in 0..4 {
                n.roster.insert(format!("P{i}"), ("127.0.0.1".into(), 5000 + i as u16));
            }
            n.byzantine_id = n.roster.byzantine_id();
        }
        nodes
    }

    fn payload() -> Payload {
        let mut p = Payload::new();
        p.insert("operation".into(), "deposit".into());
        p.insert("account".into(), "alice".into());
        p.insert("amount".into(), "100".into());
        p
    }

    #[test]
    fn submit_fails_when_not_primary() {
        let mut nodes = cluster();
        nodes[1].view = 0; // P1 is not primary at view 0
        assert!(submit(&mut nodes[1], payload()).is_err());
    }

    #[test]
    fn prepare_quorum_transitions_to_prepared() {
        let mut nodes = cluster();
        let (txid, _) = submit(&mut nodes[0], payload()).unwrap();
        // P0 already has its own YES recorded by submit(); two more reach quorum 3.
        on_prepare(&mut nodes[0], "P1".into(), txid.clone(), PrepareVote::Yes);
        assert_eq!(nodes[0].entry(&txid).unwrap().tx.status, TxStatus::Started);
        on_prepare(&mut nodes[0], "P2".into(), txid.clone(), PrepareVote::Yes);
        assert_eq!(nodes[0].entry(&txid).unwrap().tx.status, TxStatus::Prepared);
    }

    #[test]
    fn commit_quorum_finalizes_and_emits_reply() {
        let mut nodes = cluster();
        let (txid, _) = submit(&mut nodes[0], payload()).unwrap();
        on_prepare(&mut nodes[0], "P1".into(), txid.clone(), PrepareVote::Yes);
        on_prepare(&mut nodes[0], "P2".into(), txid.clone(), PrepareVote::Yes);
        let progressed = progress(&mut nodes[0], &txid).unwrap();
        assert_eq!(progressed.len(), 1);
        on_commit_vote(&mut nodes[0], "P1".into(), txid.clone(), CommitAck::Commit);
        let outbound = on_commit_vote(&mut nodes[0], "P2".into(), txid.clone(), CommitAck::Commit);
        assert_eq!(nodes[0].entry(&txid).unwrap().tx.status, TxStatus::Committed);
        assert!(outbound.iter().any(|o| matches!(o.record, Record::Reply { result: TxResult::Committed, .. })));
    }

    #[test]
    fn insufficient_prepares_finalize_as_aborted_on_progress() {
        let mut nodes = cluster();
        let (txid, _) = submit(&mut nodes[0], payload()).unwrap();
        on_prepare(&mut nodes[0], "P1".into(), txid.clone(), PrepareVote::No);
        on_prepare(&mut nodes[0], "P2".into(), txid.clone(), PrepareVote::No);
        assert_eq!(nodes[0].entry(&txid).unwrap().tx.status, TxStatus::Started);
        let outbound = progress(&mut nodes[0], &txid).unwrap();
        assert_eq!(nodes[0].entry(&txid).unwrap().tx.status, TxStatus::Aborted);
        assert!(outbound.iter().any(|o| matches!(o.record, Record::Reply { result: TxResult::Aborted, .. })));
    }

    #[test]
    fn on_pre_prepare_records_tx_without_auto_voting() {
        let mut nodes = cluster();
        let out = on_pre_prepare(&mut nodes[1], "abc12345".into(), 0, payload());
        assert!(out.is_empty());
        let entry = nodes[1].entry("abc12345").unwrap();
        assert_eq!(entry.tx.status, TxStatus::Started);
        assert!(entry.prepare_votes.is_empty());
    }

    #[test]
    fn cast_prepare_vote_records_locally_and_broadcasts() {
        let mut nodes = cluster();
        on_pre_prepare(&mut nodes[1], "abc12345".into(), 0, payload());
        let outbound = cast_prepare_vote(&mut nodes[1], "abc12345", PrepareVote::Yes).unwrap();
        assert_eq!(outbound.len(), 1);
        assert!(matches!(outbound[0].to, Destination::BroadcastReplicas));
        assert_eq!(nodes[1].entry("abc12345").unwrap().prepare_votes.get("P1"), Some(&PrepareVote::Yes));
    }

    #[test]
    fn cast_prepare_vote_rejects_unknown_txid() {
        let mut nodes = cluster();
        assert!(cast_prepare_vote(&mut nodes[1], "nope0000", PrepareVote::Yes).is_err());
    }

    #[test]
    fn targeted_vote_requires_byzantine_designation() {
        let nodes = cluster();
        // P3 is the designated Byzantine node at n=4.
        assert!(targeted_vote(&nodes[0], "abc", "P1", PrepareVote::Yes).is_err());
        assert!(targeted_vote(&nodes[3], "abc", "P1", PrepareVote::Yes).is_ok());
    }

    #[test]
    fn crashed_replica_ignores_inbound_messages() {
        let mut nodes = cluster();
        toggle_crashed(&mut nodes[1], true);
        let out = on_pre_prepare(&mut nodes[1], "abc12345".into(), 0, payload());
        assert!(out.is_empty());
        assert!(nodes[1].entry("abc12345").is_none());
    }
}
