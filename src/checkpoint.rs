//! Checkpointing and state transfer (§4.3, §4.4, §8's checkpoint scenario).
//!
//! Two independent mechanisms live here: a purely local, unsolicited
//! snapshot any replica can append to its own log at any time, and a
//! leader-coordinated round that collects a snapshot from every replica and
//! assembles them into one `final_checkpoint_<id>.log` file used to bring a
//! recovering replica back up to date.

use crate::engine::{Destination, Outbound};
use crate::state::ReplicaState;
use crate::tx::TxStatus;
use crate::wire::{Record, TxSnapshot};
use mc_utils::filehelper::FileHelper;
use mc_utils::ids::short_hex_id;
use std::collections::BTreeMap;

/// Appends this replica's current snapshot text to its own checkpoint log
/// (the `checkpoint` console command taken by a non-coordinating replica).
pub fn local_checkpoint(state: &ReplicaState) -> std::io::Result<()> {
    FileHelper::append_to_file_ln(&state.checkpoint_log_path, &state.snapshot_text())
}

/// Starts a coordinated checkpoint round: mints a checkpoint id, records
/// this node as the collector, and broadcasts CHECKPOINT_REQUEST. Any
/// replica may coordinate a round, not only the primary — the reference
/// treats this as an operator action independent of PBFT leadership.
pub fn coordinate_checkpoint(state: &mut ReplicaState) -> Vec<Outbound> {
    let checkpoint_id = short_hex_id();
    state.checkpoint.checkpoint_id = Some(checkpoint_id.clone());
    state.checkpoint.reports.clear();
    vec![Outbound {
        to: Destination::BroadcastReplicas,
        record: Record::CheckpointRequest { checkpoint_id, collector_host: state.host.clone(), collector_port: state.port },
    }]
}

/// Applies an inbound CHECKPOINT_REQUEST: appends the local snapshot and
/// reports it back to the collector.
pub fn on_checkpoint_request(
    state: &ReplicaState,
    checkpoint_id: String,
    collector_host: String,
    collector_port: u16,
) -> std::io::Result<Outbound> {
    FileHelper::append_to_file_ln(&state.checkpoint_log_path, &state.snapshot_text())?;
    Ok(Outbound {
        to: Destination::Addr((collector_host, collector_port)),
        record: Record::CheckpointReport { checkpoint_id, node_id: state.id.clone(), text: state.snapshot_text() },
    })
}

/// Applies an inbound CHECKPOINT_REPORT. Once every known replica (the
/// coordinator's own roster, excluding the coordinator itself, plus the
/// coordinator's own snapshot) has reported in, assembles and writes the
/// final checkpoint file, returning its path.
pub fn on_checkpoint_report(
    state: &mut ReplicaState,
    checkpoint_id: String,
    node_id: String,
    text: String,
) -> std::io::Result<Option<String>> {
    if state.checkpoint.checkpoint_id.as_deref() != Some(checkpoint_id.as_str()) {
        return Ok(None);
    }
    state.checkpoint.reports.insert(node_id, text);
    let expected = state.roster.len().saturating_sub(1);
    if state.checkpoint.reports.len() < expected {
        return Ok(None);
    }
    let mut lines: Vec<String> = Vec::new();
    lines.push(state.snapshot_text());
    lines.extend(state.checkpoint.reports.values().cloned());
    let path = format!("{}/final_checkpoint_{}.log", state.checkpoint_dir, checkpoint_id);
    FileHelper::write_to_file(&path, &lines.join("\n"))?;
    state.checkpoint.checkpoint_id = None;
    state.checkpoint.reports.clear();
    Ok(Some(path))
}

/// Sends RECOVER_HELLO to the current primary (`recover` console command
/// after a `crash`, §7).
pub fn request_recovery(state: &ReplicaState) -> Result<Outbound, crate::error::EngineError> {
    let leader = state.primary().ok_or(crate::error::EngineError::NoParticipants)?;
    Ok(Outbound {
        to: Destination::Replica(leader),
        record: Record::RecoverHello { host: state.host.clone(), port: state.port },
    })
}

/// Applies an inbound RECOVER_HELLO: only the current primary is
/// authoritative to answer it (§4.3); a replica that doesn't believe it's
/// the primary (e.g. one that hasn't yet learned of a view change) rejects
/// it instead of handing back a sync it can't vouch for. Assembles a
/// CHECKPOINT_SYNC from the latest final checkpoint on disk (if any) plus
/// the live transaction log and roster.
pub fn on_recover_hello(state: &ReplicaState, host: String, port: u16) -> Result<Outbound, crate::error::PbftError> {
    if !state.is_primary() {
        return Err(crate::error::PbftError::Protocol(crate::error::EngineError::NotLeader {
            leader: state.primary().unwrap_or_default(),
        }));
    }
    let pattern = format!("{}/final_checkpoint_*.log", state.checkpoint_dir);
    let text = match FileHelper::glob_sorted(&pattern)?.last() {
        Some(path) => FileHelper::read_file_to_string(path.to_str().unwrap_or_default())?,
        None => state.snapshot_text(),
    };
    let tx_log: BTreeMap<String, TxSnapshot> = state
        .tx_log
        .values()
        .map(|e| (e.tx.id.clone(), TxSnapshot { status: e.tx.status.as_wire_str().to_string(), data: e.tx.data.clone(), seq: e.tx.seq }))
        .collect();
    Ok(Outbound {
        to: Destination::Addr((host, port)),
        record: Record::CheckpointSync {
            text,
            view: state.view,
            current_primary: state.id.clone(),
            members: state.roster.as_map(),
            primary_host: state.host.clone(),
            primary_port: state.port,
            tx_log,
            state_data: None,
            byzantine_id: state.byzantine_id.clone(),
        },
    })
}

/// Applies an inbound CHECKPOINT_SYNC on the recovering replica: adopts the
/// sender's view, roster, and transaction log, un-sets `crashed`, and
/// writes the received text to a `_recovered_from_checkpoint.log` marker
/// file for the operator to inspect.
pub fn on_checkpoint_sync(
    state: &mut ReplicaState,
    text: String,
    view: u64,
    members: std::collections::BTreeMap<String, crate::wire::Addr>,
    tx_log: BTreeMap<String, TxSnapshot>,
    byzantine_id: Option<String>,
) -> std::io::Result<()> {
    state.roster.replace(members);
    state.view = view;
    state.byzantine_id = byzantine_id;
    state.crashed = false;
    for (id, snapshot) in tx_log {
        let status = TxStatus::from_wire_str(&snapshot.status);
        state.apply_tx_snapshot(id, status, snapshot.data, snapshot.seq);
    }
    let marker = format!("{}/{}_recovered_from_checkpoint.log", state.checkpoint_dir, state.id);
    FileHelper::write_to_file(&marker, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Payload;

    fn state() -> ReplicaState {
        let dir = std::env::temp_dir().join(format!("pbft_checkpoint_test_{}", std::process::id()));
        let mut s = ReplicaState::new("P0", "127.0.0.1", 5000, dir.to_str().unwrap().to_string());
        for i in 0..4 {
            s.roster.insert(format!("P{i}"), ("127.0.0.1".into(), 5000 + i as u16));
        }
        s
    }

    #[test]
    fn coordinated_round_assembles_once_all_report() {
        let mut s = state();
        let outbound = coordinate_checkpoint(&mut s);
        assert_eq!(outbound.len(), 1);
        let checkpoint_id = s.checkpoint.checkpoint_id.clone().unwrap();
        assert!(on_checkpoint_report(&mut s, checkpoint_id.clone(), "P1".into(), "node=P1 |".into()).unwrap().is_none());
        assert!(on_checkpoint_report(&mut s, checkpoint_id.clone(), "P2".into(), "node=P2 |".into()).unwrap().is_none());
        let path = on_checkpoint_report(&mut s, checkpoint_id, "P3".into(), "node=P3 |".into()).unwrap();
        assert!(path.is_some());
        let contents = std::fs::read_to_string(path.unwrap()).unwrap();
        assert!(contents.contains("node=P1"));
        assert!(contents.contains("node=P3"));
        std::fs::remove_dir_all(&s.checkpoint_dir).ok();
    }

    #[test]
    fn local_checkpoint_appends_a_line() {
        let s = state();
        local_checkpoint(&s).unwrap();
        let contents = FileHelper::read_file_to_string(&s.checkpoint_log_path).unwrap();
        assert!(contents.contains(&format!("node={}", s.id)));
        std::fs::remove_dir_all(&s.checkpoint_dir).ok();
    }

    #[test]
    fn recover_hello_without_prior_final_checkpoint_uses_live_snapshot() {
        let mut s = state();
        let mut data = Payload::new();
        data.insert("operation".into(), "deposit".into());
        data.insert("account".into(), "alice".into());
        data.insert("amount".into(), "10".into());
        s.insert_tx("abc12345".into(), 0, data);
        s.entry_mut("abc12345").unwrap().tx.status = TxStatus::Committed;
        let outbound = on_recover_hello(&s, "127.0.0.1".into(), 6000).unwrap();
        match outbound.record {
            Record::CheckpointSync { text, tx_log, .. } => {
                assert!(text.contains("alice=10"));
                assert!(tx_log.contains_key("abc12345"));
            }
            other => panic!("unexpected record: {other:?}"),
        }
        std::fs::remove_dir_all(&s.checkpoint_dir).ok();
    }

    #[test]
    fn recover_hello_rejected_by_a_non_primary() {
        let mut s = state();
        s.view = 1; // P1 is primary at view 1; P0 no longer is.
        assert!(on_recover_hello(&s, "127.0.0.1".into(), 6000).is_err());
        std::fs::remove_dir_all(&s.checkpoint_dir).ok();
    }
}
