//! View change: replicas vote to replace a suspected-faulty primary, and the
//! newly-elected primary re-proposes any transaction that was still in
//! flight when the old view ended (§4.1, §4.4, §8's view-change scenario).

use crate::engine::{Destination, Outbound};
use crate::state::ReplicaState;
use crate::tx::TxStatus;
use crate::wire::Record;

/// Starts (or joins) a view change round: records this replica's own vote
/// for `view + 1` and broadcasts VIEW_CHANGE.
pub fn request_view_change(state: &mut ReplicaState) -> Vec<Outbound> {
    let target = state.view + 1;
    if state.pending_view != Some(target) {
        state.pending_view = Some(target);
        state.view_change_votes = crate::votes::VoteTable::new();
    }
    state.view_change_votes.record(state.id.clone(), true);
    vec![Outbound { to: Destination::BroadcastReplicas, record: Record::ViewChange { from: state.id.clone() } }]
}

/// Applies an inbound VIEW_CHANGE vote. Once `2f + 1` replicas (including
/// this one, once it also votes) have requested the same next view, the new
/// primary announces NEW_VIEW and re-proposes any transaction still short
/// of commit.
pub fn on_view_change(state: &mut ReplicaState, from: String) -> Vec<Outbound> {
    let target = state.pending_view.unwrap_or(state.view + 1);
    if state.pending_view != Some(target) {
        state.pending_view = Some(target);
        state.view_change_votes = crate::votes::VoteTable::new();
    }
    state.view_change_votes.record(from, true);
    let quorum = state.roster.quorum();
    if state.view_change_votes.count_matching(&true) < quorum {
        return Vec::new();
    }
    complete_view_change(state, target)
}

fn complete_view_change(state: &mut ReplicaState, new_view: u64) -> Vec<Outbound> {
    state.view = new_view;
    state.pending_view = None;
    state.view_change_votes = crate::votes::VoteTable::new();

    let mut outbound = Vec::new();
    if state.is_primary() {
        outbound.push(Outbound {
            to: Destination::BroadcastReplicas,
            record: Record::NewView {
                new_view,
                from: state.id.clone(),
                primary_host: state.host.clone(),
                primary_port: state.port,
                members: Some(state.roster.as_map()),
                byzantine_id: state.byzantine_id.clone(),
            },
        });
        outbound.extend(reproprose_unfinished(state));
    }
    outbound
}

/// Applies an inbound NEW_VIEW: adopts the new view and, if this replica is
/// not the new primary, simply waits for re-proposals.
pub fn on_new_view(state: &mut ReplicaState, new_view: u64) {
    state.view = new_view;
    state.pending_view = None;
    state.view_change_votes = crate::votes::VoteTable::new();
}

/// Re-sends PRE_PREPARE for every transaction that never reached
/// `Committed`/`Aborted` under the old view, so the new primary picks up
/// where the old one left off instead of silently dropping in-flight work
/// (§4.4, §8).
fn reproprose_unfinished(state: &ReplicaState) -> Vec<Outbound> {
    state
        .tx_log
        .values()
        .filter(|e| matches!(e.tx.status, TxStatus::Started | TxStatus::Prepared))
        .map(|e| Outbound {
            to: Destination::BroadcastReplicas,
            record: Record::PrePrepare {
                txid: e.tx.id.clone(),
                seq: e.tx.seq,
                data: e.tx.data.clone(),
                from: state.id.clone(),
                primary_host: state.host.clone(),
                primary_port: state.port,
            },
        })
        .collect()
}
