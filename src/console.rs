//! Operator console: parses whitespace-separated commands typed on stdin
//! into calls against `engine`/`checkpoint`/`view_change`, and renders their
//! results back as plain text (§7).

use crate::engine::{self, Outbound};
use crate::state::ReplicaState;
use crate::tx::{Tx, TxStatus};
use crate::wire::{CommitAck, PrepareVote};
use std::sync::{Arc, Mutex};

/// Parses and executes one operator line against `state`, returning the
/// outbound messages (if any) that must be sent once the lock is released,
/// plus the text to print to the operator.
pub fn dispatch(state: &Arc<Mutex<ReplicaState>>, line: &str) -> (Vec<Outbound>, String) {
    let mut parts = line.trim().split_whitespace();
    let Some(cmd) = parts.next() else { return (Vec::new(), String::new()) };
    let rest: Vec<&str> = parts.collect();

    match cmd {
        "status" => {
            let s = state.lock().unwrap();
            let (roster, view, leader, byzantine) = engine::status_report(&s);
            (
                Vec::new(),
                format!(
                    "id={} view={} leader={} byzantine={} members={:?}",
                    s.id,
                    view,
                    leader.unwrap_or_else(|| "none".into()),
                    byzantine.unwrap_or_else(|| "none".into()),
                    roster.ids()
                ),
            )
        }
        "data" | "list" => {
            let s = state.lock().unwrap();
            let rows = engine::data_report(&s);
            let text = rows
                .into_iter()
                .map(|(id, status, data)| format!("{id} [{status}] {data:?}"))
                .collect::<Vec<_>>()
                .join("\n");
            (Vec::new(), if text.is_empty() { "no transactions".into() } else { text })
        }
        "tx" => {
            let data = Tx::parse_kv(&rest.join(" "));
            let mut s = state.lock().unwrap();
            match engine::submit(&mut s, data) {
                Ok((id, outbound)) => (outbound, format!("proposed {id}")),
                Err(e) => (Vec::new(), format!("rejected: {e}")),
            }
        }
        "progress" => {
            let mut s = state.lock().unwrap();
            match last_txid(&s) {
                Some(txid) => match engine::progress(&mut s, &txid) {
                    Ok(outbound) => (outbound, format!("advanced {txid}")),
                    Err(e) => (Vec::new(), format!("rejected: {e}")),
                },
                None => (Vec::new(), no_tx_message()),
            }
        }
        "prepare" => handle_prepare(state, &rest),
        "ack" => handle_ack(state, &rest),
        "crash" => {
            let mut s = state.lock().unwrap();
            engine::toggle_crashed(&mut s, true);
            (Vec::new(), "crashed".into())
        }
        "recover" => {
            let mut s = state.lock().unwrap();
            engine::toggle_crashed(&mut s, false);
            match crate::checkpoint::request_recovery(&s) {
                Ok(outbound) => (vec![outbound], "sent recovery request".into()),
                Err(e) => (Vec::new(), format!("rejected: {e}")),
            }
        }
        "checkpoint" => {
            let mut s = state.lock().unwrap();
            let outbound = crate::checkpoint::coordinate_checkpoint(&mut s);
            (outbound, "started coordinated checkpoint".into())
        }
        "view" if rest.first() == Some(&"change") => {
            let mut s = state.lock().unwrap();
            let outbound = crate::view_change::request_view_change(&mut s);
            (outbound, "requested view change".into())
        }
        "quit" => (Vec::new(), "bye".into()),
        other => (Vec::new(), format!("unknown command: {other}")),
    }
}

fn handle_prepare(state: &Arc<Mutex<ReplicaState>>, rest: &[&str]) -> (Vec<Outbound>, String) {
    // `prepare yes|no` broadcasts this replica's own vote again.
    // `prepare to <id> yes|no` sends a targeted vote (Byzantine-only).
    let mut s = state.lock().unwrap();
    if rest.first() == Some(&"to") {
        let (Some(target), Some(word)) = (rest.get(1), rest.get(2)) else {
            return (Vec::new(), "usage: prepare to <id> yes|no".into());
        };
        let Some(vote) = parse_prepare_vote(word) else { return (Vec::new(), "vote must be yes or no".into()) };
        return match last_txid(&s) {
            Some(txid) => match engine::targeted_vote(&s, &txid, target, vote) {
                Ok(outbound) => (vec![outbound], format!("sent targeted prepare to {target}")),
                Err(e) => (Vec::new(), format!("rejected: {e}")),
            },
            None => (Vec::new(), no_tx_message()),
        };
    }
    let Some(word) = rest.first() else { return (Vec::new(), "usage: prepare yes|no".into()) };
    let Some(vote) = parse_prepare_vote(word) else { return (Vec::new(), "vote must be yes or no".into()) };
    match last_txid(&s) {
        Some(txid) => match engine::cast_prepare_vote(&mut s, &txid, vote) {
            Ok(outbound) => (outbound, format!("voted {word} on {txid}")),
            Err(e) => (Vec::new(), format!("rejected: {e}")),
        },
        None => (Vec::new(), no_tx_message()),
    }
}

fn handle_ack(state: &Arc<Mutex<ReplicaState>>, rest: &[&str]) -> (Vec<Outbound>, String) {
    let mut s = state.lock().unwrap();
    if rest.first() == Some(&"to") {
        let (Some(target), Some(word)) = (rest.get(1), rest.get(2)) else {
            return (Vec::new(), "usage: ack to <id> commit|abort".into());
        };
        let Some(ack) = parse_commit_ack(word) else { return (Vec::new(), "ack must be commit or abort".into()) };
        return match last_txid(&s) {
            Some(txid) => match engine::targeted_ack(&s, &txid, target, ack) {
                Ok(outbound) => (vec![outbound], format!("sent targeted ack to {target}")),
                Err(e) => (Vec::new(), format!("rejected: {e}")),
            },
            None => (Vec::new(), no_tx_message()),
        };
    }
    let Some(word) = rest.first() else { return (Vec::new(), "usage: ack commit|abort".into()) };
    let Some(ack) = parse_commit_ack(word) else { return (Vec::new(), "ack must be commit or abort".into()) };
    match last_txid(&s) {
        Some(txid) => match engine::cast_commit_vote(&mut s, &txid, ack) {
            Ok(outbound) => (outbound, format!("acked {word} on {txid}")),
            Err(e) => (Vec::new(), format!("rejected: {e}")),
        },
        None => (Vec::new(), no_tx_message()),
    }
}

fn parse_prepare_vote(word: &str) -> Option<PrepareVote> {
    match word {
        "yes" => Some(PrepareVote::Yes),
        "no" => Some(PrepareVote::No),
        _ => None,
    }
}

fn parse_commit_ack(word: &str) -> Option<CommitAck> {
    match word {
        "commit" => Some(CommitAck::Commit),
        "abort" => Some(CommitAck::Abort),
        _ => None,
    }
}

/// The implicit subject for `prepare`/`ack`/`progress`: the most recently
/// touched transaction, if it's still open, else the newest still-open
/// transaction in the log (by `seq`, since `tx_log`'s keys are random hex
/// ids and carry no ordering of their own). Mirrors the reference console's
/// fallback scan once its own `current_tx` pointer has been cleared.
fn last_txid(state: &ReplicaState) -> Option<String> {
    if let Some(id) = &state.current_txid {
        if is_open(state, id) {
            return Some(id.clone());
        }
    }
    state
        .tx_log
        .values()
        .filter(|e| e.tx.status != TxStatus::Committed && e.tx.status != TxStatus::Aborted)
        .max_by_key(|e| e.tx.seq)
        .map(|e| e.tx.id.clone())
}

fn is_open(state: &ReplicaState, id: &str) -> bool {
    state.entry(id).map(|e| e.tx.status != TxStatus::Committed && e.tx.status != TxStatus::Aborted).unwrap_or(false)
}

fn no_tx_message() -> String {
    "no ongoing transaction".to_string()
}
