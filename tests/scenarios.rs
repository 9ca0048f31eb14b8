//! End-to-end scenarios driven entirely through the engine/replica API, with
//! `Outbound` records routed between in-memory `ReplicaState`s instead of
//! real sockets — `transport`'s own tests already cover the socket layer,
//! so these focus on multi-node protocol behavior (§8).

use pbft_ledger::engine::{self, Destination, Outbound};
use pbft_ledger::replica::{handle_inbound, resolve};
use pbft_ledger::state::ReplicaState;
use pbft_ledger::tx::TxStatus;
use pbft_ledger::wire::{Payload, Record, TxResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Cluster = HashMap<String, Arc<Mutex<ReplicaState>>>;

fn make_cluster(n: usize) -> Cluster {
    let mut cluster = Cluster::new();
    for i in 0..n {
        let id = format!("P{i}");
        let mut state = ReplicaState::new(id.clone(), "127.0.0.1", 6000 + i as u16, format!("/tmp/pbft_scenario_{}", std::process::id()));
        for j in 0..n {
            state.roster.insert(format!("P{j}"), ("127.0.0.1".to_string(), 6000 + j as u16));
        }
        state.byzantine_id = state.roster.byzantine_id();
        cluster.insert(id, Arc::new(Mutex::new(state)));
    }
    cluster
}

fn id_for_port(port: u16) -> String {
    format!("P{}", port - 6000)
}

/// Delivers `outbound` (produced by `sender`) to every resolved recipient,
/// recursively pumping whatever each delivery produces, until the queue
/// drains. Bounded by `budget` deliveries as a safety net against a bug
/// introducing an unbounded broadcast loop.
fn pump(cluster: &Cluster, sender: &str, outbound: Vec<Outbound>, budget: &mut usize) {
    let mut queue: Vec<(String, Outbound)> = outbound.into_iter().map(|o| (sender.to_string(), o)).collect();
    while let Some((from, item)) = queue.pop() {
        if *budget == 0 {
            panic!("pump budget exhausted; suspect an unbounded broadcast loop");
        }
        *budget -= 1;
        let sender_state = cluster.get(&from).expect("sender must be in cluster");
        let targets = resolve(sender_state, &item.to);
        for (_, port) in targets {
            let target_id = id_for_port(port);
            if target_id == from && matches!(item.to, Destination::BroadcastReplicas) {
                continue;
            }
            let Some(target_state) = cluster.get(&target_id) else { continue };
            let produced = handle_inbound(target_state, item.record.clone());
            queue.extend(produced.into_iter().map(|o| (target_id.clone(), o)));
        }
    }
}

fn deposit(account: &str, amount: &str) -> Payload {
    let mut p = Payload::new();
    p.insert("operation".into(), "deposit".into());
    p.insert("account".into(), account.into());
    p.insert("amount".into(), amount.into());
    p
}

fn status_of(cluster: &Cluster, id: &str, txid: &str) -> TxStatus {
    cluster[id].lock().unwrap().entry(txid).unwrap().tx.status
}

/// Casts `id`'s own PREPARE vote (as the `prepare yes|no` console command
/// would) and pumps the resulting broadcast through the cluster.
fn cast_prepare(cluster: &Cluster, id: &str, txid: &str, vote: pbft_ledger::wire::PrepareVote, budget: &mut usize) {
    let outbound = {
        let mut s = cluster[id].lock().unwrap();
        engine::cast_prepare_vote(&mut s, txid, vote).unwrap()
    };
    pump(cluster, id, outbound, budget);
}

/// Casts `id`'s own COMMIT_VOTE (as the `ack commit|abort` console command
/// would) and pumps the resulting broadcast through the cluster.
fn cast_commit(cluster: &Cluster, id: &str, txid: &str, ack: pbft_ledger::wire::CommitAck, budget: &mut usize) {
    let outbound = {
        let mut s = cluster[id].lock().unwrap();
        engine::cast_commit_vote(&mut s, txid, ack).unwrap()
    };
    pump(cluster, id, outbound, budget);
}

/// Runs a transaction from submission through the commit phase on a happy,
/// fully-responsive cluster (every non-primary replica voting PREPARE yes
/// and ACK_COMMIT, per §8 Scenario 1) and returns its id.
fn run_happy_path(cluster: &Cluster, n: usize) -> String {
    let mut budget = 1000;
    let (txid, pre_prepare) = {
        let mut p0 = cluster["P0"].lock().unwrap();
        engine::submit(&mut p0, deposit("alice", "100")).unwrap()
    };
    pump(cluster, "P0", pre_prepare, &mut budget);

    for i in 1..n {
        cast_prepare(cluster, &format!("P{i}"), &txid, pbft_ledger::wire::PrepareVote::Yes, &mut budget);
    }
    for i in 1..n {
        let id = format!("P{i}");
        assert_eq!(status_of(cluster, &id, &txid), TxStatus::Prepared, "{id} should be prepared");
    }

    let progressed = {
        let mut p0 = cluster["P0"].lock().unwrap();
        engine::progress(&mut p0, &txid).unwrap()
    };
    pump(cluster, "P0", progressed, &mut budget);

    for i in 1..n {
        cast_commit(cluster, &format!("P{i}"), &txid, pbft_ledger::wire::CommitAck::Commit, &mut budget);
    }
    txid
}

#[test]
fn happy_path_commits_on_every_replica_at_n_equals_4() {
    let cluster = make_cluster(4);
    let txid = run_happy_path(&cluster, 4);
    for i in 0..4 {
        assert_eq!(status_of(&cluster, &format!("P{i}"), &txid), TxStatus::Committed);
    }
}

#[test]
fn insufficient_prepares_finalize_as_aborted() {
    // §8 Scenario 2: two VOTE_NO, one VOTE_YES; count 1 (primary's implicit
    // YES) + 1 < 3, so progress() finalizes ABORTED rather than committing.
    let cluster = make_cluster(4);
    let mut budget = 1000;
    let (txid, pre_prepare) = {
        let mut p0 = cluster["P0"].lock().unwrap();
        engine::submit(&mut p0, deposit("alice", "100")).unwrap()
    };
    pump(&cluster, "P0", pre_prepare, &mut budget);

    cast_prepare(&cluster, "P1", &txid, pbft_ledger::wire::PrepareVote::No, &mut budget);
    cast_prepare(&cluster, "P2", &txid, pbft_ledger::wire::PrepareVote::No, &mut budget);
    cast_prepare(&cluster, "P3", &txid, pbft_ledger::wire::PrepareVote::Yes, &mut budget);
    assert_eq!(status_of(&cluster, "P0", &txid), TxStatus::Started);

    let outbound = {
        let mut p0 = cluster["P0"].lock().unwrap();
        engine::progress(&mut p0, &txid).unwrap()
    };
    assert_eq!(status_of(&cluster, "P0", &txid), TxStatus::Aborted);
    assert!(outbound.iter().any(|o| matches!(o.record, Record::Reply { result: TxResult::Aborted, .. })));
}

#[test]
fn byzantine_equivocation_is_contained_by_first_writer_wins_votes() {
    // P3 is the designated Byzantine node at n=4. It casts its own honest
    // broadcast YES like any other replica, then tries to retract it with
    // targeted NO messages sent directly to P0 and P1 — first-writer-wins
    // (keyed by voter id) means those land too late to overwrite anything.
    let cluster = make_cluster(4);
    let mut budget = 1000;
    let (txid, pre_prepare) = {
        let mut p0 = cluster["P0"].lock().unwrap();
        engine::submit(&mut p0, deposit("alice", "100")).unwrap()
    };
    pump(&cluster, "P0", pre_prepare, &mut budget);

    cast_prepare(&cluster, "P1", &txid, pbft_ledger::wire::PrepareVote::Yes, &mut budget);
    cast_prepare(&cluster, "P2", &txid, pbft_ledger::wire::PrepareVote::Yes, &mut budget);
    cast_prepare(&cluster, "P3", &txid, pbft_ledger::wire::PrepareVote::Yes, &mut budget);

    let no_to_p0 = {
        let p3 = cluster["P3"].lock().unwrap();
        engine::targeted_vote(&p3, &txid, "P0", pbft_ledger::wire::PrepareVote::No).unwrap()
    };
    let no_to_p1 = {
        let p3 = cluster["P3"].lock().unwrap();
        engine::targeted_vote(&p3, &txid, "P1", pbft_ledger::wire::PrepareVote::No).unwrap()
    };
    handle_inbound(&cluster["P0"], no_to_p0.record);
    handle_inbound(&cluster["P1"], no_to_p1.record);

    let p0_p3_vote = cluster["P0"].lock().unwrap().entry(&txid).unwrap().prepare_votes.get("P3").copied();
    assert_eq!(p0_p3_vote, Some(pbft_ledger::wire::PrepareVote::Yes));
    let p1_p3_vote = cluster["P1"].lock().unwrap().entry(&txid).unwrap().prepare_votes.get("P3").copied();
    assert_eq!(p1_p3_vote, Some(pbft_ledger::wire::PrepareVote::Yes));

    // Quorum (3 of 4) was already satisfied by the three honest broadcasts.
    assert_eq!(status_of(&cluster, "P0", &txid), TxStatus::Prepared);
}

#[test]
fn view_change_elects_next_primary_in_sorted_order() {
    let cluster = make_cluster(4);
    let mut budget = 1000;
    let start = {
        let mut p1 = cluster["P1"].lock().unwrap();
        pbft_ledger::view_change::request_view_change(&mut p1)
    };
    pump(&cluster, "P1", start, &mut budget);
    for i in 0..4 {
        let view = cluster[&format!("P{i}")].lock().unwrap().view;
        assert_eq!(view, 1, "P{i} should have adopted view 1");
    }
    let new_primary = cluster["P0"].lock().unwrap().primary();
    assert_eq!(new_primary.as_deref(), Some("P1"));
}

#[test]
fn view_change_reproproses_transaction_left_unfinished_in_old_view() {
    let cluster = make_cluster(4);
    let mut budget = 1000;
    let (txid, pre_prepare) = {
        let mut p0 = cluster["P0"].lock().unwrap();
        engine::submit(&mut p0, deposit("alice", "100")).unwrap()
    };
    pump(&cluster, "P0", pre_prepare, &mut budget);
    for i in 1..4 {
        cast_prepare(&cluster, &format!("P{i}"), &txid, pbft_ledger::wire::PrepareVote::Yes, &mut budget);
    }
    // Stop before `progress`: the transaction is `Prepared` everywhere but
    // never reaches commit under view 0.
    for i in 0..4 {
        assert_eq!(status_of(&cluster, &format!("P{i}"), &txid), TxStatus::Prepared);
    }

    let start = {
        let mut p1 = cluster["P1"].lock().unwrap();
        pbft_ledger::view_change::request_view_change(&mut p1)
    };
    pump(&cluster, "P1", start, &mut budget);

    // P1 is the new primary and should have re-broadcast a PRE_PREPARE for
    // the still-unfinished transaction; every replica should now see it
    // tracked again (still short of commit, but alive).
    for i in 0..4 {
        assert!(cluster[&format!("P{i}")].lock().unwrap().entry(&txid).is_some());
    }
}

#[test]
fn coordinated_checkpoint_then_recovery_brings_a_crashed_replica_current() {
    let cluster = make_cluster(4);
    let txid = run_happy_path(&cluster, 4);

    let mut budget = 1000;
    let coordinate = {
        let mut p0 = cluster["P0"].lock().unwrap();
        pbft_ledger::checkpoint::coordinate_checkpoint(&mut p0)
    };
    pump(&cluster, "P0", coordinate, &mut budget);
    let pattern = {
        let p0 = cluster["P0"].lock().unwrap();
        format!("{}/final_checkpoint_*.log", p0.checkpoint_dir)
    };
    let found = mc_utils::filehelper::FileHelper::glob_sorted(&pattern).unwrap();
    assert!(!found.is_empty(), "a final checkpoint file should have been written");
    let contents = mc_utils::filehelper::FileHelper::read_file_to_string(found.last().unwrap().to_str().unwrap()).unwrap();
    assert!(contents.contains("alice=100"));

    // Now simulate P3 crashing, missing the above history, and recovering.
    {
        let mut p3 = cluster["P3"].lock().unwrap();
        engine::toggle_crashed(&mut p3, true);
    }
    {
        let mut p3 = cluster["P3"].lock().unwrap();
        p3.tx_log.clear();
        engine::toggle_crashed(&mut p3, false);
    }
    let recover_hello = {
        let p3 = cluster["P3"].lock().unwrap();
        pbft_ledger::checkpoint::request_recovery(&p3).unwrap()
    };
    let sync = handle_inbound(&cluster["P0"], recover_hello.record);
    assert_eq!(sync.len(), 1);
    handle_inbound(&cluster["P3"], sync[0].record.clone());

    assert_eq!(status_of(&cluster, "P3", &txid), TxStatus::Committed);

    std::fs::remove_dir_all(cluster["P0"].lock().unwrap().checkpoint_dir.clone()).ok();
}

#[test]
fn scales_to_seven_nodes_tolerating_two_byzantine() {
    let cluster = make_cluster(7);
    let txid = run_happy_path(&cluster, 7);
    for i in 0..7 {
        assert_eq!(status_of(&cluster, &format!("P{i}"), &txid), TxStatus::Committed);
    }
    assert_eq!(cluster["P0"].lock().unwrap().roster.quorum(), 5);
}
