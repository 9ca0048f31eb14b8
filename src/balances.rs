//! Folding committed transactions into account balances (§3, §4.3). This is
//! a pure projection: balances are never stored directly, only recomputed
//! from the committed subset of the transaction log, so a checkpoint's
//! snapshot text and a freshly-recovered replica's view always agree.

use crate::wire::Payload;
use std::collections::BTreeMap;

/// Applies `data` to `balances` if `data`'s operation is recognized.
/// Deposits add, withdrawals subtract — including below zero, since nothing
/// in the reference enforces a non-negative balance invariant and a
/// Byzantine primary could otherwise mask the effect of an over-withdrawal
/// by simply never proposing it.
pub fn apply(balances: &mut BTreeMap<String, i64>, data: &Payload) {
    let (Some(operation), Some(account), Some(amount)) =
        (data.get("operation"), data.get("account"), data.get("amount").and_then(|a| a.parse::<i64>().ok()))
    else {
        return;
    };
    let delta = match operation.as_str() {
        "deposit" => amount,
        "withdraw" => -amount,
        _ => return,
    };
    *balances.entry(account.clone()).or_insert(0) += delta;
}

/// Folds every payload in `committed` (in iteration order) into a fresh
/// balance map.
pub fn fold<'a>(committed: impl IntoIterator<Item = &'a Payload>) -> BTreeMap<String, i64> {
    let mut balances = BTreeMap::new();
    for data in committed {
        apply(&mut balances, data);
    }
    balances
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(operation: &str, account: &str, amount: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("operation".into(), operation.into());
        p.insert("account".into(), account.into());
        p.insert("amount".into(), amount.into());
        p
    }

    #[test]
    fn deposits_and_withdrawals_fold_in_order() {
        let txs = vec![
            payload("deposit", "alice", "100"),
            payload("withdraw", "alice", "30"),
            payload("deposit", "bob", "20"),
        ];
        let balances = fold(txs.iter());
        assert_eq!(balances.get("alice"), Some(&70));
        assert_eq!(balances.get("bob"), Some(&20));
    }

    #[test]
    fn withdraw_can_go_negative() {
        let txs = vec![payload("withdraw", "alice", "50")];
        let balances = fold(txs.iter());
        assert_eq!(balances.get("alice"), Some(&-50));
    }

    #[test]
    fn unknown_operation_is_ignored() {
        let txs = vec![payload("transfer", "alice", "50")];
        let balances = fold(txs.iter());
        assert!(balances.is_empty());
    }
}
