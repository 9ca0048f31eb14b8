//! Cluster roster and the pure-arithmetic parts of the protocol: who the
//! primary is for a given view, how many nodes are needed for a quorum, and
//! which id plays the designated Byzantine role once one is chosen.

use crate::wire::Addr;
use std::collections::BTreeMap;

/// Known participants, keyed by id (`"P0"`, `"P1"`, ...). Ordered so
/// `primary_for` and `byzantine_id` are deterministic across replicas that
/// received REGISTERs in a different order.
///
/// `primary_for`/`byzantine_id` rely on lexicographic id order lining up
/// with numeric order, which holds for single-digit clusters (`P0`..`P9`)
/// but not beyond — `"P10"` sorts before `"P2"`. Fine for the cluster sizes
/// this crate targets (§8 tops out at 7); a cluster meant to scale past 9
/// replicas would need zero-padded or numeric-aware ids instead.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: BTreeMap<String, Addr>,
}

impl Roster {
    /// An empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or updates a participant's address.
    pub fn insert(&mut self, id: impl Into<String>, addr: Addr) {
        self.members.insert(id.into(), addr);
    }

    /// Number of known participants.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if no participants are registered.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Looks up a participant's address.
    pub fn addr_of(&self, id: &str) -> Option<&Addr> {
        self.members.get(id)
    }

    /// Ids of every participant, in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// Ids of every participant except `exclude`, in sorted order.
    pub fn ids_except<'a>(&'a self, exclude: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.members.keys().filter(move |id| id.as_str() != exclude)
    }

    /// The full roster as an id → address map, for embedding in MEMBERS and
    /// CHECKPOINT_SYNC records.
    pub fn as_map(&self) -> BTreeMap<String, Addr> {
        self.members.clone()
    }

    /// Replaces the roster wholesale (used when a recovering replica accepts
    /// a CHECKPOINT_SYNC).
    pub fn replace(&mut self, members: BTreeMap<String, Addr>) {
        self.members = members;
    }

    /// Largest number of simultaneously Byzantine nodes the current roster
    /// size tolerates: `f = floor((n - 1) / 3)`, per the `n = 3f + 1`
    /// requirement (§3, §8).
    pub fn f(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Votes required for a quorum: `2f + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// The primary for `view`: the `(view % n)`-th id in sorted order, so
    /// view 0 is always `P0` regardless of registration order (§4.1).
    pub fn primary_for(&self, view: u64) -> Option<String> {
        if self.members.is_empty() {
            return None;
        }
        let idx = (view as usize) % self.members.len();
        self.members.keys().nth(idx).cloned()
    }

    /// The designated Byzantine id, fixed once the roster reaches `n >= 4`:
    /// the last id in sorted order. Below that size no quorum-tolerant
    /// Byzantine behavior is meaningful, so `None` is returned (§9, extending
    /// the reference's unspecified n > 4 behavior).
    pub fn byzantine_id(&self) -> Option<String> {
        if self.members.len() < 4 {
            return None;
        }
        self.members.keys().next_back().cloned()
    }
}
