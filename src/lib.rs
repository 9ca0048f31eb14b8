//! A small, pedagogical Practical Byzantine Fault Tolerant replicated
//! ledger: `N = 3f + 1` replicas agree on a sequence of deposit/withdraw
//! transactions through a pre-prepare/prepare/commit pipeline, tolerating
//! up to `f` simultaneously Byzantine nodes.

extern crate log;
extern crate log4rs;
extern crate mc_utils;
extern crate rand;

pub mod balances;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod membership;
pub mod replica;
pub mod state;
pub mod transport;
pub mod tx;
pub mod view_change;
pub mod votes;
pub mod wire;

pub use error::PbftError;
