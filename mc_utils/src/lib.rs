#![warn(missing_docs)]

//! Small, dependency-light helpers shared by the replica and client binaries:
//! ini-backed configuration, short id generation, and append-only file helpers
//! for the checkpoint directory.

pub mod filehelper;
pub mod ids;
pub mod ini;
