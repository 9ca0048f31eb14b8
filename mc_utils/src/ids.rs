//! Short identifiers used for transaction and checkpoint ids.

use rand::Rng;

/// Returns an 8 hex-character id, e.g. `a3f09c12`. Not cryptographically
/// unique — collisions are astronomically unlikely for a single pedagogical
/// cluster's lifetime, which is all this is used for.
pub fn short_hex_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 4] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
