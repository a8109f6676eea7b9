//! Deterministic alert-fingerprint hashing.
//!
//! Ported from the graph kernel's `canonical.rs`, narrowed to the one digest
//! this workspace needs: the `Alert` message fingerprint's length-bounded
//! prefix hashing via SHA-256.

use sha2::{Digest, Sha256};

/// Maximum number of message bytes folded into an alert fingerprint.
pub const FINGERPRINT_MESSAGE_PREFIX_BYTES: usize = 100;

/// Deterministic grouping fingerprint for an alert:
/// `SHA-256(service "|" severity "|" message[:100])`, hex-encoded.
///
/// This is a grouping aid, not a uniqueness key: two distinct alerts are
/// expected to collide here when they describe the same condition.
pub fn alert_fingerprint(service: &str, severity: &str, message: &str) -> String {
    let prefix_end = message
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= FINGERPRINT_MESSAGE_PREFIX_BYTES)
        .last()
        .unwrap_or(0);
    let truncated = &message[..prefix_end];

    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update(b"|");
    hasher.update(severity.as_bytes());
    hasher.update(b"|");
    hasher.update(truncated.as_bytes());
    hex::encode(hasher.finalize())
}
