//! Batch hash commitment.
//!
//! A batch's `batch_hash` commits to its chain and the exact ordered list
//! of entries. It is computed when the batch is cut from the pending queue
//! and re-verified before submission, so a batch whose contents changed in
//! storage is refused.

use sha2::{Digest, Sha256};
use worpx_types::{Chain, SettlementBatch, SettlementEntry};

/// SHA-256 over the chain and the ordered entries.
///
/// Commits to, per entry: channel, sender, receiver, token, amount
/// (normalized), nonce and signature. Variable-length fields are length
/// prefixed.
#[must_use]
pub fn compute_batch_hash(chain: Chain, entries: &[SettlementEntry]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"worpx:batch:v1:");
    update_str(&mut hasher, chain.as_str());
    hasher.update((entries.len() as u64).to_le_bytes());

    for entry in entries {
        hasher.update(entry.channel_id.0.as_bytes());
        update_str(&mut hasher, entry.from.as_str());
        update_str(&mut hasher, entry.to.as_str());
        update_str(&mut hasher, &entry.token);
        update_str(&mut hasher, &entry.amount.normalize().to_string());
        hasher.update(entry.nonce.to_le_bytes());
        update_str(&mut hasher, &entry.signature);
    }

    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Whether the stored hash still commits to the batch contents.
#[must_use]
pub fn verify_batch_hash(batch: &SettlementBatch) -> bool {
    compute_batch_hash(batch.chain, &batch.entries) == batch.batch_hash
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
