//! Merkle branch construction and folding.
//!
//! The pool never holds a full block's transaction set in the core — it
//! only needs the *branch* (the right-siblings on the path from the
//! coinbase leaf to the root) so that a miner's chosen coinbase hash can be
//! recombined into a merkle root without the miner ever seeing the other
//! transactions.

use crate::crypto::double_sha256;

/// Build the coinbase merkle branch from the non-coinbase transaction
/// hashes (each 32 bytes, in the block's native byte order).
///
/// Mirrors the classic odd-duplication merkle construction: at every level
/// the leftmost remaining hash is the coinbase's sibling for that level: it
/// is recorded in the branch, and the rest pair up (duplicating the last
/// one if the count is odd) and hash forward to the next level.
pub fn build_branch(tx_hashes: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut branch = Vec::new();
    let mut hashes: Vec<[u8; 32]> = tx_hashes.to_vec();

    while !hashes.is_empty() {
        branch.push(hashes[0]);
        if hashes.len() == 1 {
            break;
        }

        let mut next = Vec::with_capacity((hashes.len() + 1) / 2);
        let mut i = 1;
        while i < hashes.len() {
            let left = hashes[i];
            let right = if i + 1 < hashes.len() {
                hashes[i + 1]
            } else {
                left
            };
            next.push(pair_hash(&left, &right));
            i += 2;
        }
        hashes = next;
    }

    branch
}

/// Fold a coinbase hash through a branch to recompute the merkle root.
/// The coinbase (or the running hash) is always the left operand at every
/// level; the branch entries are the right-siblings.
pub fn compute_root(coinbase_hash: [u8; 32], branch: &[[u8; 32]]) -> [u8; 32] {
    let mut current = coinbase_hash;
    for sibling in branch {
        current = pair_hash(&current, sibling);
    }
    current
}

fn pair_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    double_sha256(&buf)
}

/// Naive O(n) merkle root over a full leaf list, used only to check
/// `build_branch`/`compute_root` against an independent implementation in
/// tests.
#[cfg(test)]
fn naive_merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    assert!(!leaves.is_empty());
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut i = 0;
        while i < level.len() {
            let left = level[i];
            let right = if i + 1 < level.len() { level[i + 1] } else { left };
            next.push(pair_hash(&left, &right));
            i += 2;
        }
        level = next;
    }
    level[0]
}
