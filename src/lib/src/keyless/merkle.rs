//! RFC 6962 Merkle tree inclusion proofs
//!
//! Rekor is a Trillian-backed log, so its inclusion proofs follow the
//! Certificate Transparency tree layout:
//!
//! - leaf hash: `SHA-256(0x00 || leaf_data)`
//! - interior node hash: `SHA-256(0x01 || left || right)`
//!
//! Verification follows the audit path algorithm of RFC 9162 section 2.1.3.2.

use crate::error::SVError;
use sha2::{Digest, Sha256};

/// Domain separator for leaf nodes
const LEAF_PREFIX: u8 = 0x00;

/// Domain separator for interior nodes
const NODE_PREFIX: u8 = 0x01;

/// Compute the leaf hash of `data`.
pub fn compute_leaf_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the hash of an interior node.
pub fn compute_node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Verify that `leaf_hash` sits at `leaf_index` in a tree of `tree_size`
/// leaves whose root is `expected_root`.
///
/// `proof_hashes` is the audit path ordered from the leaf up.
pub fn verify_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    leaf_hash: &[u8; 32],
    proof_hashes: &[[u8; 32]],
    expected_root: &[u8; 32],
) -> Result<(), SVError> {
    if leaf_index >= tree_size {
        return Err(SVError::VerificationFailed(format!(
            "Leaf index {} is out of range for tree size {}",
            leaf_index, tree_size
        )));
    }

    let mut index = leaf_index;
    let mut last = tree_size - 1;
    let mut current = *leaf_hash;

    for proof_hash in proof_hashes {
        if last == 0 {
            return Err(SVError::VerificationFailed(
                "Inclusion proof is longer than the tree height".to_string(),
            ));
        }
        if index & 1 == 1 || index == last {
            current = compute_node_hash(proof_hash, &current);
            while index & 1 == 0 && index != 0 {
                index >>= 1;
                last >>= 1;
            }
        } else {
            current = compute_node_hash(&current, proof_hash);
        }
        index >>= 1;
        last >>= 1;
    }

    if last != 0 {
        return Err(SVError::VerificationFailed(
            "Inclusion proof is shorter than the tree height".to_string(),
        ));
    }

    if &current != expected_root {
        return Err(SVError::VerificationFailed(format!(
            "Computed root hash does not match expected root. Computed: {}, Expected: {}",
            hex::encode(current),
            hex::encode(expected_root)
        )));
    }

    Ok(())
}
