//! Hashing helpers: SHA-256, the doubled block/transaction identity hash,
//! and merkle root computation over transaction hash lists.

use crate::UInt256;
use sha2::{Digest, Sha256};

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Double SHA-256, the identity hash for transactions, headers, and payloads.
pub fn hash256(data: &[u8]) -> UInt256 {
    UInt256::from_array(sha256(&sha256(data)))
}

/// Merkle root over an ordered list of hashes.
///
/// An empty list yields the zero hash; odd levels duplicate their last
/// element. The input order is part of the identity: permuting the list
/// changes the root.
pub fn merkle_root(hashes: &[UInt256]) -> UInt256 {
    if hashes.is_empty() {
        return UInt256::zero();
    }

    let mut level: Vec<UInt256> = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut concat = [0u8; 64];
                concat[..32].copy_from_slice(pair[0].as_bytes());
                concat[32..].copy_from_slice(pair[1].as_bytes());
                hash256(&concat)
            })
            .collect();
    }
    level[0]
}
