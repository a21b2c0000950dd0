//! Keccak/sorted-pairs Merkle tree over canonical-JSON event leaves.
//!
//! Mirrors spec.md §4.F/§8: leaves are `keccak(canonicalJSON(event))`, internal
//! nodes hash the pair in sorted order (`sortPairs = true`), and an empty leaf
//! set yields the all-zero sentinel rather than a computed root.

use serde::Serialize;
use tiny_keccak::{Hasher, Keccak};

/// The root returned for an empty event set, per spec.md §8 ("Merkle-empty").
pub const ZERO_HASH: [u8; 32] = [0u8; 32];

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut out);
    out
}

/// Serializes `value` as canonical JSON (keys sorted lexicographically, no
/// insignificant whitespace) and returns the UTF-8 bytes. `serde_json::Value`
/// stores object fields in a `BTreeMap` by default (the `preserve_order`
/// feature is not enabled anywhere in this workspace), so round-tripping
/// through `Value` is sufficient to obtain a canonical key order.
pub fn canonical_json<T: Serialize>(value: &T) -> Vec<u8> {
    let as_value = serde_json::to_value(value).expect("value must be JSON-serializable");
    serde_json::to_vec(&as_value).expect("canonical value must serialize")
}

/// Hashes `value` through canonical JSON then keccak256 — the leaf
/// construction used by both the Sequencer's batch root and the DA Adapter's
/// per-event `dataHash`.
pub fn leaf_hash<T: Serialize>(value: &T) -> [u8; 32] {
    keccak256(&canonical_json(value))
}

/// Computes the sorted-pairs Merkle root over `leaves`.
///
/// An empty slice returns [`ZERO_HASH`]. A single leaf is its own root (no
/// padding node is introduced, matching the single-leaf case described in
/// spec.md §4.F). The leaf set itself is sorted before pairing: `hash_pair`
/// alone only cancels ordering within a single pair, and for odd-length
/// levels which two leaves land in the same pair still depends on array
/// order unless the whole level is canonicalized first. Sorting leaves
/// makes the root a pure function of the leaf *set*, matching spec.md §8's
/// "Sequencer determinism" independent of any caller's insertion order.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    level.sort_unstable();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut iter = level.chunks(2);
        while let Some(pair) = iter.next() {
            let parent = match pair {
                [a, b] => hash_pair(a, b),
                [a] => *a,
                _ => unreachable!(),
            };
            next.push(parent);
        }
        level = next;
    }
    level[0]
}

/// Hashes a pair of nodes with `sortPairs = true`: the lexicographically
/// smaller hash is always concatenated first, so the root is independent of
/// leaf insertion order (spec.md §8, "Sequencer determinism").
fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (left, right) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    keccak256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_zero_hash() {
        assert_eq!(merkle_root(&[]), ZERO_HASH);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = keccak256(b"only-event");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn root_is_independent_of_leaf_order() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        let c = keccak256(b"c");
        let order1 = merkle_root(&[a, b, c]);
        let order2 = merkle_root(&[c, a, b]);
        let order3 = merkle_root(&[b, c, a]);
        assert_eq!(order1, order2);
        assert_eq!(order2, order3);
    }

    #[test]
    fn different_leaf_sets_give_different_roots() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        let c = keccak256(b"c");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[a, b, c]));
    }
}
