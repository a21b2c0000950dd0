//! ABI encoding for the Anchor Registry contract's `anchorBundle` method
//! (spec.md §6): `anchorBundle(bytes32 merkleRoot, uint256 eventCount,
//! string metadata) -> tx`.

use anchor_core::merkle::keccak256;
use ethers_core::abi::{encode, Token};
use ethers_core::types::U256;

const ANCHOR_BUNDLE_SIGNATURE: &[u8] = b"anchorBundle(bytes32,uint256,string)";

/// Builds the calldata for `anchorBundle(merkleRoot, eventCount, metadata)`.
pub fn encode_anchor_bundle_call(merkle_root: [u8; 32], event_count: u64, metadata: &str) -> Vec<u8> {
    let selector = &keccak256(ANCHOR_BUNDLE_SIGNATURE)[..4];
    let args = encode(&[
        Token::FixedBytes(merkle_root.to_vec()),
        Token::Uint(U256::from(event_count)),
        Token::String(metadata.to_string()),
    ]);
    let mut calldata = Vec::with_capacity(4 + args.len());
    calldata.extend_from_slice(selector);
    calldata.extend_from_slice(&args);
    calldata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_first_four_bytes_of_signature_hash() {
        let calldata = encode_anchor_bundle_call([0u8; 32], 0, "");
        let expected_selector = &keccak256(ANCHOR_BUNDLE_SIGNATURE)[..4];
        assert_eq!(&calldata[..4], expected_selector);
    }

    #[test]
    fn calldata_length_grows_with_metadata() {
        let short = encode_anchor_bundle_call([1u8; 32], 1, "x");
        let long = encode_anchor_bundle_call([1u8; 32], 1, "a longer metadata string");
        assert!(long.len() > short.len());
    }
}
