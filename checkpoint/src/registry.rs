//! ABI encoding for the Checkpoint Registry contract (spec.md §6):
//! `submitCheckpoint(l2Root, daoStateRoot, metadata) -> tx`.

use anchor_core::merkle::keccak256;
use ethers_core::abi::{encode, Token};

const SUBMIT_CHECKPOINT_SIGNATURE: &[u8] = b"submitCheckpoint(bytes32,bytes32,string)";

pub fn encode_submit_checkpoint_call(l2_root: [u8; 32], dao_state_root: [u8; 32], metadata: &str) -> Vec<u8> {
    let selector = &keccak256(SUBMIT_CHECKPOINT_SIGNATURE)[..4];
    let args = encode(&[
        Token::FixedBytes(l2_root.to_vec()),
        Token::FixedBytes(dao_state_root.to_vec()),
        Token::String(metadata.to_string()),
    ]);
    let mut calldata = Vec::with_capacity(4 + args.len());
    calldata.extend_from_slice(selector);
    calldata.extend_from_slice(&args);
    calldata
}
