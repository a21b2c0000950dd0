//! ABI encoding for the bridge contract (spec.md §6):
//! `emitCrossChainReceipt(receiptId, targetChain, encodedData) -> tx`.

use anchor_core::merkle::keccak256;
use ethers_core::abi::{encode, Token};

const EMIT_RECEIPT_SIGNATURE: &[u8] = b"emitCrossChainReceipt(string,string,bytes)";

pub fn encode_emit_receipt_call(receipt_id: &str, target_chain: &str, encoded_data: &[u8]) -> Vec<u8> {
    let selector = &keccak256(EMIT_RECEIPT_SIGNATURE)[..4];
    let args = encode(&[
        Token::String(receipt_id.to_string()),
        Token::String(target_chain.to_string()),
        Token::Bytes(encoded_data.to_vec()),
    ]);
    let mut calldata = Vec::with_capacity(4 + args.len());
    calldata.extend_from_slice(selector);
    calldata.extend_from_slice(&args);
    calldata
}
