use async_trait::async_trait;
use ethers_core::types::Address;

use crate::error::ChainProviderResult;

/// Parameters for a type-3 blob-carrying transaction (spec.md §6 DA egress).
#[derive(Debug, Clone)]
pub struct BlobParams {
    pub max_fee_per_blob_gas: u128,
    pub blob_versioned_hashes: Vec<[u8; 32]>,
}

/// A transaction to submit. `data` is the ABI-encoded calldata; contract
/// encoding is the caller's responsibility (sequencer/checkpoint/bridge-relay
/// each know their own contract's selector and argument layout).
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub to: Address,
    pub data: Vec<u8>,
    pub blob: Option<BlobParams>,
}

impl TxRequest {
    pub fn calldata(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data,
            blob: None,
        }
    }

    pub fn blob_carrying(to: Address, data: Vec<u8>, blob: BlobParams) -> Self {
        Self {
            to,
            data,
            blob: Some(blob),
        }
    }
}

/// Confirmation/inclusion status of a previously-submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxInfo {
    pub block_number: Option<u64>,
    pub confirmations: u64,
}

/// `eth_sendTransaction`-style egress surface (spec.md §6): send, poll for
/// inclusion, and read the current chain head. Everything above this layer
/// (Anchor Registry, Checkpoint Registry, Bridge contract calls) is built by
/// ABI-encoding a `TxRequest.data` and calling `send_transaction`.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Signs and submits `request`, returning the `0x`-prefixed transaction
    /// hash. Does not wait for inclusion.
    async fn send_transaction(&self, request: TxRequest) -> ChainProviderResult<String>;

    /// Looks up `tx_hash`; `None` if the node has never seen it.
    async fn get_transaction(&self, tx_hash: &str) -> ChainProviderResult<Option<TxInfo>>;

    /// Current chain head height.
    async fn get_block_number(&self) -> ChainProviderResult<u64>;
}
