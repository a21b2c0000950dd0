use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, Eip1559TransactionRequest, H256};
use tracing::{debug, warn};

use crate::error::{ChainProviderError, ChainProviderResult};
use crate::provider::{ChainProvider, TxInfo, TxRequest};

type SignedClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Real JSON-RPC chain client: an `ethers-providers` HTTP transport wrapped
/// in a `SignerMiddleware`, the same pairing `sov-ethereum` builds around
/// `reth`'s RPC types, minus any EVM-execution machinery — this crate only
/// signs, sends, and polls, it never interprets a transaction's effects.
pub struct EthersChainProvider {
    client: Arc<SignedClient>,
}

impl EthersChainProvider {
    /// Connects to `rpc_url`, deriving the signer from `private_key_hex`
    /// (with or without a `0x` prefix) and the chain id from the node
    /// itself via `eth_chainId`.
    pub async fn connect(rpc_url: &str, private_key_hex: &str) -> ChainProviderResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainProviderError::Transport(e.to_string()))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| ChainProviderError::Transport(e.to_string()))?
            .as_u64();
        let wallet = private_key_hex
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ChainProviderError::Signing(e.to_string()))?
            .with_chain_id(chain_id);
        let client = SignerMiddleware::new(provider, wallet);
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Submits a blob-carrying transaction via a raw `eth_sendTransaction`
    /// call. `ethers` 2.x has no typed builder for EIP-4844 fields, so the
    /// extra `maxFeePerBlobGas`/`blobVersionedHashes` params are sent
    /// through the underlying JSON-RPC transport directly.
    async fn send_blob_transaction(&self, request: &TxRequest) -> ChainProviderResult<String> {
        let blob = request
            .blob
            .as_ref()
            .expect("send_blob_transaction called without blob params");
        let params = serde_json::json!([{
            "from": format!("{:?}", self.client.address()),
            "to": format!("{:?}", request.to),
            "data": Bytes::from(request.data.clone()),
            "maxFeePerBlobGas": format!("0x{:x}", blob.max_fee_per_blob_gas),
            "blobVersionedHashes": blob
                .blob_versioned_hashes
                .iter()
                .map(|h| format!("0x{}", hex::encode(h)))
                .collect::<Vec<_>>(),
        }]);
        let tx_hash: H256 = self
            .client
            .provider()
            .request("eth_sendTransaction", params)
            .await
            .map_err(|e| ChainProviderError::Transport(e.to_string()))?;
        Ok(format!("{:?}", tx_hash))
    }
}

#[async_trait]
impl ChainProvider for EthersChainProvider {
    async fn send_transaction(&self, request: TxRequest) -> ChainProviderResult<String> {
        if request.blob.is_some() {
            return self.send_blob_transaction(&request).await;
        }

        let tx = Eip1559TransactionRequest::new()
            .to(request.to)
            .data(Bytes::from(request.data));

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainProviderError::Transport(e.to_string()))?;
        let tx_hash: H256 = *pending;
        debug!(tx_hash = %format!("{:?}", tx_hash), "chain-provider: submitted transaction");
        Ok(format!("{:?}", tx_hash))
    }

    async fn get_transaction(&self, tx_hash: &str) -> ChainProviderResult<Option<TxInfo>> {
        let hash = H256::from_str(tx_hash.trim_start_matches("0x"))
            .map_err(|e| ChainProviderError::MalformedHash(e.to_string()))?;
        let tx = self
            .client
            .get_transaction(hash)
            .await
            .map_err(|e| ChainProviderError::Transport(e.to_string()))?;
        let Some(tx) = tx else {
            return Ok(None);
        };
        let Some(block_number) = tx.block_number else {
            return Ok(Some(TxInfo {
                block_number: None,
                confirmations: 0,
            }));
        };
        let head = self
            .client
            .get_block_number()
            .await
            .map_err(|e| ChainProviderError::Transport(e.to_string()))?;
        let confirmations = head.as_u64().saturating_sub(block_number.as_u64()) + 1;
        Ok(Some(TxInfo {
            block_number: Some(block_number.as_u64()),
            confirmations,
        }))
    }

    async fn get_block_number(&self) -> ChainProviderResult<u64> {
        self.client
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| {
                warn!(error = %e, "chain-provider: get_block_number failed");
                ChainProviderError::Transport(e.to_string())
            })
    }
}
