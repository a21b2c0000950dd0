use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ChainProviderError, ChainProviderResult};
use crate::provider::{ChainProvider, TxInfo, TxRequest};

struct MockTx {
    submitted_at_block: u64,
    fail: bool,
}

/// Deterministic in-memory chain, used by `sequencer`/`checkpoint`/
/// `bridge-relay` tests in place of a live RPC endpoint. Advances its own
/// block counter on every call and never touches the network.
pub struct MockChainProvider {
    state: Mutex<MockState>,
}

struct MockState {
    block_number: u64,
    next_tx_index: u64,
    txs: HashMap<String, MockTx>,
    fail_next_send: bool,
}

impl Default for MockChainProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                block_number: 0,
                next_tx_index: 0,
                txs: HashMap::new(),
                fail_next_send: false,
            }),
        }
    }

    /// Makes the next `send_transaction` call fail, simulating a
    /// transaction-send error (spec.md §7 "on-chain submission" errors).
    pub fn fail_next_send(&self) {
        self.state.lock().expect("mock chain lock poisoned").fail_next_send = true;
    }

    /// Advances the mock chain head by `n` blocks, as a real chain would
    /// between confirmation polls.
    pub fn mine(&self, n: u64) {
        self.state.lock().expect("mock chain lock poisoned").block_number += n;
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().expect("mock chain lock poisoned").block_number
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
    async fn send_transaction(&self, _request: TxRequest) -> ChainProviderResult<String> {
        let mut state = self.state.lock().expect("mock chain lock poisoned");
        if state.fail_next_send {
            state.fail_next_send = false;
            return Err(ChainProviderError::Transport("mock send failure".into()));
        }
        let index = state.next_tx_index;
        state.next_tx_index += 1;
        let tx_hash = format!("0x{:064x}", index);
        let submitted_at_block = state.block_number;
        state.txs.insert(
            tx_hash.clone(),
            MockTx {
                submitted_at_block,
                fail: false,
            },
        );
        Ok(tx_hash)
    }

    async fn get_transaction(&self, tx_hash: &str) -> ChainProviderResult<Option<TxInfo>> {
        let state = self.state.lock().expect("mock chain lock poisoned");
        let Some(tx) = state.txs.get(tx_hash) else {
            return Ok(None);
        };
        if tx.fail {
            return Ok(Some(TxInfo {
                block_number: None,
                confirmations: 0,
            }));
        }
        let confirmations = state.block_number.saturating_sub(tx.submitted_at_block) + 1;
        Ok(Some(TxInfo {
            block_number: Some(tx.submitted_at_block),
            confirmations,
        }))
    }

    async fn get_block_number(&self) -> ChainProviderResult<u64> {
        Ok(self.state.lock().expect("mock chain lock poisoned").block_number)
    }
}

#[cfg(test)]
mod tests {
    use ethers_core::types::Address;

    use super::*;
    use crate::provider::TxRequest;

    #[tokio::test]
    async fn confirmations_accumulate_as_blocks_are_mined() {
        let chain = MockChainProvider::new();
        let tx_hash = chain
            .send_transaction(TxRequest::calldata(Address::zero(), vec![1, 2, 3]))
            .await
            .unwrap();

        let info = chain.get_transaction(&tx_hash).await.unwrap().unwrap();
        assert_eq!(info.confirmations, 1);

        chain.mine(11);
        let info = chain.get_transaction(&tx_hash).await.unwrap().unwrap();
        assert_eq!(info.confirmations, 12);
    }

    #[tokio::test]
    async fn fail_next_send_errors_exactly_once() {
        let chain = MockChainProvider::new();
        chain.fail_next_send();
        let err = chain
            .send_transaction(TxRequest::calldata(Address::zero(), vec![]))
            .await;
        assert!(err.is_err());

        let ok = chain
            .send_transaction(TxRequest::calldata(Address::zero(), vec![]))
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn unknown_hash_returns_none() {
        let chain = MockChainProvider::new();
        let result = chain.get_transaction("0xdeadbeef").await.unwrap();
        assert!(result.is_none());
    }
}
