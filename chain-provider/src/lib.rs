#![forbid(unsafe_code)]
//! Shared chain client (spec.md §6 egress surface): sign, send, and poll
//! JSON-RPC transactions, with a deterministic mock for tests.

mod error;
mod ethers_client;
mod mock;
mod provider;

pub use error::{ChainProviderError, ChainProviderResult};
pub use ethers_client::EthersChainProvider;
pub use mock::MockChainProvider;
pub use provider::{BlobParams, ChainProvider, TxInfo, TxRequest};
