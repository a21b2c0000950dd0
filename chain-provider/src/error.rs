use thiserror::Error;

/// Errors surfaced by a [`crate::ChainProvider`]. Callers treat every
/// variant as transient-and-loggable: spec.md §7 classifies on-chain
/// submission failures as "log and continue with next cycle", not fatal.
#[derive(Debug, Error)]
pub enum ChainProviderError {
    #[error("rpc transport error: {0}")]
    Transport(String),
    #[error("transaction signing failed: {0}")]
    Signing(String),
    #[error("transaction receipt missing or null")]
    NullReceipt,
    #[error("malformed transaction hash: {0}")]
    MalformedHash(String),
}

pub type ChainProviderResult<T> = Result<T, ChainProviderError>;
