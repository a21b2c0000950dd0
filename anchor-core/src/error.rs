use thiserror::Error;

/// The error taxonomy shared by every component, matching the kinds laid out
/// in spec.md §7. Library crates return this type; `anchor-node` wraps it in
/// `anyhow::Error` at the CLI boundary the same way the teacher's
/// `demo-rollup` binary wraps `sov-db`/`sov-stf-runner` errors.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// Malformed input at ingress. Surfaced immediately; no state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// Primary cache or RPC error expected to be retried with backoff.
    #[error("transient storage error: {0}")]
    TransientStorage(String),

    /// Relational/durable write failure. Fatal for the specific operation;
    /// the Reconciler will retry on its own schedule.
    #[error("durable storage error: {0}")]
    DurableStorage(String),

    /// A worker's handler raised while processing an event.
    #[error("worker execution error: {0}")]
    WorkerExecution(String),

    /// On-chain transaction send/receipt failure.
    #[error("on-chain submission error: {0}")]
    OnChainSubmission(String),

    /// Transient failure while polling a confirmation depth.
    #[error("confirmation poll error: {0}")]
    ConfirmationPoll(String),

    /// The referenced row, receipt, or entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the workspace's library crates.
pub type AnchorResult<T> = Result<T, AnchorError>;
