#![forbid(unsafe_code)]
//! The Checkpoint Service (spec.md §4.H): periodic L1 rollup-root
//! commitment, plus an operator-triggered `forceCheckpoint` bypass.

mod registry;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anchor_core::time::now_millis;
use anchor_core::DEFAULT_CHECKPOINT_INTERVAL_MS;
use chain_provider::{ChainProvider, TxRequest};
use ethers_core::types::Address;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{info, warn};

pub use registry::encode_submit_checkpoint_call;

/// The data submitted to the Checkpoint Registry on each tick or force.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointInputs {
    pub l2_root: [u8; 32],
    pub dao_state_root: [u8; 32],
    pub batch_count: u64,
    pub event_count: u64,
}

/// Gathers the latest rollup head state and governance-state hash. Errors
/// are non-fatal: the service logs and re-schedules without submitting
/// (spec.md §4.H).
pub trait CheckpointSource: Send + Sync {
    fn gather(&self) -> Result<CheckpointInputs, CheckpointGatherError>;
}

#[derive(Debug, Error)]
#[error("checkpoint data unavailable: {0}")]
pub struct CheckpointGatherError(pub String);

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub checkpoint_interval: Duration,
    pub checkpoint_registry_address: Address,
}

impl CheckpointConfig {
    pub fn new(checkpoint_registry_address: Address) -> Self {
        Self {
            checkpoint_interval: Duration::from_millis(DEFAULT_CHECKPOINT_INTERVAL_MS),
            checkpoint_registry_address,
        }
    }
}

/// Scheduled at `checkpointInterval`, stoppable, guards duplicate scheduler
/// starts (spec.md §4.H).
pub struct CheckpointService<C: ChainProvider, S: CheckpointSource> {
    config: CheckpointConfig,
    chain: Arc<C>,
    source: S,
    checkpoint_number: AtomicU64,
    previous_checkpoint: Mutex<Option<String>>,
    started: AtomicBool,
    stop: Notify,
}

impl<C: ChainProvider + 'static, S: CheckpointSource + 'static> CheckpointService<C, S> {
    pub fn new(config: CheckpointConfig, chain: Arc<C>, source: S) -> Arc<Self> {
        Arc::new(Self {
            config,
            chain,
            source,
            checkpoint_number: AtomicU64::new(0),
            previous_checkpoint: Mutex::new(None),
            started: AtomicBool::new(false),
            stop: Notify::new(),
        })
    }

    /// Starts the scheduled loop if it isn't already running. Returns
    /// `false` if a loop is already active (duplicate-start guard).
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("checkpoint: start() called while a loop is already running");
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await });
        true
    }

    /// Signals the running loop to stop after its current tick.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.checkpoint_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = self.stop.notified() => {
                    self.started.store(false, Ordering::SeqCst);
                    info!("checkpoint: stop signal received, exiting loop");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        match self.source.gather() {
            Ok(inputs) => {
                self.submit(inputs).await;
            }
            Err(err) => {
                warn!(error = %err, "checkpoint: gather failed, re-scheduling without submitting");
            }
        }
    }

    /// Bypasses scheduling for an immediate, operator-supplied submission
    /// (the `CheckpointService.forceCheckpoint(checkpointData)` ingress
    /// surface in spec.md §6).
    pub async fn force_checkpoint(&self, inputs: CheckpointInputs) -> chain_provider::ChainProviderResult<String> {
        self.submit(inputs).await
    }

    async fn submit(&self, inputs: CheckpointInputs) -> chain_provider::ChainProviderResult<String> {
        let checkpoint_number = self.checkpoint_number.fetch_add(1, Ordering::SeqCst) + 1;
        let previous_checkpoint = self.previous_checkpoint.lock().expect("lock poisoned").clone();

        let metadata = serde_json::json!({
            "checkpointNumber": checkpoint_number,
            "previousCheckpoint": previous_checkpoint,
            "timestamp": now_millis(),
            "batchCount": inputs.batch_count,
            "eventCount": inputs.event_count,
        })
        .to_string();
        let calldata = encode_submit_checkpoint_call(inputs.l2_root, inputs.dao_state_root, &metadata);
        let request = TxRequest::calldata(self.config.checkpoint_registry_address, calldata);

        let result = self.chain.send_transaction(request).await;
        match &result {
            Ok(tx_hash) => {
                *self.previous_checkpoint.lock().expect("lock poisoned") = Some(tx_hash.clone());
                info!(checkpoint_number, tx_hash = %tx_hash, "checkpoint: submitted");
            }
            Err(err) => {
                warn!(checkpoint_number, error = %err, "checkpoint: submission failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use chain_provider::MockChainProvider;

    use super::*;

    struct FixedSource(CheckpointInputs);

    impl CheckpointSource for FixedSource {
        fn gather(&self) -> Result<CheckpointInputs, CheckpointGatherError> {
            Ok(self.0)
        }
    }

    struct FailingSource;

    impl CheckpointSource for FailingSource {
        fn gather(&self) -> Result<CheckpointInputs, CheckpointGatherError> {
            Err(CheckpointGatherError("governance hasher unavailable".into()))
        }
    }

    fn inputs() -> CheckpointInputs {
        CheckpointInputs {
            l2_root: [1u8; 32],
            dao_state_root: [2u8; 32],
            batch_count: 3,
            event_count: 42,
        }
    }

    #[tokio::test]
    async fn force_checkpoint_submits_immediately() {
        let chain = Arc::new(MockChainProvider::new());
        let service = CheckpointService::new(
            CheckpointConfig::new(Address::zero()),
            chain.clone(),
            FixedSource(inputs()),
        );
        let tx_hash = service.force_checkpoint(inputs()).await.unwrap();
        assert!(tx_hash.starts_with("0x"));
    }

    #[tokio::test]
    async fn gather_failure_does_not_submit() {
        let chain = Arc::new(MockChainProvider::new());
        let service = CheckpointService::new(CheckpointConfig::new(Address::zero()), chain.clone(), FailingSource);
        service.tick().await;
        // No transaction should have been recorded on the mock chain.
        assert_eq!(chain.block_number(), 0);
    }

    #[tokio::test]
    async fn start_guards_against_duplicate_scheduler() {
        let chain = Arc::new(MockChainProvider::new());
        let service = CheckpointService::new(CheckpointConfig::new(Address::zero()), chain, FixedSource(inputs()));
        assert!(service.start());
        assert!(!service.start());
        service.stop();
    }
}
