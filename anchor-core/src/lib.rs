#![forbid(unsafe_code)]
//! Shared vocabulary for the anchor backbone: identifiers, the error
//! taxonomy, canonical-JSON Merkle hashing, domain event types, the
//! non-blocking pub/sub bus, and a single clock source.

pub mod bus;
pub mod error;
pub mod event;
pub mod ids;
pub mod merkle;
pub mod time;

pub use bus::{AnchorBus, AnchorBusEvent, DaPublicationMethod};
pub use error::{AnchorError, AnchorResult};
pub use event::{
    AnchorEvent, AnchorReceipt, CrossChainStatus, EventKind, OutboxEvent, OutboxState,
    ReceiptStatus,
};
pub use ids::{AppId, Digest, EventId, IdempotencyKey, OutboxId};

/// Default `STALE_THRESHOLD` (ms) past which a `processing` lease is
/// reclaimable, per spec.md §4.A/§5.
pub const STALE_THRESHOLD_MS: i64 = 120_000;

/// Default `MAX_RETRIES` before an outbox row becomes `dead_letter`.
pub const MAX_RETRIES: u32 = 5;

/// Default heartbeat refresh period (ms), `STALE_THRESHOLD / 4`.
pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;

/// Default worker pool concurrency.
pub const DEFAULT_CONCURRENCY: usize = 64;

/// Default dispatch backoff base delay (ms).
pub const BACKOFF_BASE_MS: u64 = 800;

/// Default ceiling on dispatch-level retry attempts.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 5;

/// Default Sequencer batch window.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 30_000;

/// Default Sequencer max batch size.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default DA calldata/blob size threshold, 128 KiB.
pub const DEFAULT_MAX_CALLDATA_SIZE: usize = 131_072;

/// Default Checkpoint Service interval (ms), 1 hour.
pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 3_600_000;

/// Default Bridge Relay confirmation depth.
pub const DEFAULT_CONFIRMATION_BLOCKS: u64 = 12;

/// Default Reconciler sweep cadence (ms).
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 60_000;

/// Default region tag namespacing queues and indices.
pub const DEFAULT_REGION: &str = "us";

/// Explorer payload TTL, 30 days in seconds.
pub const EXPLORER_PAYLOAD_TTL_SECS: i64 = 30 * 24 * 60 * 60;
