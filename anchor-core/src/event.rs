use serde::{Deserialize, Serialize};

use crate::ids::{AppId, Digest, EventId, IdempotencyKey, OutboxId};

/// State machine of an [`crate::event::OutboxEvent`] row, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    Pending,
    Enqueued,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

/// The atomic unit of durable intent persisted by the Outbox Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxId,
    pub app_id: AppId,
    pub region: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub digest: Digest,
    pub idempotency_key: IdempotencyKey,
    pub state: OutboxState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub heartbeat_at: Option<i64>,
    /// Monotonic insertion order, used for a deterministic `getPending`
    /// ordering (spec.md says ordering is not required but must be bounded;
    /// we make it reproducible for testability).
    pub sequence: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Status of an [`AnchorReceipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Submitted,
    Confirmed,
}

/// The exactly-once record of an applied event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub idempotency_key: IdempotencyKey,
    pub outbox_id: OutboxId,
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub status: ReceiptStatus,
    pub confirmed_at: Option<i64>,
    pub created_at: i64,
}

/// An application event as it flows through the Sequencer, per the
/// `addEvent` ingress surface in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorEvent {
    pub id: EventId,
    pub app_id: AppId,
    pub event_type: EventKind,
    pub timestamp: i64,
    pub user_id: Option<String>,
    pub data: serde_json::Value,
    pub signature: Option<String>,
}

/// The event kinds named in spec.md §6's ingress surface
/// (`{message,meeting,payment,consent}`). Application semantics for these
/// are out of scope (spec.md §1 Non-goals) — the backbone only orders,
/// batches and anchors them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Meeting,
    Payment,
    Consent,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Message => "message",
            EventKind::Meeting => "meeting",
            EventKind::Payment => "payment",
            EventKind::Consent => "consent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventKind::Message),
            "meeting" => Ok(EventKind::Meeting),
            "payment" => Ok(EventKind::Payment),
            "consent" => Ok(EventKind::Consent),
            _ => Err(()),
        }
    }
}

/// Status of a relayed [`CrossChainReceipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossChainStatus {
    Pending,
    Confirmed,
    Failed,
}
