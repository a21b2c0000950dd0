//! A typed, non-blocking pub/sub bus replacing the source system's
//! event-emitter-style callbacks (Design Note §9): best-effort fan-out, no
//! back-pressure on the producer, no delivery-order guarantee across
//! subscribers. Grounded on `sov-sequencer`'s use of
//! `tokio::sync::broadcast` for its `TxStatusUpdate` channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::ids::{AppId, EventId, IdempotencyKey, OutboxId};

/// Cross-cutting lifecycle notifications emitted by the Sequencer, DA
/// Adapter, and Bridge Relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnchorBusEvent {
    /// The Sequencer drained its queue and formed a batch.
    BatchCreated {
        batch_id: String,
        event_count: usize,
        merkle_root: String,
    },
    /// The Sequencer's batch was anchored on-chain.
    BatchAnchored {
        batch_id: String,
        merkle_root: String,
        tx_hash: String,
    },
    /// The DA Adapter published a batch's raw bytes.
    BatchSubmitted {
        batch_id: String,
        tx_hash: String,
        method: DaPublicationMethod,
        size_bytes: usize,
    },
    /// A DA publication attempt failed and was dropped from the queue.
    BatchPublicationFailed { batch_id: String, error: String },
    /// A cross-chain receipt reached the required confirmation depth.
    ReceiptConfirmed {
        receipt_id: String,
        outbox_id: Option<OutboxId>,
    },
    /// A cross-chain receipt failed to confirm within the retry budget.
    ReceiptFailed {
        receipt_id: String,
        error: String,
    },
    /// An outbox row reached its terminal dead-letter state.
    EventDeadLettered {
        outbox_id: OutboxId,
        app_id: AppId,
        idempotency_key: IdempotencyKey,
        error: String,
    },
    /// An explorer entry failed to land in the primary cache and was
    /// recorded in the bounded fallback store instead.
    ExplorerFallbackWrite { app_id: AppId, event_id: EventId },
}

/// Method used to publish a batch to the DA layer, per spec.md §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaPublicationMethod {
    Calldata,
    Blob,
}

const DEFAULT_BUS_CAPACITY: usize = 256;

/// A cheaply-cloneable handle to the bus. Cloning shares the same
/// underlying channel; every clone can publish and every subscriber gets
/// its own independent receiver.
#[derive(Clone)]
pub struct AnchorBus {
    sender: broadcast::Sender<AnchorBusEvent>,
}

impl Default for AnchorBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl AnchorBus {
    /// Creates a bus with the given channel capacity. Slow subscribers that
    /// fall behind by more than `capacity` messages will observe a lagged
    /// receiver error on their next `recv` rather than stalling publishers.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event. Best-effort: if there are no subscribers this is
    /// a no-op, matching the "no back-pressure on the producer" requirement.
    pub fn publish(&self, event: AnchorBusEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribes to future events. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<AnchorBusEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = AnchorBus::default();
        bus.publish(AnchorBusEvent::BatchCreated {
            batch_id: "b1".into(),
            event_count: 1,
            merkle_root: "0x00".into(),
        });
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = AnchorBus::default();
        let mut r1 = bus.subscribe();
        let mut r2 = bus.subscribe();
        bus.publish(AnchorBusEvent::BatchCreated {
            batch_id: "b1".into(),
            event_count: 3,
            merkle_root: "0xabc".into(),
        });
        let e1 = r1.recv().await.unwrap();
        let e2 = r2.recv().await.unwrap();
        matches!(e1, AnchorBusEvent::BatchCreated { .. });
        matches!(e2, AnchorBusEvent::BatchCreated { .. });
    }
}
