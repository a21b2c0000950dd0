//! The generic event handler invoked by the worker pool (spec.md §4.D step
//! 4): indexes into the Explorer and, where the event type is recognized,
//! forwards to the Sequencer.

use std::str::FromStr;
use std::sync::Arc;

use anchor_core::{AnchorBus, AnchorBusEvent, AnchorEvent, AnchorResult, EventId, EventKind, OutboxEvent};
use async_trait::async_trait;
use chain_provider::ChainProvider;
use da_adapter::DaAdapter;
use explorer_index::ExplorerIndex;
use sequencer::Sequencer;
use tracing::debug;

/// Executes the per-event-type side effect for a leased outbox row,
/// returning a `txHashOrEventId` to stamp on the created [`anchor_core::AnchorReceipt`]
/// (spec.md §4.A `markCompleted`).
#[async_trait]
pub trait AnchorHandler: Send + Sync {
    async fn handle(&self, event: &OutboxEvent) -> AnchorResult<String>;
}

/// The generic handler shipped by this workspace: always indexes the event
/// into the Explorer, and forwards it into the Sequencer's batching queue
/// when `event_type` is one of the recognized [`EventKind`]s. Application
/// semantics for those kinds are out of scope (spec.md §1 Non-goals) — this
/// handler only routes, it never interprets `payload`.
pub struct GenericHandler<C: ChainProvider> {
    explorer: ExplorerIndex,
    sequencer: Option<Arc<Sequencer<C>>>,
    da_adapter: Option<Arc<DaAdapter<C>>>,
    bus: AnchorBus,
}

impl<C: ChainProvider + 'static> GenericHandler<C> {
    pub fn new(explorer: ExplorerIndex, sequencer: Option<Arc<Sequencer<C>>>, bus: AnchorBus) -> Self {
        Self {
            explorer,
            sequencer,
            da_adapter: None,
            bus,
        }
    }

    /// Routes batches the Sequencer force-creates mid-event (queue hit
    /// `maxBatchSize`) straight to the DA Adapter, same as a scheduled tick
    /// would (spec.md §4.C -> §4.D handoff).
    pub fn with_da_adapter(mut self, da_adapter: Arc<DaAdapter<C>>) -> Self {
        self.da_adapter = Some(da_adapter);
        self
    }
}

#[async_trait]
impl<C: ChainProvider + 'static> AnchorHandler for GenericHandler<C> {
    async fn handle(&self, event: &OutboxEvent) -> AnchorResult<String> {
        let event_id = EventId::from(event.id.as_str().to_string());
        let indexed = self
            .explorer
            .index_anchor_event(
                event.app_id.clone(),
                event_id.clone(),
                anchor_core::time::now_millis(),
                event.payload.clone(),
            )
            .await;
        if !indexed {
            self.bus.publish(AnchorBusEvent::ExplorerFallbackWrite {
                app_id: event.app_id.clone(),
                event_id: event_id.clone(),
            });
        }

        if let Some(sequencer) = &self.sequencer {
            if let Ok(kind) = EventKind::from_str(&event.event_type) {
                let anchor_event = AnchorEvent {
                    id: event_id.clone(),
                    app_id: event.app_id.clone(),
                    event_type: kind,
                    timestamp: anchor_core::time::now_millis(),
                    user_id: None,
                    data: event.payload.clone(),
                    signature: None,
                };
                if let Some(batch) = sequencer.add_event(anchor_event).await {
                    if let Some(da_adapter) = &self.da_adapter {
                        da_adapter.submit_batch(batch).await;
                    }
                }
            } else {
                debug!(event_type = %event.event_type, outbox_id = %event.id, "anchor-worker: event type not recognized by sequencer routing");
            }
        }

        Ok(event_id.to_string())
    }
}
