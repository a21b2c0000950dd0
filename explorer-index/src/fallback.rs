use std::sync::{Arc, Mutex};

use anchor_core::{AppId, EventId};
use mini_moka::sync::Cache;

use crate::index::ExplorerEntry;

const MAX_ENTRIES_PER_APP: usize = 1024;

/// Bounded in-process store consulted when the primary Redis pipeline fails
/// (spec.md §4.B) and always consulted *first* on reads, per spec.md's
/// invariant that "fallback entries are authoritative when present".
///
/// Bounded two ways: `mini_moka::sync::Cache` caps the number of distinct
/// apps/events tracked, and each per-app entry list is separately truncated
/// to [`MAX_ENTRIES_PER_APP`] so a single noisy tenant can't exhaust memory
/// on its own (Design Note §9: "must be bounded by size or TTL").
#[derive(Clone)]
pub struct FallbackStore {
    // appId -> time-sorted entries (score ascending).
    entries: Cache<AppId, Arc<Mutex<Vec<ExplorerEntry>>>>,
    payloads: Cache<EventId, serde_json::Value>,
}

impl FallbackStore {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_capacity).build(),
            payloads: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    /// Records an entry, as `indexAnchorEvent` does on the primary path.
    pub fn record(
        &self,
        app_id: AppId,
        event_id: EventId,
        timestamp: i64,
        payload: serde_json::Value,
    ) {
        self.payloads.insert(event_id.clone(), payload);
        let list = self
            .entries
            .get_with(app_id, || Arc::new(Mutex::new(Vec::new())));
        let mut guard = list.lock().expect("fallback entries lock poisoned");
        guard.push(ExplorerEntry {
            event_id,
            timestamp,
        });
        guard.sort_by_key(|e| e.timestamp);
        if guard.len() > MAX_ENTRIES_PER_APP {
            let overflow = guard.len() - MAX_ENTRIES_PER_APP;
            guard.drain(0..overflow);
        }
    }

    pub fn get_payload(&self, event_id: &EventId) -> Option<serde_json::Value> {
        self.payloads.get(event_id)
    }

    pub fn list(
        &self,
        app_id: &AppId,
        start_ts: i64,
        end_ts: i64,
        limit: usize,
        reverse: bool,
    ) -> Vec<ExplorerEntry> {
        let Some(list) = self.entries.get(app_id) else {
            return Vec::new();
        };
        let guard = list.lock().expect("fallback entries lock poisoned");
        let mut out: Vec<ExplorerEntry> = guard
            .iter()
            .filter(|e| e.timestamp >= start_ts && e.timestamp <= end_ts)
            .cloned()
            .collect();
        if reverse {
            out.reverse();
        }
        out.truncate(limit);
        out
    }

    pub fn count(&self, app_id: &AppId, range: Option<(i64, i64)>) -> usize {
        let Some(list) = self.entries.get(app_id) else {
            return 0;
        };
        let guard = list.lock().expect("fallback entries lock poisoned");
        match range {
            None => guard.len(),
            Some((start, end)) => guard
                .iter()
                .filter(|e| e.timestamp >= start && e.timestamp <= end)
                .count(),
        }
    }

    pub fn delete(&self, app_id: &AppId, event_id: &EventId) {
        self.payloads.invalidate(event_id);
        if let Some(list) = self.entries.get(app_id) {
            let mut guard = list.lock().expect("fallback entries lock poisoned");
            guard.retain(|e| &e.event_id != event_id);
        }
    }
}
