#![forbid(unsafe_code)]
//! The Explorer Index (spec.md §4.B).

mod fallback;
mod index;

pub use fallback::FallbackStore;
pub use index::{ExplorerEntry, ExplorerIndex};

#[cfg(test)]
mod tests {
    use anchor_core::AppId;
    use serde_json::json;

    use super::*;

    /// The fallback path is the only one exercised in unit tests: a live
    /// Redis instance is an integration concern, tested separately against
    /// `ExplorerIndex::with_pool` in a `#[ignore]`d test hitting a real
    /// server (see `index.rs`).
    #[test]
    fn fallback_round_trips_payload_and_listing() {
        let fallback = FallbackStore::new(1024);
        let app = AppId::from("atlas");
        let event_id = anchor_core::EventId::from("e1");
        fallback.record(
            app.clone(),
            event_id.clone(),
            1_000,
            json!({"event": "msg"}),
        );

        let payload = fallback.get_payload(&event_id).unwrap();
        assert_eq!(payload, json!({"event": "msg"}));

        let listed = fallback.list(&app, 0, 2_000, 10, false);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id, event_id);
    }

    #[test]
    fn fallback_delete_removes_from_both_stores() {
        let fallback = FallbackStore::new(1024);
        let app = AppId::from("atlas");
        let event_id = anchor_core::EventId::from("e1");
        fallback.record(app.clone(), event_id.clone(), 1_000, json!({"a": 1}));
        fallback.delete(&app, &event_id);
        assert!(fallback.get_payload(&event_id).is_none());
        assert!(fallback.list(&app, 0, 2_000, 10, false).is_empty());
    }
}
