#![forbid(unsafe_code)]
//! The Outbox Store (spec.md §4.A): durable, idempotent event persistence
//! with lease-based worker coordination and crash recovery, backed by
//! RocksDB.

mod rocks_config;
mod store;

pub use rocks_config::{gen_rocksdb_options, RocksdbConfig};
pub use store::{OutboxStore, WriteOutcome};

#[cfg(test)]
mod tests {
    use anchor_core::{AppId, OutboxState};
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn open_store() -> (tempfile::TempDir, OutboxStore) {
        let dir = tempdir().unwrap();
        let store = OutboxStore::with_path(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_process_yields_one_receipt() {
        let (_dir, store) = open_store();
        let outcome = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                None,
            )
            .unwrap();
        assert!(!outcome.deduped);

        store.mark_enqueued(&outcome.id).unwrap();
        store.mark_processing(&outcome.id).unwrap();
        store
            .mark_completed(&outcome.id, &outcome.idempotency_key, "0xtx".into())
            .unwrap();

        let row = store.get(&outcome.id).unwrap().unwrap();
        assert_eq!(row.state, OutboxState::Completed);
        let receipt = store
            .get_receipt_by_key(&outcome.idempotency_key)
            .unwrap()
            .unwrap();
        assert_eq!(receipt.outbox_id, outcome.id);
    }

    #[test]
    fn duplicate_write_dedupes_against_receipt() {
        let (_dir, store) = open_store();
        let key = anchor_core::IdempotencyKey::from("k1");
        let first = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                Some(key.clone()),
            )
            .unwrap();
        store.mark_processing(&first.id).unwrap();
        store
            .mark_completed(&first.id, &first.idempotency_key, "0xtx".into())
            .unwrap();

        let second = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1-retry"}),
                Some(key),
            )
            .unwrap();
        assert!(second.deduped);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn duplicate_write_dedupes_against_inflight_row() {
        let (_dir, store) = open_store();
        let key = anchor_core::IdempotencyKey::from("k2");
        let first = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                Some(key.clone()),
            )
            .unwrap();

        let second = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                Some(key),
            )
            .unwrap();
        assert!(second.deduped);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn stale_processing_row_is_reclaimed_by_reconcile() {
        let (_dir, store) = open_store();
        let outcome = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                None,
            )
            .unwrap();
        store.mark_processing(&outcome.id).unwrap();

        // Simulate a worker that crashed: reconcile with a threshold of 0ms
        // so the just-stamped heartbeat already counts as stale.
        let recovered = store.reconcile_with_threshold(0).unwrap();
        assert_eq!(recovered, 1);

        let row = store.get(&outcome.id).unwrap().unwrap();
        assert_eq!(row.state, OutboxState::Pending);
        assert!(row.heartbeat_at.is_none());
    }

    #[test]
    fn max_retries_transitions_to_dead_letter() {
        let (_dir, store) = open_store();
        let outcome = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                None,
            )
            .unwrap();

        let mut last_state = OutboxState::Pending;
        for _ in 0..5 {
            last_state = store
                .mark_failed(&outcome.id, "boom".into(), 5)
                .unwrap();
        }
        assert_eq!(last_state, OutboxState::DeadLetter);

        let row = store.get(&outcome.id).unwrap().unwrap();
        assert_eq!(row.retry_count, 5);

        // A dead-lettered row no longer blocks a fresh write with the same key.
        let retried = store.retry_dead_letter(&outcome.id).unwrap();
        assert_eq!(retried, ());
        let row = store.get(&outcome.id).unwrap().unwrap();
        assert_eq!(row.state, OutboxState::Pending);
    }

    #[test]
    fn get_pending_includes_stale_processing_rows() {
        let (_dir, store) = open_store();
        let outcome = store
            .write(
                AppId::from("atlas"),
                "us".into(),
                "message".into(),
                json!({"id": "e1"}),
                None,
            )
            .unwrap();
        store.mark_processing(&outcome.id).unwrap();

        let pending = store.get_pending_with_threshold(10, 0).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, outcome.id);
    }
}
