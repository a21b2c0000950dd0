use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anchor_core::merkle::canonical_json;
use anchor_core::{
    AnchorError, AnchorReceipt, AnchorResult, AppId, Digest, IdempotencyKey, OutboxEvent,
    OutboxId, OutboxState, ReceiptStatus, STALE_THRESHOLD_MS,
};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use tracing::{debug, info, warn};

use crate::rocks_config::{gen_rocksdb_options, RocksdbConfig};

const CF_OUTBOX: &str = "outbox";
const CF_RECEIPTS: &str = "receipts";
const CF_IDEMPOTENCY_INDEX: &str = "idempotency_index";

const DB_PATH_SUFFIX: &str = "anchor-outbox";

/// Outcome of a [`OutboxStore::write`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub id: OutboxId,
    pub digest: Digest,
    pub idempotency_key: IdempotencyKey,
    /// `true` if a prior receipt or in-flight row already existed for this
    /// idempotency key and no new row was written.
    pub deduped: bool,
}

/// Durable, idempotent event persistence with lease-based worker
/// coordination (spec.md §4.A). Every mutation acquires `write_lock` to
/// serialize the read-modify-write sequences RocksDB doesn't do atomically
/// for us — the same role `sov_db::LedgerDB`'s `Mutex<ItemNumbers>` plays
/// for its counters.
#[derive(Clone)]
pub struct OutboxStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
    sequence: Arc<AtomicU64>,
}

impl OutboxStore {
    /// Opens (or creates) the store at `{path}/anchor-outbox`.
    pub fn with_path(path: impl AsRef<Path>) -> AnchorResult<Self> {
        let path = path.as_ref().join(DB_PATH_SUFFIX);
        let db_opts = gen_rocksdb_options(&RocksdbConfig::default(), false);
        let cf_opts = Options::default();
        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_OUTBOX, cf_opts.clone()),
            ColumnFamilyDescriptor::new(CF_RECEIPTS, cf_opts.clone()),
            ColumnFamilyDescriptor::new(CF_IDEMPOTENCY_INDEX, cf_opts),
        ];
        let db = DB::open_cf_descriptors(&db_opts, path, cfs)
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Opens `{path}/anchor-outbox` read-only, for the operator CLI's
    /// `status` subcommand (spec.md §6): never creates the directory, never
    /// blocks a concurrently-running writer.
    pub fn open_read_only(path: impl AsRef<Path>) -> AnchorResult<Self> {
        let full_path = path.as_ref().join(DB_PATH_SUFFIX);
        let db_opts = gen_rocksdb_options(&RocksdbConfig::default(), true);
        let cf_names = [CF_OUTBOX, CF_RECEIPTS, CF_IDEMPOTENCY_INDEX];
        let db = DB::open_cf_for_read_only(&db_opts, &full_path, cf_names, false)
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Best-effort on-disk size in bytes, summed across all column
    /// families, for the `status` subcommand's `approximateSize` field.
    pub fn approximate_size(&self) -> u64 {
        [CF_OUTBOX, CF_RECEIPTS, CF_IDEMPOTENCY_INDEX]
            .iter()
            .filter_map(|name| self.db.cf_handle(name))
            .filter_map(|cf| {
                self.db
                    .property_int_value_cf(cf, "rocksdb.total-sst-files-size")
                    .ok()
                    .flatten()
            })
            .sum()
    }

    fn cf_outbox(&self) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(CF_OUTBOX).expect("outbox cf must exist")
    }

    fn cf_receipts(&self) -> &rocksdb::ColumnFamily {
        self.db
            .cf_handle(CF_RECEIPTS)
            .expect("receipts cf must exist")
    }

    fn cf_index(&self) -> &rocksdb::ColumnFamily {
        self.db
            .cf_handle(CF_IDEMPOTENCY_INDEX)
            .expect("idempotency_index cf must exist")
    }

    fn get_outbox_row(&self, id: &OutboxId) -> AnchorResult<Option<OutboxEvent>> {
        let raw = self
            .db
            .get_cf(self.cf_outbox(), id.as_str())
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AnchorError::DurableStorage(e.to_string())),
        }
    }

    fn put_outbox_row(&self, row: &OutboxEvent) -> AnchorResult<()> {
        let bytes = serde_json::to_vec(row).map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        self.db
            .put_cf(self.cf_outbox(), row.id.as_str(), bytes)
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))
    }

    fn get_receipt(&self, key: &IdempotencyKey) -> AnchorResult<Option<AnchorReceipt>> {
        let raw = self
            .db
            .get_cf(self.cf_receipts(), key.as_str())
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AnchorError::DurableStorage(e.to_string())),
        }
    }

    fn put_receipt(&self, receipt: &AnchorReceipt) -> AnchorResult<()> {
        let bytes =
            serde_json::to_vec(receipt).map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        self.db
            .put_cf(self.cf_receipts(), receipt.idempotency_key.as_str(), bytes)
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))
    }

    fn index_lookup(&self, key: &IdempotencyKey) -> AnchorResult<Option<OutboxId>> {
        let raw = self
            .db
            .get_cf(self.cf_index(), key.as_str())
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
        Ok(raw.map(|bytes| OutboxId(String::from_utf8_lossy(&bytes).to_string())))
    }

    fn index_put(&self, key: &IdempotencyKey, id: &OutboxId) -> AnchorResult<()> {
        self.db
            .put_cf(self.cf_index(), key.as_str(), id.as_str().as_bytes())
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))
    }

    fn index_remove(&self, key: &IdempotencyKey) -> AnchorResult<()> {
        self.db
            .delete_cf(self.cf_index(), key.as_str())
            .map_err(|e| AnchorError::DurableStorage(e.to_string()))
    }

    /// Persists a new event, deduplicating on `idempotencyKey` against an
    /// existing receipt or an in-flight (non-dead-letter) outbox row.
    pub fn write(
        &self,
        app_id: AppId,
        region: String,
        event_type: String,
        payload: serde_json::Value,
        explicit_idempotency_key: Option<IdempotencyKey>,
    ) -> AnchorResult<WriteOutcome> {
        let digest = Digest(anchor_core::merkle::keccak256(&canonical_json(&payload)));
        let idempotency_key = explicit_idempotency_key
            .unwrap_or_else(|| IdempotencyKey::derive(&app_id, &event_type, &digest));

        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");

        if let Some(receipt) = self.get_receipt(&idempotency_key)? {
            debug!(key = %idempotency_key, "write: deduped against existing receipt");
            return Ok(WriteOutcome {
                id: receipt.outbox_id,
                digest,
                idempotency_key,
                deduped: true,
            });
        }

        if let Some(existing_id) = self.index_lookup(&idempotency_key)? {
            if let Some(existing) = self.get_outbox_row(&existing_id)? {
                if existing.state != OutboxState::DeadLetter {
                    debug!(key = %idempotency_key, "write: deduped against in-flight row");
                    return Ok(WriteOutcome {
                        id: existing_id,
                        digest,
                        idempotency_key,
                        deduped: true,
                    });
                }
            }
        }

        let now = anchor_core::time::now_millis();
        let id = OutboxId(uuid::Uuid::new_v4().to_string());
        let row = OutboxEvent {
            id: id.clone(),
            app_id,
            region,
            event_type,
            payload,
            digest,
            idempotency_key: idempotency_key.clone(),
            state: OutboxState::Pending,
            retry_count: 0,
            last_error: None,
            heartbeat_at: None,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            created_at: now,
            updated_at: now,
        };
        self.put_outbox_row(&row)?;
        self.index_put(&idempotency_key, &id)?;
        info!(id = %id, app_id = %row.app_id, event_type = %row.event_type, "outbox: wrote pending row");

        Ok(WriteOutcome {
            id,
            digest,
            idempotency_key,
            deduped: false,
        })
    }

    fn transition(&self, id: &OutboxId, f: impl FnOnce(&mut OutboxEvent)) -> AnchorResult<()> {
        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");
        let mut row = self
            .get_outbox_row(id)?
            .ok_or_else(|| AnchorError::NotFound(format!("outbox row {id}")))?;
        f(&mut row);
        row.updated_at = anchor_core::time::now_millis();
        self.put_outbox_row(&row)
    }

    /// Transitions a row from `pending` to `enqueued`.
    pub fn mark_enqueued(&self, id: &OutboxId) -> AnchorResult<()> {
        self.transition(id, |row| row.state = OutboxState::Enqueued)
    }

    /// Transitions a row to `processing` and stamps `heartbeatAt = now`.
    pub fn mark_processing(&self, id: &OutboxId) -> AnchorResult<()> {
        self.transition(id, |row| {
            row.state = OutboxState::Processing;
            row.heartbeat_at = Some(anchor_core::time::now_millis());
        })
    }

    /// Refreshes the lease on a `processing` row.
    pub fn update_heartbeat(&self, id: &OutboxId) -> AnchorResult<()> {
        self.transition(id, |row| {
            row.heartbeat_at = Some(anchor_core::time::now_millis());
        })
    }

    /// Creates the [`AnchorReceipt`] if absent, then marks the row
    /// `completed`. Safe to call twice: the receipt insert is conditional
    /// on non-existence.
    pub fn mark_completed(
        &self,
        id: &OutboxId,
        idempotency_key: &IdempotencyKey,
        tx_hash: String,
    ) -> AnchorResult<()> {
        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");
        if self.get_receipt(idempotency_key)?.is_none() {
            let receipt = AnchorReceipt {
                idempotency_key: idempotency_key.clone(),
                outbox_id: id.clone(),
                tx_hash,
                block_number: None,
                status: ReceiptStatus::Submitted,
                confirmed_at: None,
                created_at: anchor_core::time::now_millis(),
            };
            self.put_receipt(&receipt)?;
        }
        let mut row = self
            .get_outbox_row(id)?
            .ok_or_else(|| AnchorError::NotFound(format!("outbox row {id}")))?;
        row.state = OutboxState::Completed;
        row.updated_at = anchor_core::time::now_millis();
        self.put_outbox_row(&row)?;
        self.index_remove(idempotency_key)?;
        Ok(())
    }

    /// Increments `retryCount`; transitions to `dead_letter` once it meets
    /// `max_retries`, otherwise back to `failed`.
    pub fn mark_failed(&self, id: &OutboxId, error: String, max_retries: u32) -> AnchorResult<OutboxState> {
        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");
        let mut row = self
            .get_outbox_row(id)?
            .ok_or_else(|| AnchorError::NotFound(format!("outbox row {id}")))?;
        row.retry_count += 1;
        row.last_error = Some(error);
        row.heartbeat_at = None;
        row.state = if row.retry_count >= max_retries {
            warn!(id = %id, retry_count = row.retry_count, "outbox: row moved to dead_letter");
            OutboxState::DeadLetter
        } else {
            OutboxState::Failed
        };
        row.updated_at = anchor_core::time::now_millis();
        self.put_outbox_row(&row)?;
        Ok(row.state)
    }

    /// Resets a dead-lettered row back to `pending`, clearing its error.
    /// Used by the operator-facing `retryDeadLetter` surface (spec.md §7).
    pub fn retry_dead_letter(&self, id: &OutboxId) -> AnchorResult<()> {
        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");
        let mut row = self
            .get_outbox_row(id)?
            .ok_or_else(|| AnchorError::NotFound(format!("outbox row {id}")))?;
        row.state = OutboxState::Pending;
        row.last_error = None;
        row.heartbeat_at = None;
        row.updated_at = anchor_core::time::now_millis();
        self.put_outbox_row(&row)?;
        self.index_put(&row.idempotency_key, id)?;
        Ok(())
    }

    /// Returns rows in `{pending, enqueued, failed}` plus `processing` rows
    /// whose `heartbeatAt` is stale (or missing), bounded by `limit`.
    pub fn get_pending(&self, limit: usize) -> AnchorResult<Vec<OutboxEvent>> {
        self.get_pending_with_threshold(limit, STALE_THRESHOLD_MS)
    }

    /// Same as [`Self::get_pending`] but with an explicit stale threshold,
    /// used by tests.
    pub fn get_pending_with_threshold(
        &self,
        limit: usize,
        stale_threshold_ms: i64,
    ) -> AnchorResult<Vec<OutboxEvent>> {
        let now = anchor_core::time::now_millis();
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf_outbox(), rocksdb::IteratorMode::Start);
        for item in iter {
            let (_key, value) = item.map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
            let row: OutboxEvent = serde_json::from_slice(&value)
                .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
            let eligible = match row.state {
                OutboxState::Pending | OutboxState::Enqueued | OutboxState::Failed => true,
                OutboxState::Processing => match row.heartbeat_at {
                    None => true,
                    Some(hb) => now - hb >= stale_threshold_ms,
                },
                OutboxState::Completed | OutboxState::DeadLetter => false,
            };
            if eligible {
                out.push(row);
                if out.len() >= limit {
                    break;
                }
            }
        }
        out.sort_by_key(|r| r.sequence);
        Ok(out)
    }

    /// Atomically transitions stale `processing` rows back to `pending`,
    /// clearing `heartbeatAt`. Returns the number of rows recovered.
    pub fn reconcile(&self) -> AnchorResult<usize> {
        self.reconcile_with_threshold(STALE_THRESHOLD_MS)
    }

    /// Same as [`Self::reconcile`] but with an explicit threshold, used by
    /// tests that need to simulate crossing `STALE_THRESHOLD` without
    /// sleeping for two real minutes.
    pub fn reconcile_with_threshold(&self, stale_threshold_ms: i64) -> AnchorResult<usize> {
        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");
        let now = anchor_core::time::now_millis();
        let mut recovered = 0usize;
        let iter = self
            .db
            .iterator_cf(self.cf_outbox(), rocksdb::IteratorMode::Start);
        let mut stale_ids = Vec::new();
        for item in iter {
            let (_key, value) = item.map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
            let row: OutboxEvent = serde_json::from_slice(&value)
                .map_err(|e| AnchorError::DurableStorage(e.to_string()))?;
            if row.state == OutboxState::Processing {
                let stale = match row.heartbeat_at {
                    None => true,
                    Some(hb) => now - hb >= stale_threshold_ms,
                };
                if stale {
                    stale_ids.push(row.id);
                }
            }
        }
        for id in stale_ids {
            if let Some(mut row) = self.get_outbox_row(&id)? {
                // Re-check under the lock: only a row still `processing` and
                // still stale is reclaimed, avoiding a race with a worker
                // that woke up and refreshed its heartbeat in between.
                let still_stale = row.state == OutboxState::Processing
                    && match row.heartbeat_at {
                        None => true,
                        Some(hb) => now - hb >= stale_threshold_ms,
                    };
                if still_stale {
                    row.state = OutboxState::Pending;
                    row.heartbeat_at = None;
                    row.updated_at = now;
                    self.put_outbox_row(&row)?;
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "reconcile: reclaimed stale leases");
        }
        Ok(recovered)
    }

    /// `submitted -> confirmed` with `confirmedAt` stamped.
    pub fn confirm_receipt(
        &self,
        idempotency_key: &IdempotencyKey,
        block_number: u64,
    ) -> AnchorResult<()> {
        let _guard = self.write_lock.lock().expect("outbox write lock poisoned");
        let mut receipt = self
            .get_receipt(idempotency_key)?
            .ok_or_else(|| AnchorError::NotFound(format!("receipt {idempotency_key}")))?;
        receipt.status = ReceiptStatus::Confirmed;
        receipt.block_number = Some(block_number);
        receipt.confirmed_at = Some(anchor_core::time::now_millis());
        self.put_receipt(&receipt)
    }

    /// Reads a single row by id, for handlers that need the canonical row
    /// (spec.md §4.D step 3).
    pub fn get(&self, id: &OutboxId) -> AnchorResult<Option<OutboxEvent>> {
        self.get_outbox_row(id)
    }

    /// Reads the receipt for a given idempotency key, if any.
    pub fn get_receipt_by_key(&self, key: &IdempotencyKey) -> AnchorResult<Option<AnchorReceipt>> {
        self.get_receipt(key)
    }
}
