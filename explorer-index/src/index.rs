use anchor_core::{AppId, EventId};
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fallback::FallbackStore;

/// A single indexed entry: `(eventId, timestamp)`. The payload itself lives
/// under `anchor:<eventId>`, not inline in the sorted set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorerEntry {
    pub event_id: EventId,
    pub timestamp: i64,
}

const FALLBACK_CAPACITY: u64 = 4096;

/// Per-tenant, time-ordered event index with a fallback store (spec.md
/// §4.B). Keys are namespaced `explorer:<region>:<appId>` and
/// `anchor:<eventId>`, matching spec.md §6.
pub struct ExplorerIndex {
    pool: Pool,
    region: String,
    fallback: FallbackStore,
}

impl ExplorerIndex {
    /// Builds an index against a Redis URL, e.g. `redis://127.0.0.1/`.
    pub fn connect(redis_url: &str, region: impl Into<String>) -> anyhow::Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self::with_pool(pool, region))
    }

    /// Builds an index against an already-constructed pool, used by tests
    /// and by callers that want to share a pool across components.
    pub fn with_pool(pool: Pool, region: impl Into<String>) -> Self {
        Self {
            pool,
            region: region.into(),
            fallback: FallbackStore::new(FALLBACK_CAPACITY),
        }
    }

    fn index_key(&self, app_id: &AppId) -> String {
        format!("explorer:{}:{}", self.region, app_id)
    }

    fn payload_key(event_id: &EventId) -> String {
        format!("anchor:{}", event_id)
    }

    /// Inserts `eventId` into the time-sorted set for `appId` (score =
    /// `timestamp`) and stores the payload under the event key with a
    /// 30-day TTL. Both writes are pipelined so they land atomically from
    /// the client's point of view; on any failure the entry is recorded in
    /// the bounded fallback store instead and `false` is returned.
    pub async fn index_anchor_event(
        &self,
        app_id: AppId,
        event_id: EventId,
        timestamp: i64,
        payload: serde_json::Value,
    ) -> bool {
        match self
            .try_index_primary(&app_id, &event_id, timestamp, &payload)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    app_id = %app_id, event_id = %event_id, error = %err,
                    "explorer: primary cache write failed, recording fallback entry"
                );
                self.fallback
                    .record(app_id, event_id, timestamp, payload);
                false
            }
        }
    }

    async fn try_index_primary(
        &self,
        app_id: &AppId,
        event_id: &EventId,
        timestamp: i64,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        let payload_bytes = serde_json::to_vec(payload)?;
        let () = deadpool_redis::redis::pipe()
            .atomic()
            .zadd(self.index_key(app_id), event_id.as_str(), timestamp)
            .ignore()
            .hset(Self::payload_key(event_id), "payload", payload_bytes)
            .ignore()
            .hset(Self::payload_key(event_id), "timestamp", timestamp)
            .ignore()
            .expire(
                Self::payload_key(event_id),
                anchor_core::EXPLORER_PAYLOAD_TTL_SECS,
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Ascending range query by score (`timestamp`).
    pub async fn list_events(
        &self,
        app_id: &AppId,
        start_ts: i64,
        end_ts: i64,
        limit: usize,
    ) -> Vec<ExplorerEntry> {
        let fallback = self.fallback.list(app_id, start_ts, end_ts, limit, false);
        match self
            .zrange_primary(app_id, start_ts, end_ts, limit, false)
            .await
        {
            Ok(mut primary) => {
                primary.extend(fallback);
                primary.sort_by_key(|e| e.timestamp);
                primary.truncate(limit);
                primary
            }
            Err(err) => {
                warn!(app_id = %app_id, error = %err, "explorer: primary list failed, serving fallback only");
                fallback
            }
        }
    }

    /// Descending range query by score.
    pub async fn list_events_reverse(
        &self,
        app_id: &AppId,
        start_ts: i64,
        end_ts: i64,
        limit: usize,
    ) -> Vec<ExplorerEntry> {
        let fallback = self.fallback.list(app_id, start_ts, end_ts, limit, true);
        match self
            .zrange_primary(app_id, start_ts, end_ts, limit, true)
            .await
        {
            Ok(mut primary) => {
                primary.extend(fallback);
                primary.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                primary.truncate(limit);
                primary
            }
            Err(err) => {
                warn!(app_id = %app_id, error = %err, "explorer: primary list failed, serving fallback only");
                fallback
            }
        }
    }

    async fn zrange_primary(
        &self,
        app_id: &AppId,
        start_ts: i64,
        end_ts: i64,
        limit: usize,
        reverse: bool,
    ) -> anyhow::Result<Vec<ExplorerEntry>> {
        let mut conn = self.pool.get().await?;
        let key = self.index_key(app_id);
        let ids: Vec<String> = if reverse {
            conn.zrevrangebyscore_limit(key, end_ts, start_ts, 0, limit as isize)
                .await?
        } else {
            conn.zrangebyscore_limit(key, start_ts, end_ts, 0, limit as isize)
                .await?
        };
        // The score is fetched alongside the member with a second pipelined
        // call rather than `WITHSCORES`, keeping the decode side simple.
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let score: Option<i64> = conn.zscore(self.index_key(app_id), &id).await?;
            out.push(ExplorerEntry {
                event_id: EventId::from(id),
                timestamp: score.unwrap_or(start_ts),
            });
        }
        Ok(out)
    }

    /// Fallback store consulted first, then primary; returns the decoded
    /// payload or `None`.
    pub async fn get_event_data(&self, event_id: &EventId) -> Option<serde_json::Value> {
        if let Some(payload) = self.fallback.get_payload(event_id) {
            return Some(payload);
        }
        self.get_payload_primary(event_id).await.ok().flatten()
    }

    async fn get_payload_primary(
        &self,
        event_id: &EventId,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<Vec<u8>> = conn.hget(Self::payload_key(event_id), "payload").await?;
        Ok(match raw {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        })
    }

    /// Count of events for `appId`, optionally bounded to a score range.
    pub async fn count_events(&self, app_id: &AppId, range: Option<(i64, i64)>) -> usize {
        let fallback_count = self.fallback.count(app_id, range);
        let primary_count = match self.pool.get().await {
            Ok(mut conn) => {
                let key = self.index_key(app_id);
                let result: anyhow::Result<usize> = async {
                    Ok(match range {
                        Some((start, end)) => conn.zcount(key, start, end).await?,
                        None => conn.zcard(key).await?,
                    })
                }
                .await;
                result.unwrap_or(0)
            }
            Err(_) => 0,
        };
        primary_count + fallback_count
    }

    /// The `n` most recent events for `appId`.
    pub async fn get_recent_events(&self, app_id: &AppId, n: usize) -> Vec<ExplorerEntry> {
        self.list_events_reverse(app_id, i64::MIN, i64::MAX, n)
            .await
    }

    /// Removes an event from both the sorted index and the payload store
    /// (and the fallback, if present there).
    pub async fn delete_event(&self, app_id: &AppId, event_id: &EventId) -> anyhow::Result<()> {
        self.fallback.delete(app_id, event_id);
        let mut conn = self.pool.get().await?;
        let () = deadpool_redis::redis::pipe()
            .atomic()
            .zrem(self.index_key(app_id), event_id.as_str())
            .ignore()
            .del(Self::payload_key(event_id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod live_redis_tests {
    //! These exercise the primary path against a real Redis instance and
    //! are skipped by default (no `REDIS_URL` in CI); kept here as the
    //! integration counterpart to the fallback-only unit tests in `lib.rs`.
    use super::*;

    fn pool_from_env() -> Option<Pool> {
        let url = std::env::var("REDIS_URL").ok()?;
        Config::from_url(url).create_pool(Some(Runtime::Tokio1)).ok()
    }

    #[tokio::test]
    #[ignore = "requires a live Redis instance at $REDIS_URL"]
    async fn round_trip_against_live_redis() {
        let Some(pool) = pool_from_env() else {
            return;
        };
        let index = ExplorerIndex::with_pool(pool, "us");
        let app_id = AppId::from("atlas");
        let event_id = EventId::from("e1");
        let ok = index
            .index_anchor_event(app_id.clone(), event_id.clone(), 1_000, serde_json::json!({"event": "msg"}))
            .await;
        assert!(ok);
        let data = index.get_event_data(&event_id).await;
        assert_eq!(data, Some(serde_json::json!({"event": "msg"})));
        let listed = index.list_events(&app_id, 0, 2_000, 10).await;
        assert_eq!(listed.len(), 1);
        index.delete_event(&app_id, &event_id).await.unwrap();
    }
}
