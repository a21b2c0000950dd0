//! Canonical-bytes serialization of a [`sequencer::Batch`] for DA
//! publication (spec.md §4.G): event-stripped JSON carrying only
//! `dataHash = keccak(canonicalJSON(data))` per event, not the raw payload.

use anchor_core::merkle::{canonical_json, leaf_hash};
use sequencer::Batch;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Serialize)]
pub struct BatchEventSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    pub user_id: Option<String>,
    pub data_hash: String,
}

#[derive(Debug, Serialize)]
pub struct BatchData {
    pub batch_id: String,
    pub merkle_root: String,
    pub event_count: usize,
    pub events: Vec<BatchEventSummary>,
    pub metadata: serde_json::Value,
}

/// Serializes `batch` to the canonical bytes published to DA: batch id,
/// merkle root, event count, per-event `{id, type, timestamp, userId,
/// dataHash}`, and metadata — never the raw event payload. Per spec.md
/// §4.G the published payload is "hex-encoded UTF-8 of the event-stripped
/// JSON", not the raw JSON bytes, so the canonical JSON is hex-encoded
/// before being turned back into bytes; this is also what `publish_one`
/// measures against `maxCalldataSize`.
pub fn serialize_batch(batch: &Batch) -> Vec<u8> {
    let events = batch
        .events
        .iter()
        .map(|event| BatchEventSummary {
            id: event.id.to_string(),
            event_type: event.event_type.to_string(),
            timestamp: event.timestamp,
            user_id: event.user_id.clone(),
            data_hash: format!("0x{}", hex::encode(leaf_hash(&event.data))),
        })
        .collect();

    let data = BatchData {
        batch_id: batch.id.clone(),
        merkle_root: format!("0x{}", hex::encode(batch.merkle_root)),
        event_count: batch.event_count,
        events,
        metadata: json!({
            "batchId": batch.id,
            "startTime": batch.start_time,
            "endTime": batch.end_time,
        }),
    };
    hex::encode(canonical_json(&data)).into_bytes()
}

#[cfg(test)]
mod tests {
    use anchor_core::{AppId, AnchorEvent, EventId, EventKind};
    use serde_json::json;

    use super::*;

    #[test]
    fn serialized_bytes_are_deterministic_for_same_batch() {
        let batch = Batch {
            id: "b1".into(),
            events: vec![AnchorEvent {
                id: EventId::from("e1"),
                app_id: AppId::from("atlas"),
                event_type: EventKind::Message,
                timestamp: 10,
                user_id: Some("u1".into()),
                data: json!({"text": "hi"}),
                signature: None,
            }],
            merkle_root: [1u8; 32],
            start_time: 10,
            end_time: 10,
            event_count: 1,
        };
        let a = serialize_batch(&batch);
        let b = serialize_batch(&batch);
        assert_eq!(a, b);

        // The wire bytes are hex-encoded UTF-8 (spec.md §4.G); decode back
        // to JSON to check its shape.
        let hex_text = String::from_utf8(a).unwrap();
        let json_bytes = hex::decode(&hex_text).unwrap();
        let text = String::from_utf8(json_bytes).unwrap();
        assert!(text.contains("\"dataHash\""));
        assert!(!text.contains("\"text\""), "raw payload must not leak into DA bytes");
    }
}
