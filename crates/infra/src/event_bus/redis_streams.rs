//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! Uses Redis Streams (XADD/XREADGROUP) to provide:
//! - **Durable delivery**: entries persist until acknowledged
//! - **At-least-once**: unacknowledged entries are reclaimed and redelivered
//! - **Consumer groups**: each consumer worker has its own group
//! - **Dead-letter stream**: entries that exhaust retries, or that cannot be
//!   decoded at all (unknown kind, malformed payload), are moved to the DLQ
//!   instead of being silently dropped
//!
//! ## Architecture
//!
//! - **Stream key**: `dinesync:events` (single stream for all mutations)
//! - **Entry fields**: `source`, `kind`, `payload` (the JSON envelope);
//!   `source`/`kind` are duplicated out of the payload so subscription
//!   filters can be applied without deserializing
//! - **DLQ key**: `dinesync:events:dlq`

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, instrument, warn};

use dinesync_events::{EventBus, EventEnvelope, Subscription, SubscriptionFilter};

/// Default stream key for mutation envelopes.
const DEFAULT_STREAM_KEY: &str = "dinesync:events";

/// Default dead-letter stream key.
const DEFAULT_DLQ_KEY: &str = "dinesync:events:dlq";

/// Default max redeliveries before an entry goes to the DLQ.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Entries pending longer than this are reclaimed for redelivery.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    max_retries: u32,
    pending_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Entry parsed from the stream, before filtering.
#[derive(Debug, Clone)]
struct StreamEntry {
    entry_id: String,
    envelope: Option<EventEnvelope>,
    /// Raw fields kept so undecodable entries can be forwarded to the DLQ.
    raw: HashMap<String, String>,
    decode_error: Option<String>,
}

impl RedisStreamsEventBus {
    /// Create a new Redis Streams event bus.
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        dlq_key: Option<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            dlq_key: dlq_key.unwrap_or_else(|| DEFAULT_DLQ_KEY.to_string()),
            max_retries: DEFAULT_MAX_RETRIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    /// Ensure a consumer group exists (idempotent).
    ///
    /// XGROUP CREATE with MKSTREAM creates the stream if it does not exist.
    /// "Group already exists" is the success case on re-run and is ignored.
    pub fn ensure_consumer_group(&self, group_name: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        Ok(())
    }

    /// Publish an envelope to the stream (XADD, auto-generated id).
    #[instrument(
        skip(self, envelope),
        fields(stream_key = %self.stream_key, kind = %envelope.kind()),
        err
    )]
    fn publish_sync(&self, envelope: EventEnvelope) -> Result<(), RedisStreamsError> {
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("source")
            .arg(envelope.source())
            .arg("kind")
            .arg(envelope.kind().as_str())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    /// Acknowledge processed entries (remove from the pending list).
    fn acknowledge_sync(
        &self,
        group_name: &str,
        entry_ids: &[String],
    ) -> Result<(), RedisStreamsError> {
        if entry_ids.is_empty() {
            return Ok(());
        }

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg(&entry_ids[..])
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }

    /// Move an entry to the dead-letter stream with its failure metadata.
    fn send_to_dlq_sync(
        &self,
        entry: &StreamEntry,
        reason: &str,
        retry_count: u32,
    ) -> Result<(), RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let payload = entry
            .raw
            .get("payload")
            .cloned()
            .unwrap_or_default();

        let _: String = redis::cmd("XADD")
            .arg(&self.dlq_key)
            .arg("*")
            .arg("original_entry_id")
            .arg(&entry.entry_id)
            .arg("reason")
            .arg(reason)
            .arg("retry_count")
            .arg(retry_count.to_string())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        warn!(
            entry_id = %entry.entry_id,
            reason = %reason,
            retry_count,
            "stream entry sent to dead-letter stream"
        );

        Ok(())
    }

    /// Read entries for a consumer group: reclaimed pending entries first,
    /// then new entries (blocking up to `block_ms`).
    fn read_group_sync(
        &self,
        group_name: &str,
        consumer_name: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(StreamEntry, u32)>, RedisStreamsError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let pending = self.read_pending_sync(&mut conn, group_name, consumer_name, count)?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        self.read_new_sync(&mut conn, group_name, consumer_name, count, block_ms)
    }

    /// Reclaim entries that have been pending longer than the timeout.
    fn read_pending_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
        count: usize,
    ) -> Result<Vec<(StreamEntry, u32)>, RedisStreamsError> {
        let pending_info: redis::RedisResult<Vec<(String, String, u64, u64)>> =
            redis::cmd("XPENDING")
                .arg(&self.stream_key)
                .arg(group_name)
                .arg("-")
                .arg("+")
                .arg(count.to_string())
                .query(conn);

        let pending: Vec<(String, u64)> = match pending_info {
            Ok(entries) => entries
                .into_iter()
                .map(|(id, _, _, deliveries)| (id, deliveries))
                .collect(),
            Err(_) => return Ok(vec![]),
        };

        if pending.is_empty() {
            return Ok(vec![]);
        }

        let delivery_counts: HashMap<String, u32> = pending
            .iter()
            .map(|(id, deliveries)| (id.clone(), *deliveries as u32))
            .collect();
        let pending_ids: Vec<String> = pending.into_iter().map(|(id, _)| id).collect();

        let claimed: redis::RedisResult<Vec<redis::Value>> = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg(consumer_name)
            .arg(self.pending_timeout_ms.to_string())
            .arg(&pending_ids[..])
            .query(conn);

        let claimed_entries = match claimed {
            Ok(entries) => entries,
            Err(_) => return Ok(vec![]),
        };

        let mut entries = Vec::new();
        for value in claimed_entries {
            match parse_stream_entry(value) {
                Ok(entry) => {
                    let retries = delivery_counts.get(&entry.entry_id).copied().unwrap_or(0);
                    entries.push((entry, retries));
                }
                Err(e) => {
                    warn!(stream_key = %self.stream_key, error = %e, "unreadable claimed entry");
                }
            }
        }

        Ok(entries)
    }

    /// Read new entries for the group (XREADGROUP with `>`).
    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        consumer_name: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<(StreamEntry, u32)>, RedisStreamsError> {
        let result: redis::RedisResult<HashMap<String, Vec<redis::Value>>> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(group_name)
                .arg(consumer_name)
                .arg("COUNT")
                .arg(count.to_string())
                .arg("BLOCK")
                .arg(block_ms.to_string())
                .arg("STREAMS")
                .arg(&self.stream_key)
                .arg(">")
                .query(conn);

        let stream_data = match result {
            Ok(data) => data,
            // Blocking timeout with no new entries surfaces as a nil reply.
            Err(e) if e.kind() == redis::ErrorKind::TypeError => return Ok(vec![]),
            Err(e) => {
                return Err(RedisStreamsError::Command(format!(
                    "XREADGROUP failed: {e}"
                )));
            }
        };

        let values = stream_data
            .get(&self.stream_key)
            .cloned()
            .unwrap_or_default();

        let mut entries = Vec::new();
        for value in values {
            match parse_stream_entry(value) {
                Ok(entry) => entries.push((entry, 0)),
                Err(e) => {
                    warn!(stream_key = %self.stream_key, error = %e, "unreadable stream entry");
                }
            }
        }

        Ok(entries)
    }
}

/// Parse a raw stream entry: `[entry_id, [field, value, ...]]`.
///
/// Decode failures past the entry id (malformed field section, missing
/// payload, malformed JSON, unrecognized kind) do not discard the entry;
/// they are carried in `decode_error` so the subscription loop can
/// dead-letter and acknowledge it. `Err` means the entry id itself could
/// not be extracted, so the entry cannot even be acknowledged.
fn parse_stream_entry(value: redis::Value) -> Result<StreamEntry, RedisStreamsError> {
    let parts: Vec<redis::Value> = match value {
        redis::Value::Bulk(v) => v,
        _ => {
            return Err(RedisStreamsError::Deserialization(
                "invalid entry format".to_string(),
            ));
        }
    };

    let entry_id = match parts.first() {
        Some(redis::Value::Data(data)) => String::from_utf8_lossy(data).to_string(),
        _ => {
            return Err(RedisStreamsError::Deserialization(
                "invalid entry id format".to_string(),
            ));
        }
    };

    let field_values: Vec<redis::Value> = match parts.get(1) {
        Some(redis::Value::Bulk(v)) => v.clone(),
        _ => {
            return Ok(StreamEntry {
                entry_id,
                envelope: None,
                raw: HashMap::new(),
                decode_error: Some("malformed entry field section".to_string()),
            });
        }
    };

    let mut raw = HashMap::new();
    for chunk in field_values.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
            raw.insert(
                String::from_utf8_lossy(key).to_string(),
                String::from_utf8_lossy(value).to_string(),
            );
        }
    }

    let (envelope, decode_error) = match raw.get("payload") {
        Some(payload) => match serde_json::from_str::<EventEnvelope>(payload) {
            Ok(envelope) => (Some(envelope), None),
            Err(e) => (None, Some(format!("undecodable envelope payload: {e}"))),
        },
        None => (None, Some("entry is missing the payload field".to_string())),
    };

    Ok(StreamEntry {
        entry_id,
        envelope,
        raw,
        decode_error,
    })
}

impl EventBus for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, envelope: EventEnvelope) -> Result<(), Self::Error> {
        self.publish_sync(envelope)
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        // One group per subscription by default; production workers should
        // use subscribe_with_group so redeliveries stay within the group.
        let group = format!("sub-{}", uuid::Uuid::now_v7());
        self.subscribe_with_group(&group, &format!("consumer-{}", uuid::Uuid::now_v7()), filter)
    }
}

impl RedisStreamsEventBus {
    /// Subscribe with an explicit consumer group (production use).
    ///
    /// A background thread polls the stream, applies the filter, and
    /// forwards matching envelopes over the returned subscription. Entries
    /// are resolved one of three ways:
    ///
    /// - matching + decodable → delivered, then acknowledged
    /// - non-matching (foreign source or kind outside the filter) →
    ///   acknowledged without delivery
    /// - undecodable, or redelivered past the retry budget → dead-letter
    ///   stream, then acknowledged
    ///
    /// Entries are acknowledged only after they reach the in-process
    /// channel; if the process dies first, the pending entry is reclaimed
    /// via XCLAIM after the pending timeout and redelivered.
    ///
    /// The poll thread exits when the returned subscription is dropped,
    /// checked once per tick via the subscription's close flag.
    pub fn subscribe_with_group(
        &self,
        group_name: &str,
        consumer_name: &str,
        filter: SubscriptionFilter,
    ) -> Subscription {
        if let Err(e) = self.ensure_consumer_group(group_name) {
            error!(group = group_name, error = %e, "failed to create consumer group");
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let bus = self.clone();
        let group = group_name.to_string();
        let consumer = consumer_name.to_string();
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = Arc::clone(&closed);

        std::thread::spawn(move || {
            loop {
                if closed_flag.load(Ordering::SeqCst) {
                    return;
                }

                let entries = match bus.read_group_sync(&group, &consumer, 10, 100) {
                    Ok(entries) => entries,
                    Err(e) => {
                        error!(group = %group, error = %e, "failed to read from stream");
                        std::thread::sleep(Duration::from_millis(500));
                        continue;
                    }
                };

                let mut to_ack = Vec::new();
                for (entry, retry_count) in entries {
                    let resolved = if let Some(reason) = &entry.decode_error {
                        bus.send_to_dlq_sync(&entry, reason, retry_count).is_ok()
                    } else if retry_count > bus.max_retries {
                        bus.send_to_dlq_sync(&entry, "retry budget exhausted", retry_count)
                            .is_ok()
                    } else if let Some(envelope) = &entry.envelope {
                        if filter.matches(envelope) {
                            if tx.send(envelope.clone()).is_err() {
                                return; // Receiver dropped: subscription closed.
                            }
                            true
                        } else {
                            true // Filtered out; ack without delivery.
                        }
                    } else {
                        true
                    };

                    if resolved {
                        to_ack.push(entry.entry_id.clone());
                    }
                }

                if let Err(e) = bus.acknowledge_sync(&group, &to_ack) {
                    error!(group = %group, error = %e, "failed to acknowledge entries");
                }

                std::thread::sleep(Duration::from_millis(100));
            }
        });

        Subscription::with_close_flag(rx, closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dinesync_events::{EVENT_SOURCE, MutationKind};
    use std::collections::BTreeMap;

    fn data(s: &str) -> redis::Value {
        redis::Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> redis::Value {
        let mut flat = Vec::new();
        for (k, v) in fields {
            flat.push(data(k));
            flat.push(data(v));
        }
        redis::Value::Bulk(vec![data(id), redis::Value::Bulk(flat)])
    }

    fn envelope_json() -> String {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), "1".to_string());
        fields.insert("name".to_string(), "Ada".to_string());
        let envelope = EventEnvelope::new(EVENT_SOURCE, MutationKind::CreateUser, fields);
        serde_json::to_string(&envelope).unwrap()
    }

    #[test]
    fn well_formed_entry_decodes_to_an_envelope() {
        let payload = envelope_json();
        let parsed = parse_stream_entry(entry(
            "1-0",
            &[
                ("source", EVENT_SOURCE),
                ("kind", "CreateUser"),
                ("payload", &payload),
            ],
        ))
        .unwrap();

        assert_eq!(parsed.entry_id, "1-0");
        assert!(parsed.decode_error.is_none());
        let envelope = parsed.envelope.unwrap();
        assert_eq!(envelope.kind(), MutationKind::CreateUser);
        assert_eq!(envelope.field("name"), Some("Ada"));
    }

    #[test]
    fn unknown_kind_payload_carries_a_decode_error() {
        let payload = r#"{"source":"dinesync.mutations","kind":"RenameUser","fields":{"id":"1"}}"#;
        let parsed = parse_stream_entry(entry("2-0", &[("payload", payload)])).unwrap();

        assert!(parsed.envelope.is_none());
        assert!(parsed.decode_error.unwrap().contains("undecodable"));
    }

    #[test]
    fn missing_payload_field_carries_a_decode_error() {
        let parsed = parse_stream_entry(entry("3-0", &[("source", EVENT_SOURCE)])).unwrap();

        assert!(parsed.envelope.is_none());
        assert!(parsed.decode_error.unwrap().contains("missing the payload"));
    }

    #[test]
    fn malformed_field_section_keeps_the_entry_id_for_acknowledgment() {
        // Field section is a scalar instead of a bulk array. The entry must
        // still come back with its id and a decode error so the loop can
        // dead-letter and acknowledge it instead of leaving it pending.
        let value = redis::Value::Bulk(vec![data("4-0"), data("garbage")]);
        let parsed = parse_stream_entry(value).unwrap();

        assert_eq!(parsed.entry_id, "4-0");
        assert!(parsed.envelope.is_none());
        assert!(parsed.decode_error.unwrap().contains("malformed"));
    }

    #[test]
    fn entry_without_an_id_is_an_error() {
        let err = parse_stream_entry(redis::Value::Bulk(vec![])).unwrap_err();
        assert!(matches!(err, RedisStreamsError::Deserialization(_)));
    }
}
