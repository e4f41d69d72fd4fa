use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// One session event in the shape the store wants it. Built exactly once per
/// consumed record and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub event_id: String,
    pub session_id: String,
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub payload: Value,
}

/// Decode a raw log record into a [`SessionEvent`].
///
/// This is total: a missing or malformed field gets a default instead of
/// failing the batch. `event_id` defaults to a fresh v7 uuid, `session_id` and
/// `event_type` to `"unknown"`, `ts` to now. A record that is not valid JSON
/// at all still produces an event, with the raw text preserved as the stored
/// payload so nothing is silently dropped.
pub fn decode_record(raw: &str) -> SessionEvent {
    let payload: Value =
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));

    let event_id =
        str_field(&payload, "eventId").unwrap_or_else(|| Uuid::now_v7().to_string());
    let session_id = str_field(&payload, "sessionId").unwrap_or_else(|| "unknown".to_string());
    let event_type = str_field(&payload, "eventType").unwrap_or_else(|| "unknown".to_string());
    let ts = str_field(&payload, "ts")
        .and_then(|raw_ts| DateTime::parse_from_rfc3339(&raw_ts).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    SessionEvent {
        event_id,
        session_id,
        event_type,
        ts,
        payload,
    }
}

fn str_field(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_owned)
}
