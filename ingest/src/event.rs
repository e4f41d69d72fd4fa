use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::IngestError;

/// An event as posted by a client. `eventId` and `ts` are optional, everything
/// else is required on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSessionEvent {
    pub event_id: Option<String>,
    pub session_id: String,
    pub event_type: String,
    /// Raw JSON, carried as an opaque string
    pub payload: String,
    pub ts: Option<String>,
}

/// A fully-populated event, the form that goes onto the log. Serialized once
/// here and carried unchanged from then on.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    pub event_id: String,
    pub session_id: String,
    pub event_type: String,
    pub payload: String,
    pub ts: String,
}

impl PublishedEvent {
    /// Partition key: all events of a session stay in order.
    pub fn key(&self) -> &str {
        &self.session_id
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl RawSessionEvent {
    /// Validate the required fields and assign the server-side defaults.
    pub fn finalize(self) -> Result<PublishedEvent, IngestError> {
        if is_blank(&self.session_id) {
            return Err(IngestError::BlankField("sessionId"));
        }
        if is_blank(&self.event_type) {
            return Err(IngestError::BlankField("eventType"));
        }
        if is_blank(&self.payload) {
            return Err(IngestError::BlankField("payload"));
        }

        let event_id = match self.event_id {
            Some(id) if !is_blank(&id) => id,
            _ => Uuid::now_v7().to_string(),
        };
        let ts = match self.ts {
            Some(ts) if !is_blank(&ts) => ts,
            _ => Utc::now().to_rfc3339(),
        };

        Ok(PublishedEvent {
            event_id,
            session_id: self.session_id,
            event_type: self.event_type,
            payload: self.payload,
            ts,
        })
    }
}
