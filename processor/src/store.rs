use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::event::SessionEvent;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable, idempotent persistence of decoded events.
///
/// `batch_insert` returns one result per input event, in input order: the
/// number of rows that event actually affected (1 for a fresh insert, 0 for a
/// duplicate `event_id` that was skipped). A failure of the whole call
/// propagates to the caller, which owns retrying it.
#[async_trait]
pub trait EventWriter: Send + Sync {
    async fn batch_insert(&self, events: &[SessionEvent]) -> Result<Vec<i64>, StoreError>;
}

pub struct PgEventWriter {
    pool: PgPool,
}

impl PgEventWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventWriter for PgEventWriter {
    async fn batch_insert(&self, events: &[SessionEvent]) -> Result<Vec<i64>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut event_ids = Vec::with_capacity(events.len());
        let mut session_ids = Vec::with_capacity(events.len());
        let mut event_types = Vec::with_capacity(events.len());
        let mut timestamps = Vec::with_capacity(events.len());
        let mut payloads = Vec::with_capacity(events.len());
        for event in events {
            event_ids.push(event.event_id.clone());
            session_ids.push(event.session_id.clone());
            event_types.push(event.event_type.clone());
            timestamps.push(event.ts);
            payloads.push(event.payload.to_string());
        }

        // Single round trip. RETURNING only yields the ids that were actually
        // inserted, which is how we recover per-row results from one statement.
        let rows = sqlx::query(
            r#"
            INSERT INTO events (event_id, session_id, event_type, ts, payload)
                (SELECT event_id, session_id, event_type, ts, payload::jsonb
                 FROM UNNEST(
                    $1::text[],
                    $2::text[],
                    $3::text[],
                    $4::timestamptz[],
                    $5::text[]) AS t(event_id, session_id, event_type, ts, payload))
            ON CONFLICT (event_id) DO NOTHING
            RETURNING event_id"#,
        )
        .bind(&event_ids)
        .bind(&session_ids)
        .bind(&event_types)
        .bind(&timestamps)
        .bind(&payloads)
        .fetch_all(&self.pool)
        .await?;

        let inserted: HashSet<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("event_id"))
            .collect();

        Ok(row_results(events, inserted))
    }
}

/// Map the set of inserted ids back onto the input batch. An id is consumed by
/// its first occurrence, so an in-batch duplicate reports 0 like a duplicate
/// of an already-stored row does.
pub fn row_results(events: &[SessionEvent], inserted: HashSet<String>) -> Vec<i64> {
    let mut remaining = inserted;
    events
        .iter()
        .map(|event| i64::from(remaining.remove(&event.event_id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::decode_record;

    fn event(id: &str) -> SessionEvent {
        let mut event = decode_record("{}");
        event.event_id = id.to_string();
        event
    }

    #[test]
    fn row_results_are_in_input_order() {
        let events = vec![event("a"), event("b"), event("c")];
        let inserted = HashSet::from(["a".to_string(), "c".to_string()]);

        assert_eq!(row_results(&events, inserted), vec![1, 0, 1]);
    }

    #[test]
    fn in_batch_duplicates_count_once() {
        let events = vec![event("a"), event("a"), event("b")];
        let inserted = HashSet::from(["a".to_string(), "b".to_string()]);

        assert_eq!(row_results(&events, inserted), vec![1, 0, 1]);
    }

    #[test]
    fn fully_deduplicated_batch_reports_all_zero() {
        let events = vec![event("a"), event("b")];

        assert_eq!(row_results(&events, HashSet::new()), vec![0, 0]);
    }
}
