use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use tracing::instrument;

use crate::api::IngestError;
use crate::event::RawSessionEvent;
use crate::router;

/// `POST /events`: validate, assign `eventId`/`ts` if the producer didn't, and
/// publish to the log keyed by session. `202` means accepted for delivery, not
/// delivered.
#[instrument(skip_all, fields(session_id, event_type))]
pub async fn ingest_event(
    state: State<router::State>,
    body: Bytes,
) -> Result<StatusCode, IngestError> {
    let raw: RawSessionEvent = serde_json::from_slice(&body)?;
    let event = raw.finalize()?;

    tracing::Span::current().record("session_id", event.session_id.as_str());
    tracing::Span::current().record("event_type", event.event_type.as_str());

    state.sink.send(event).await?;

    Ok(StatusCode::ACCEPTED)
}
