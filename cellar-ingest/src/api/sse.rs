//! Server-Sent Events for recognition, sync and outbox activity

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every CellarEvent: LabelRecognized, SyncProgress, SyncCompleted,
/// SyncFailed and OutboxJobDispatched.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    cellar_common::sse::create_event_sse_stream("cellar-ingest", &state.event_bus)
}
