//! Server-Sent Events for run progress
//!
//! Streams every `AlignerEvent`: state changes, run start/finish, per-batch
//! results and progress counters.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    ltr_common::sse::create_event_sse_stream("ltr-aligner", &state.event_bus)
}
