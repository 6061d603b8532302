//! Accepts framed messages of the logjam bus.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use bytes::Bytes;

use crate::service::ServiceState;
use crate::services::decoder::IngestMessage;

/// Enqueues the body without decoding it.
///
/// Responds with `503` when the queue is full, so that senders can back off.
pub async fn handle(
    State(state): State<ServiceState>,
    Path((stream, topic)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    let message = IngestMessage {
        stream,
        topic,
        body,
    };

    match state.ingest(message) {
        true => StatusCode::ACCEPTED,
        false => StatusCode::SERVICE_UNAVAILABLE,
    }
}
