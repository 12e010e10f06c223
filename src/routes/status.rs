use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::app_state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    /// Client-chosen id; reconnecting with the same id replaces the old stream.
    pub connection_id: Option<String>,
}

/// GET /api/upload-jobs/{job_id}/status: Server-sent status events for a job.
///
/// The stream ends when the job settles, when the subscriber is replaced or
/// evicted, or after the configured connection timeout.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<SubscribeParams>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let connection_id = params
        .connection_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let receiver = state.broadcaster.create_connection(job_id, &connection_id);

    let events = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|event| (event, receiver))
    })
    .map(|event| Event::default().event("status").json_data(&event))
    .take_until(tokio::time::sleep(state.settings.stream_timeout));

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// DELETE /api/upload-jobs/{job_id}/status: Close every stream of a job.
pub async fn unsubscribe(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> StatusCode {
    state.broadcaster.close_all_connections(job_id);
    StatusCode::NO_CONTENT
}
