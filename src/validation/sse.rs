//! Server-Sent Events progress stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};

use super::api::{ApiError, SharedState};

/// Comment frames keep idle proxies from closing the connection.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// `GET /api/runs/{id}/stream`: one `data:` frame per progress event,
/// ending after `done`.
pub async fn stream_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let feed = state.open_feed(&run_id).await?;
    tracing::debug!(run_id = %run_id, "SSE subscriber attached");

    let events = stream::unfold(feed, |mut feed| async move {
        let event = feed.next().await?;
        let frame = Event::default().json_data(&event).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to serialize progress event");
            Event::default().comment("unserializable event")
        });
        Some((Ok(frame), feed))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    ))
}
