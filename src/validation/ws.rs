use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::broadcast::RunFeed;
use super::models::{EventKind, ProgressEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `GET /api/runs/{id}/ws`: the same events as the SSE stream, as text frames.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let feed = state.open_feed(&run_id).await?;
    tracing::debug!(run_id = %run_id, "WebSocket subscriber attached");
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, feed))
        .into_response())
}

async fn handle_socket(socket: WebSocket, feed: RunFeed) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, feed).await;
}

fn to_frame(event: &ProgressEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize progress event");
            None
        }
    }
}

/// Forward run events with ping/pong keepalive.
///
/// Ends after `done` has been sent, when the client goes away, or when no
/// Pong arrives within [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut feed: RunFeed,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("WebSocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = feed.next() => {
                let Some(event) = event else { break };
                let is_done = event.kind() == EventKind::Done;
                if let Some(frame) = to_frame(&event)
                    && sender.send(frame).await.is_err()
                {
                    break;
                }
                if is_done {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::models::RunStatus;

    #[test]
    fn test_frames_carry_event_json() {
        let event = ProgressEvent::Done {
            run_id: "web_1".to_string(),
            status: RunStatus::Completed,
        };
        match to_frame(&event) {
            Some(Message::Text(text)) => {
                let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(json["type"], "done");
                assert_eq!(json["status"], "completed");
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_keepalive_timing() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
    }
}
