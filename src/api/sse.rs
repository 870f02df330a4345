// Server-sent event stream: one snapshot frame on connect, then a live tail
// of state envelopes for a single bot.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::core::events::StateEnvelope;
use crate::metrics;

use super::AppState;

/// Decrements the live-subscriber gauge when the stream is dropped, however
/// the client went away.
struct ClientGauge;

impl ClientGauge {
    fn connect() -> Self {
        metrics::SSE_CLIENTS.inc();
        ClientGauge
    }
}

impl Drop for ClientGauge {
    fn drop(&mut self) {
        metrics::SSE_CLIENTS.dec();
    }
}

/// GET /api/bots/{id}/events
///
/// Frames are JSON: first a `snapshot` frame carrying the current state, then
/// one `state` frame per envelope published for this bot. Envelopes for other
/// bots on the shared bus are filtered out here.
pub async fn stream_bot_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(snapshot) = state.manager.get_state(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Bot not found" })))
            .into_response();
    };

    let rx = state.manager.subscribe();
    let gauge = ClientGauge::connect();
    tracing::debug!(bot_id = %id, "sse client connected");

    let initial = json!({ "type": "snapshot", "state": snapshot });
    let head = stream::once(async move { Ok(Event::default().data(initial.to_string())) });
    let stream = head.chain(tail(rx, id, gauge));

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn tail(
    rx: broadcast::Receiver<StateEnvelope>,
    bot_id: String,
    gauge: ClientGauge,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, bot_id, gauge), |(mut rx, bot_id, gauge)| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.bot_id == bot_id => {
                    let frame = json!({
                        "type": "state",
                        "state": envelope.state,
                        "event": envelope.event,
                        "at": envelope.at,
                    });
                    let event = Event::default().data(frame.to_string());
                    return Some((Ok(event), (rx, bot_id, gauge)));
                }
                // Envelope for another bot; keep waiting.
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(bot_id = %bot_id, skipped, "sse client lagged, frames dropped");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
