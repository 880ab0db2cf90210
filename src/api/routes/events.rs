//! Progress event stream handler.

use super::{EventsQuery, non_empty};
use crate::api::AppState;
use crate::error::Error;
use crate::types::ClientId;
use axum::{
    extract::{Query, State},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;

/// GET /events - Server-sent events for one client id
///
/// Registers a push channel for `id`, replacing any channel already
/// registered for it. Each event is sent as a `data:` line holding the JSON
/// object (`{"status":"downloading","progress":42.5}`). The channel is
/// removed when the subscriber disconnects.
#[utoipa::path(
    get,
    path = "/events",
    tag = "conversion",
    params(EventsQuery),
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream", body = crate::types::Event),
        (status = 400, description = "Missing client id", body = crate::error::ApiError)
    )
)]
pub async fn event_stream(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Response {
    let Some(id) = non_empty(query.id) else {
        return Error::InvalidInput("No client id provided".to_string()).into_response();
    };

    let client_id = ClientId::from(id);
    tracing::debug!(client_id = %client_id, "subscriber connected");

    // Dropping the stream (client gone) drops the handle, which unregisters it
    let handle = state.registry.register(client_id);

    let sse_stream = handle.filter_map(|event| match serde_json::to_string(&event) {
        Ok(json_data) => Some(Ok::<_, Infallible>(SseEvent::default().data(json_data))),
        Err(e) => {
            tracing::warn!("Failed to serialize event to JSON: {}", e);
            None
        }
    });

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(state.config.events.keep_alive))
        .into_response()
}
