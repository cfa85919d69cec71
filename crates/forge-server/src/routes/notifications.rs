use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct NotificationParams {
    /// Only stream notifications for this player.
    pub user: Option<String>,
}

/// GET /api/notifications: SSE stream of engine notifications. The SSE
/// event name is the notification kind (`level_up`, `badge_awarded`, ...).
pub async fn sse_notifications(
    State(app): State<AppState>,
    Query(params): Query<NotificationParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = app.notify_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| {
        // Lagged receivers skip what they missed; the ledger is the record.
        let note = msg.ok()?;
        if params.user.as_deref().is_some_and(|u| u != note.user_id()) {
            return None;
        }
        let event = Event::default().event(note.kind()).json_data(&note).ok()?;
        Some(Ok::<Event, Infallible>(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
