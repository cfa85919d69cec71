use axum::extract::State;
use axum::Json;
use forge_core::engine::SubmitResult;
use forge_core::event::EventSubmission;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/events: submit one progression event from an external source.
pub async fn submit_event(
    State(app): State<AppState>,
    Json(sub): Json<EventSubmission>,
) -> Result<Json<SubmitResult>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.submit_event(sub))
        .await
        .map_err(AppError::join)??;

    app.publish(&result.notifications);
    Ok(Json(result))
}
