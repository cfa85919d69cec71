use axum::extract::{Path, Query, State};
use axum::Json;
use forge_core::engine::{SubmitResult, VerifyReport};
use forge_core::event::ProgressionEvent;
use forge_core::projection::PlayerStatusSnapshot;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/players: every user with at least one ledger event.
pub async fn list_players(State(app): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.players())
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// GET /api/players/{user}/status
pub async fn get_status(
    State(app): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<PlayerStatusSnapshot>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.player_status(&user))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct HistoryParams {
    /// Only events with a sequence greater than this.
    #[serde(default)]
    pub after: u64,
}

/// GET /api/players/{user}/events?after=N: the user's ledger in sequence order.
pub async fn list_events(
    State(app): State<AppState>,
    Path(user): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ProgressionEvent>>, AppError> {
    let engine = app.engine.clone();
    let mut events = tokio::task::spawn_blocking(move || engine.replay(&user))
        .await
        .map_err(AppError::join)??;
    events.retain(|e| e.sequence > params.after);
    Ok(Json(events))
}

/// POST /api/players/{user}/rebuild: discard the cached projection and replay.
pub async fn rebuild(
    State(app): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<PlayerStatusSnapshot>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.rebuild(&user))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// GET /api/players/{user}/verify: compare the cache with a fresh replay.
/// A mismatch is repaired and reported as a 500 for operators.
pub async fn verify(
    State(app): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<VerifyReport>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.verify(&user))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct ChangeJobBody {
    pub to: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// POST /api/players/{user}/job: switch job class once eligible.
pub async fn change_job(
    State(app): State<AppState>,
    Path(user): Path<String>,
    Json(body): Json<ChangeJobBody>,
) -> Result<Json<SubmitResult>, AppError> {
    let engine = app.engine.clone();
    let result =
        tokio::task::spawn_blocking(move || engine.change_job(&user, &body.to, body.idempotency_key))
            .await
            .map_err(AppError::join)??;
    app.publish(&result.notifications);
    Ok(Json(result))
}
