use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use forge_core::engine::ClaimOutcome;
use forge_core::quest::QuestInstance;
use forge_core::types::QuestState;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/players/{user}/quests/offer: materialise quests the offering
/// policy allows today. Returns only newly offered instances.
pub async fn offer_quests(
    State(app): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<Vec<QuestInstance>>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.offer_quests(&user, Utc::now()))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct ListParams {
    pub state: Option<QuestState>,
}

/// GET /api/players/{user}/quests?state=offered
pub async fn list_quests(
    State(app): State<AppState>,
    Path(user): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<QuestInstance>>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.list_quests(&user, params.state))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// POST /api/players/{user}/quests/{id}/start
pub async fn start_quest(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
) -> Result<Json<QuestInstance>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.start_quest(&user, &id, Utc::now()))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// POST /api/players/{user}/quests/{id}/complete
pub async fn complete_quest(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
) -> Result<Json<QuestInstance>, AppError> {
    let engine = app.engine.clone();
    let result =
        tokio::task::spawn_blocking(move || engine.complete_quest(&user, &id, Utc::now()))
            .await
            .map_err(AppError::join)??;
    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct ClaimBody {
    pub idempotency_key: String,
}

/// POST /api/players/{user}/quests/{id}/claim: the only quest step that grants XP.
pub async fn claim_quest(
    State(app): State<AppState>,
    Path((user, id)): Path<(String, String)>,
    Json(body): Json<ClaimBody>,
) -> Result<Json<ClaimOutcome>, AppError> {
    let engine = app.engine.clone();
    let result =
        tokio::task::spawn_blocking(move || engine.claim_quest(&user, &id, &body.idempotency_key))
            .await
            .map_err(AppError::join)??;
    app.publish(&result.notifications);
    Ok(Json(result))
}
