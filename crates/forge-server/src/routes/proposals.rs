use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use forge_core::engine::NewProposal;
use forge_core::types::VoteDirection;
use forge_core::voting::{RoadmapProposal, Vote, VoteResult};

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/proposals
pub async fn list_proposals(
    State(app): State<AppState>,
) -> Result<Json<Vec<RoadmapProposal>>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.list_proposals())
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// POST /api/proposals
pub async fn create_proposal(
    State(app): State<AppState>,
    Json(body): Json<NewProposal>,
) -> Result<(StatusCode, Json<RoadmapProposal>), AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.submit_proposal(body))
        .await
        .map_err(AppError::join)??;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(serde::Serialize)]
pub struct ProposalDetail {
    #[serde(flatten)]
    pub proposal: RoadmapProposal,
    pub votes: Vec<Vote>,
}

/// GET /api/proposals/{id}: the proposal with every recorded vote.
pub async fn get_proposal(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProposalDetail>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || {
        let proposal = engine.get_proposal(&id)?;
        let votes = engine.proposal_votes(&id)?;
        Ok::<_, forge_core::ForgeError>(ProposalDetail { proposal, votes })
    })
    .await
    .map_err(AppError::join)??;
    Ok(Json(result))
}

#[derive(serde::Deserialize)]
pub struct VoteBody {
    pub user_id: String,
    pub direction: VoteDirection,
}

/// POST /api/proposals/{id}/votes: one vote per user; repeats are no-ops.
pub async fn cast_vote(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<VoteBody>,
) -> Result<Json<VoteResult>, AppError> {
    let engine = app.engine.clone();
    let result =
        tokio::task::spawn_blocking(move || engine.cast_vote(&body.user_id, &id, body.direction))
            .await
            .map_err(AppError::join)??;
    Ok(Json(result))
}
