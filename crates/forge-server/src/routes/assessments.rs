use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use forge_core::assessment::ProfileSnapshot;
use forge_core::jobs::AssessmentJob;
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs;
use crate::state::AppState;

#[derive(serde::Deserialize)]
pub struct AssessBody {
    pub user_id: String,
    /// Inline snapshot. Without one the job reads `.forge/profiles/<user>.json`.
    #[serde(default)]
    pub snapshot: Option<ProfileSnapshot>,
}

/// POST /api/assessments: queue a background assessment job.
pub async fn create_assessment(
    State(app): State<AppState>,
    Json(body): Json<AssessBody>,
) -> Result<(StatusCode, Json<AssessmentJob>), AppError> {
    let job = jobs::submit(&app, body.user_id, body.snapshot).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/assessments: all jobs, newest first.
pub async fn list_assessments(
    State(app): State<AppState>,
) -> Result<Json<Vec<AssessmentJob>>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.jobs().list_all())
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// GET /api/assessments/{id}
pub async fn get_assessment(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssessmentJob>, AppError> {
    let engine = app.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.jobs().get(id))
        .await
        .map_err(AppError::join)??;
    Ok(Json(result))
}

/// DELETE /api/assessments/{id}: cancel a pending or running job.
pub async fn cancel_assessment(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssessmentJob>, AppError> {
    Ok(Json(jobs::cancel(&app, id).await?))
}
