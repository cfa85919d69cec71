pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Notifications (SSE)
        .route(
            "/api/notifications",
            get(routes::notifications::sse_notifications),
        )
        // Events
        .route("/api/events", post(routes::events::submit_event))
        // Players
        .route("/api/players", get(routes::players::list_players))
        .route("/api/players/{user}/status", get(routes::players::get_status))
        .route("/api/players/{user}/events", get(routes::players::list_events))
        .route("/api/players/{user}/rebuild", post(routes::players::rebuild))
        .route("/api/players/{user}/verify", get(routes::players::verify))
        .route("/api/players/{user}/job", post(routes::players::change_job))
        // Quests
        .route(
            "/api/players/{user}/quests",
            get(routes::quests::list_quests),
        )
        .route(
            "/api/players/{user}/quests/offer",
            post(routes::quests::offer_quests),
        )
        .route(
            "/api/players/{user}/quests/{id}/start",
            post(routes::quests::start_quest),
        )
        .route(
            "/api/players/{user}/quests/{id}/complete",
            post(routes::quests::complete_quest),
        )
        .route(
            "/api/players/{user}/quests/{id}/claim",
            post(routes::quests::claim_quest),
        )
        // Proposals
        .route(
            "/api/proposals",
            get(routes::proposals::list_proposals).post(routes::proposals::create_proposal),
        )
        .route("/api/proposals/{id}", get(routes::proposals::get_proposal))
        .route(
            "/api/proposals/{id}/votes",
            post(routes::proposals::cast_vote),
        )
        // Assessments
        .route(
            "/api/assessments",
            get(routes::assessments::list_assessments)
                .post(routes::assessments::create_assessment),
        )
        .route(
            "/api/assessments/{id}",
            get(routes::assessments::get_assessment)
                .delete(routes::assessments::cancel_assessment),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the engine under `root`, recover interrupted assessment jobs and
/// serve the API on `port`.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Like [`serve`], on a pre-bound listener (useful when `port = 0`).
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app_state = AppState::open(&root)?;
    let resumed = jobs::recover(&app_state).await?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed pending assessment jobs");
    }

    let actual_port = listener.local_addr()?.port();
    tracing::info!("forge API listening on http://localhost:{actual_port}");

    axum::serve(listener, build_router(app_state)).await?;
    Ok(())
}
