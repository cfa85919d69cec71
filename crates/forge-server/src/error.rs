use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use forge_core::ForgeError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ForgeError::Validation(msg.into()).into())
    }

    pub(crate) fn join(e: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {e}"))
    }
}

fn status_for(e: &ForgeError) -> StatusCode {
    match e {
        ForgeError::NotInitialized => StatusCode::BAD_REQUEST,
        ForgeError::Validation(_) | ForgeError::InvalidSlug(_) | ForgeError::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        ForgeError::QuestNotFound(_)
        | ForgeError::ProposalNotFound(_)
        | ForgeError::JobNotFound(_) => StatusCode::NOT_FOUND,
        ForgeError::ProposalExists(_) => StatusCode::CONFLICT,
        ForgeError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ForgeError::ExternalService(_) => StatusCode::SERVICE_UNAVAILABLE,
        ForgeError::InconsistentState { .. }
        | ForgeError::Ledger(_)
        | ForgeError::Io(_)
        | ForgeError::Yaml(_)
        | ForgeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<ForgeError>() {
            Some(e) => status_for(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
