use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("not initialized: run 'forge init'")]
    NotInitialized,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("projection for '{user}' disagrees with ledger replay: {detail}")]
    InconsistentState { user: String, detail: String },

    #[error("profile source unavailable: {0}")]
    ExternalService(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("quest not found: {0}")]
    QuestNotFound(String),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("proposal already exists: {0}")]
    ProposalExists(String),

    #[error("assessment job not found: {0}")]
    JobNotFound(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("ledger storage error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ForgeError {
    /// Whether a retry could plausibly succeed. Only profile-source failures qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, ForgeError::ExternalService(_))
    }
}

/// Collapse any storage-layer error into [`ForgeError::Ledger`].
pub(crate) fn db_err(e: impl std::fmt::Display) -> ForgeError {
    ForgeError::Ledger(e.to_string())
}

pub type Result<T> = std::result::Result<T, ForgeError>;
