use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RevenueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Cannot {action} a {kind} in status {from}")]
    InvalidTransition {
        kind: &'static str,
        from: String,
        action: String,
    },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RevenueError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// True for errors the caller should surface as a rejected request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::BadRequest(_)
                | Self::InvalidTransition { .. }
                | Self::Validation(_)
        )
    }
}

pub type RevenueResult<T> = Result<T, RevenueError>;
