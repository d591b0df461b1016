use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    /// The provider answered, but with an error payload or an unusable body.
    #[error("provider error: {0}")]
    Provider(String),

    /// The request never produced a provider answer (connect, timeout, I/O).
    #[error("transport error: {0}")]
    Transport(String),
}

impl SurveyError {
    /// Failures of a single external call. The runner skips the task and moves on.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Transport(_))
    }
}

pub type SurveyResult<T> = Result<T, SurveyError>;
