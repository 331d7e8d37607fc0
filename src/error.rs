use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("IO_FAILURE: {0}")]
    Io(String),

    #[error("COORDINATION_FAILED: {0}")]
    Coordination(String),

    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    #[error("INVALID_NAME: {0}")]
    InvalidName(String),

    #[error("CANCELLED: superseded by a newer request")]
    Cancelled,

    #[error("CONFIG_ERROR: {0}")]
    Config(String),

    #[error("WATCHER_ERROR: {0}")]
    Watcher(String),
}

impl RepositoryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RepositoryError::Cancelled)
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(value: std::io::Error) -> Self {
        RepositoryError::Io(value.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        RepositoryError::Config(value.to_string())
    }
}

impl From<notify::Error> for RepositoryError {
    fn from(value: notify::Error) -> Self {
        RepositoryError::Watcher(value.to_string())
    }
}

impl From<tokio::task::JoinError> for RepositoryError {
    fn from(value: tokio::task::JoinError) -> Self {
        RepositoryError::Io(format!("background task failed: {}", value))
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;
