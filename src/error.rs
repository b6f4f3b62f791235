use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Index file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embed(String),

    #[error("Unknown project: {0}")]
    ProjectNotFound(String),

    #[error("{0} projects are configured; name one")]
    AmbiguousProject(usize),

    #[error("Semantic search is disabled for project {0}")]
    IndexingDisabled(String),

    #[error("Project root does not exist: {0}")]
    RootMissing(String),

    #[error("indexing cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
