use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cannot stratify training data: {0}")]
    Stratification(String),

    #[error("stored stress level {0:?} is not recognized")]
    UnknownLabel(String),

    #[error("storage operation failed")]
    Persistence(#[from] sqlx::Error),

    #[error("model artifact i/o failed")]
    ArtifactIo(#[from] std::io::Error),

    #[error("model artifact encoding failed")]
    ArtifactEncoding(#[from] serde_json::Error),
}
