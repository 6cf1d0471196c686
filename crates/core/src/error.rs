#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("failed to parse diff: {0}")]
    DiffParseError(String),

    #[error("missing ref: {0}")]
    MissingRef(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("review budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("review cancelled")]
    Cancelled,
}
