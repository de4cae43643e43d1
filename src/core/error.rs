use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Chat is not configured: {0}")]
    Configuration(#[from] ConfigError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ProviderError),

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("No unanswered message to retry")]
    NothingToRetry,
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    File(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing API key: {0}")]
    MissingApiKey(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecomposeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
