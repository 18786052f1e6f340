//! Error types shared across the ingestion and question-answering layers

/// Result type for video discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Error types for video discovery operations
#[derive(thiserror::Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network failure or unparsable structured output; retried locally
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Error decoding arguments for `{tool}`: {reason}")]
    MalformedToolArguments { tool: String, reason: String },

    /// Arguments decoded but do not fit the tool's parameters; reported back to the model
    #[error("Invalid arguments for `{tool}`: {reason}")]
    InvalidToolArguments { tool: String, reason: String },

    #[error("Invalid function name: '{0}'")]
    UnknownTool(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DiscoveryError {
    /// Whether a retry of the same request could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Generation(_) => true,
            DiscoveryError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
