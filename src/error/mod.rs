use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Network/connectivity issues talking to an upstream
    #[error("Network Error: {0}")]
    Network(String),

    /// An upstream call exceeded its time budget
    #[error("Timeout Error: {0}")]
    Timeout(String),

    /// Upstream answered, but with an error status or unusable body
    #[error("Upstream Error: {0}")]
    Upstream(String),

    /// Parsing errors for upstream or stored payloads
    #[error("Parse Error: {0}")]
    Parse(String),

    /// Snapshot store read/write failures
    #[error("Storage Error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    Config(String),

    /// Unknown limiter name, missing record, etc.
    #[error("Not Found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::Timeout(err.to_string())
        } else if err.is_decode() {
            CoreError::Parse(format!("Response decode error: {}", err))
        } else if err.is_status() {
            CoreError::Upstream(err.to_string())
        } else {
            CoreError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Storage(format!("I/O error: {}", err))
    }
}

impl From<url::ParseError> for CoreError {
    fn from(err: url::ParseError) -> Self {
        CoreError::Config(format!("Invalid URL: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for CoreError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        CoreError::Timeout(err.to_string())
    }
}

impl CoreError {
    /// Determines if an error is worth retrying later
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoreError::Network(_) => true,
            CoreError::Timeout(_) => true,
            CoreError::Upstream(_) => true,
            CoreError::Storage(_) => true, // disk may free up
            CoreError::Parse(_) => false,  // same payload will fail again
            CoreError::Config(_) => false,
            CoreError::NotFound(_) => false,
        }
    }

    /// Short category label used in log lines
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::Network(_) => "network",
            CoreError::Timeout(_) => "timeout",
            CoreError::Upstream(_) => "upstream",
            CoreError::Parse(_) => "parse",
            CoreError::Storage(_) => "storage",
            CoreError::Config(_) => "config",
            CoreError::NotFound(_) => "not_found",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
