//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for jobfeed operations
pub type Result<T> = std::result::Result<T, JobFeedError>;

/// Error raised while loading or validating settings
#[derive(Error, Debug)]
pub enum JobFeedError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobFeedError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        JobFeedError::Config(message.into())
    }
}
