//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for the shared layer
pub type Result<T> = std::result::Result<T, CommonError>;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A `LOG_*` variable or builder value could not be understood
    #[error("Invalid logging setting {name}: {value}")]
    InvalidSetting { name: &'static str, value: String },

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

impl CommonError {
    pub fn invalid_setting(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name,
            value: value.into(),
        }
    }
}
