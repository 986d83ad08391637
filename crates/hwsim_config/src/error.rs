//! Error types for settings loading and validation.

/// Errors that can occur when loading or validating `hwsim.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A value is present but unusable.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A duration string could not be parsed.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration {
        /// The offending text.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}
