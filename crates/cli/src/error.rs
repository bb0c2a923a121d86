//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse or validation error
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// Pipeline component failed to start
    #[error("Pipeline startup failed: {message}")]
    PipelineStartup { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn pipeline_startup(message: impl Into<String>) -> Self {
        Self::PipelineStartup {
            message: message.into(),
        }
    }
}

impl From<contracts::ContractError> for CliError {
    fn from(e: contracts::ContractError) -> Self {
        Self::config_invalid(e.to_string())
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_becomes_config_invalid() {
        let err: CliError = contracts::ContractError::config_parse("bad toml").into();
        assert!(matches!(err, CliError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("bad toml"));
    }
}
