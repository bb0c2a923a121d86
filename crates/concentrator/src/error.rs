//! Engine error definitions

use thiserror::Error;
use validator::ValidationErrors;

/// Errors raised by the concentrator itself.
///
/// Bad measurement data never produces an error; it is classified and counted.
#[derive(Debug, Error)]
pub enum ConcentratorError {
    /// A setting failed validation at construction or assignment
    #[error("invalid setting '{setting}': {message}")]
    InvalidSetting { setting: String, message: String },

    /// `start` was called outside a tokio runtime
    #[error("no tokio runtime available: {0}")]
    RuntimeUnavailable(String),

    /// The engine was disposed and can no longer be started
    #[error("concentrator has been disposed")]
    Disposed,
}

impl ConcentratorError {
    /// Create invalid setting error
    pub fn invalid_setting(setting: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting: setting.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationErrors> for ConcentratorError {
    /// Keep the first failing field, mirroring how configuration files are validated.
    fn from(errors: ValidationErrors) -> Self {
        let first = errors.field_errors().into_iter().next();
        match first {
            Some((field, errs)) => {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "invalid value".to_string());
                Self::invalid_setting(field.to_string(), message)
            }
            None => Self::invalid_setting("config", errors.to_string()),
        }
    }
}
