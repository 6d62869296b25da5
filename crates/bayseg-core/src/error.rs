//! Error type shared across the engine.
//!
//! Configuration and input problems are reported to the caller; consistency
//! errors mean the seating arrangement no longer matches the corpus and the
//! model must not be used further.

use std::io;

use crate::settings::SettingsError;

/// Convenient result type used throughout the crate.
pub type Result<T, E = SegError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum SegError {
    #[error("invalid configuration: {field}: {reason}")]
    Configuration { field: String, reason: String },

    #[error("invalid input: {0}")]
    Input(String),

    #[error("model consistency violated: {0}")]
    Consistency(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SegError {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SegError {
    fn from(e: serde_json::Error) -> Self {
        SegError::Persistence(e.to_string())
    }
}

impl From<SettingsError> for SegError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::InvalidValue { field, reason } => {
                SegError::Configuration { field, reason }
            }
            other => SegError::config("settings", other.to_string()),
        }
    }
}
