//! Error types for the core crate.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A status string that is not one of the known task states.
    #[error("Unknown task status '{0}'")]
    UnknownStatus(String),

    /// A change event type other than INSERT, UPDATE or DELETE.
    #[error("Unknown change event type '{0}'")]
    UnknownEventType(String),
}

impl CoreError {
    pub fn unknown_status(value: impl Into<String>) -> Self {
        Self::UnknownStatus(value.into())
    }

    pub fn unknown_event_type(value: impl Into<String>) -> Self {
        Self::UnknownEventType(value.into())
    }
}
