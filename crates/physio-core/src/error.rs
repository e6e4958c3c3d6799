//! Error types for the movement validation engine.
//!
//! Low-confidence input is not an error: detectors decline to emit instead.
//! Everything here is either a configuration fault or a sequencing fault the
//! caller has to decide about.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("No threshold configured for error type '{error_type}'")]
    MissingThreshold { error_type: String },

    #[error("Malformed threshold for '{error_type}': {reason}")]
    MalformedThreshold { error_type: String, reason: String },

    #[error("No injury-risk weight configured for error type '{error_type}'")]
    MissingRiskWeight { error_type: String },

    #[error("No active ROM session")]
    NoActiveSession,

    #[error("ROM session {session_id} is already active")]
    SessionAlreadyActive { session_id: String },

    #[error("ROM session {session_id} ended after inactivity timeout")]
    SessionExpired { session_id: String },

    #[error("Timestamp not increasing: previous {previous_ms}ms, got {current_ms}ms")]
    NonMonotonicTimestamp { previous_ms: i64, current_ms: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration source error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for faults caused by calling the engine out of order.
    pub fn is_sequencing(&self) -> bool {
        matches!(
            self,
            Error::NoActiveSession
                | Error::SessionAlreadyActive { .. }
                | Error::SessionExpired { .. }
                | Error::NonMonotonicTimestamp { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
