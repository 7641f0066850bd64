use thiserror::Error;

use crate::types::LoopStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column (schedule kind, history) failed to encode or decode.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The schedule configuration is out of range or malformed.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// `time_of_day` is not a 24-hour `HH:mm` string.
    #[error("Invalid time of day: {0:?} (expected HH:mm)")]
    InvalidTimeOfDay(String),

    /// `timezone` is not a known IANA zone name.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A queue loop has nothing to post, so its position cannot advance.
    #[error("Loop {id} has an empty content queue")]
    EmptyQueue { id: String },

    /// The loop already reached `completed`, `cancelled` or `failed`.
    #[error("Loop {id} is {status} and cannot be modified")]
    TerminalState { id: String, status: LoopStatus },

    /// A manual status change that the state machine does not allow.
    #[error("Cannot {action} loop {id} while it is {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: LoopStatus,
    },

    /// No loop with the given ID exists in the store.
    #[error("Loop not found: {id}")]
    LoopNotFound { id: String },
}

impl SchedulerError {
    /// True when the stored loop itself is unusable, so retrying it later
    /// can only fail the same way.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidSchedule(_)
                | SchedulerError::InvalidTimeOfDay(_)
                | SchedulerError::InvalidTimezone(_)
                | SchedulerError::EmptyQueue { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
