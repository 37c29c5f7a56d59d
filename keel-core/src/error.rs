//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeelError {
    /// A configuration value is outside its valid range.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// PPO update requested before enough steps were collected.
    #[error("Not ready to update: trajectory has {len} steps, {required} required")]
    NotReadyToUpdate {
        /// Number of steps in the trajectory.
        len: usize,
        /// Number of steps required for an update.
        required: usize,
    },

    /// An index does not point at a stored item.
    #[error("Index {index} is out of range for {len} stored items")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Current number of stored items.
        len: usize,
    },

    /// A reward was given while no step has been recorded.
    #[error("Trajectory is empty")]
    EmptyTrajectory,

    /// An action does not fit the action space of the receiver.
    #[error("Action space mismatch: {0}")]
    ActionSpaceMismatch(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

/// Returns [`KeelError::ConfigurationError`] unless `cond` holds.
pub fn ensure_config(cond: bool, msg: impl FnOnce() -> String) -> Result<(), KeelError> {
    if cond {
        Ok(())
    } else {
        Err(KeelError::ConfigurationError(msg()))
    }
}
