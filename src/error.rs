//! Error types for the RAID queueing and reconstruction core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Completion status handed back by the device layer for one request.
pub type IoStatus = Result<()>;

/// Errors that can occur in the RAID core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Device Errors
    // =========================================================================
    /// The device layer reported a failed operation
    #[error("I/O failed on column {column}: {reason}")]
    DeviceFailure { column: usize, reason: String },

    /// The device worker for a column is gone
    #[error("Device for column {column} is offline")]
    DeviceOffline { column: usize },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Unknown queueing discipline name
    #[error("Unknown queueing discipline: {0}")]
    UnknownDiscipline(String),

    /// YAML configuration could not be decoded
    #[error("Failed to parse configuration: {0}")]
    Yaml(String),

    // =========================================================================
    // Reconstruction Errors
    // =========================================================================
    /// The event channel has been torn down
    #[error("Reconstruction event channel closed")]
    ChannelClosed,

    /// A reconstruction step failed
    #[error("Reconstruction of unit {ru} failed: {reason}")]
    ReconstructionFailed { ru: u64, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Shorthand for a device failure on `column`.
    pub fn device(column: usize, reason: impl Into<String>) -> Self {
        Error::DeviceFailure {
            column,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Yaml(e.to_string())
    }
}
