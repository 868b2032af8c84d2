//! Error types for histoscope-core.

use thiserror::Error;

/// Result type alias for histoscope operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for histoscope operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pixel buffer does not match the declared image dimensions.
    #[error("invalid image dimensions: {width}x{height} does not hold {len} samples")]
    InvalidDimensions {
        width: usize,
        height: usize,
        len: usize,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A derived-value calculation failed.
    #[error("computation error: {0}")]
    Compute(String),

    /// The task dispatcher no longer accepts jobs.
    #[error("task dispatcher has shut down")]
    DispatcherClosed,

    /// A worker was started twice.
    #[error("worker already started")]
    AlreadyStarted,

    /// The subject was closed before the operation could run.
    #[error("subject has been closed")]
    SubjectClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Builds a [`Error::Compute`] from anything printable.
    pub fn compute(message: impl std::fmt::Display) -> Self {
        Self::Compute(message.to_string())
    }
}
