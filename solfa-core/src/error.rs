//! Error types for the solfa-core crate.

use thiserror::Error;

/// Errors surfaced to the host.
///
/// Missing pitch and out-of-tolerance frequencies are not errors: they are
/// ordinary per-frame values (`None`) and never show up here.
#[derive(Error, Debug)]
pub enum SolfaError {
    /// The microphone could not be opened (permission denied, no device,
    /// unsupported format). Processing halts; re-requesting capture is up to the host.
    #[error("Audio capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// An expected-note list that cannot be followed (empty, or a cursor past its end).
    #[error("Invalid note sequence: {0}")]
    InvalidSequence(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed or serialized.
    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// File I/O error while loading or saving configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SolfaError.
pub type Result<T> = std::result::Result<T, SolfaError>;
