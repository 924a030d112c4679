//! Error types for annote-core

use thiserror::Error;

/// Main error type for the annote-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persistence failure (session folder, TSV table or root config)
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Media for a stream could not be loaded
    #[error("stream {stream_id} unavailable: {reason}")]
    StreamUnavailable { stream_id: String, reason: String },

    /// `start()` without a selected category
    #[error("no category selected")]
    NoCategorySelected,

    /// Capture cannot start while a timeline interval is being edited
    #[error("an interval edit is in progress")]
    EditInProgress,

    /// Time source or audio source is not set
    #[error("time source and audio source must be selected")]
    MissingSources,

    /// End lies before start on a strict path
    #[error("invalid range: end ({end}) is before start ({start})")]
    InvalidRange { start: f64, end: f64 },

    /// Capture action issued in the wrong state
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    /// The time source is locked by a confirmed capture start
    #[error("time source is locked until the current step is finished")]
    SourceLocked,

    /// Record mutation refused while a step capture is pending
    #[error("finish the current step first")]
    CaptureInProgress,

    /// A record field edit was rejected
    #[error("invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    /// Category number not present in the configuration
    #[error("category {0} is not defined")]
    UnknownCategory(i64),

    /// Record index out of range
    #[error("annotation record {0} not found")]
    RecordNotFound(usize),
}

impl Error {
    /// Whether the error is a guard violation the caller should surface and retry.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Error::NoCategorySelected
                | Error::EditInProgress
                | Error::MissingSources
                | Error::InvalidRange { .. }
                | Error::InvalidTransition { .. }
                | Error::SourceLocked
                | Error::CaptureInProgress
        )
    }
}

/// Result type alias for annote-core
pub type Result<T> = std::result::Result<T, Error>;
