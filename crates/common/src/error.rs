//! Central error types for the engine (thiserror-based).

use thiserror::Error;

/// Errors from opening a demuxer over a source.
#[derive(Error, Debug)]
pub enum OpenError {
    /// No registered parser recognized the source bytes.
    #[error("no registered parser accepted the source")]
    Unrecognized,

    /// A parser was requested by name but is not registered.
    #[error("unknown parser: {0}")]
    UnknownFormat(String),

    /// The open was cancelled via the cancellation probe.
    #[error("open was cancelled")]
    Cancelled,

    /// A specific parser rejected or failed on the source.
    #[error("parser {name} failed: {reason}")]
    Parser { name: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by seek requests.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SeekError {
    /// The source reports itself unseekable (and force-seekable is off).
    #[error("source is not seekable")]
    Unseekable,

    /// The requested target is not a usable timestamp.
    #[error("seek target has no usable timestamp")]
    BadTarget,
}
