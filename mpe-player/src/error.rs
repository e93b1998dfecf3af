//! Error types for mpe-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for mpe-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Track index out of range or track not selectable
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    /// Parameter value rejected
    #[error("Bad value: {0}")]
    BadValue(String),

    /// Feature not supported by this engine
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Requested information not available yet (e.g. no clock anchor)
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Source (demux/network) errors
    #[error("Source error: {0}")]
    Source(String),

    /// Decoder errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Audio output device errors
    #[error("Audio sink error: {0}")]
    AudioSink(#[from] crate::playback::sink::SinkError),

    /// Actor mailbox closed before a reply arrived
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] mpe_common::Error),

    /// Engine invariant violated; fatal for the session
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using mpe-player Error
pub type Result<T> = std::result::Result<T, Error>;
