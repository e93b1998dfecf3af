//! Playback-related type definitions carried inside events

use serde::{Deserialize, Serialize};

/// Caller-visible playback state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No source attached, or reset completed
    #[default]
    Idle,
    /// Source prepared, not yet started
    Prepared,
    /// Actively playing
    Playing,
    /// Paused by the client or by buffering
    Paused,
    /// Stopped after an unrecoverable error
    Error,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Prepared => write!(f, "prepared"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Error => write!(f, "error"),
        }
    }
}

/// Classification of errors reported to the caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    /// Source (network/demux) failure
    Source,
    /// Generic decoder failure
    Decoder,
    /// Decoder rejected the frame dimensions
    BadFrameSize,
    /// Renderer could not be created or configured
    Renderer,
    /// Protected content without a license
    DrmNoLicense,
    /// Engine invariant violated; the session is stopped
    Internal,
}

/// Informational notices that do not change playback state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InfoKind {
    /// First video frame was handed to the display
    VideoRenderingStart,
    /// Audio and video both started presenting after a start or seek
    MediaRenderingStart,
    /// Source started buffering
    BufferingStart,
    /// Source finished buffering
    BufferingEnd,
    /// Source cannot seek
    NotSeekable,
    /// Network throughput estimate in kbps
    NetworkBandwidth,
    /// Audio output path was rebuilt
    AudioTearDown,
}
