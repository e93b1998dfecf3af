//! Core playback types
//!
//! Stream identifiers, buffers, formats, and the small value types shared by
//! the Controller, Renderer, Source and Decoder contracts.

use mpe_common::events::MediaErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two elementary streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Audio, StreamKind::Video];

    pub fn is_audio(self) -> bool {
        self == StreamKind::Audio
    }

    pub fn other(self) -> StreamKind {
        match self {
            StreamKind::Audio => StreamKind::Video,
            StreamKind::Video => StreamKind::Audio,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// A value kept separately for the audio and the video stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerStream<T> {
    pub audio: T,
    pub video: T,
}

impl<T> PerStream<T> {
    pub fn new(audio: T, video: T) -> Self {
        Self { audio, video }
    }

    pub fn get(&self, stream: StreamKind) -> &T {
        match stream {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    pub fn get_mut(&mut self, stream: StreamKind) -> &mut T {
        match stream {
            StreamKind::Audio => &mut self.audio,
            StreamKind::Video => &mut self.video,
        }
    }
}

/// A timestamped data unit travelling from Source through Decoder to Renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBuffer {
    /// Presentation time in microseconds
    pub pts_us: i64,
    pub data: Vec<u8>,
}

impl MediaBuffer {
    pub fn new(pts_us: i64, data: Vec<u8>) -> Self {
        Self { pts_us, data }
    }
}

/// What happened to a buffer handed to the Renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Video frame to be shown at the given real time
    Rendered { render_time_us: i64 },
    /// Video frame arrived too late and must not be shown
    Late,
    /// Audio data fully written to the device
    Written,
    /// Discarded without presentation (flush, stale generation, sync trim)
    Discarded,
}

impl Disposition {
    pub fn was_rendered(self) -> bool {
        matches!(self, Disposition::Rendered { .. } | Disposition::Written)
    }
}

type ReleaseFn = Box<dyn FnOnce(Disposition) + Send>;

/// Consumed-notification for one buffer
///
/// Fires exactly once: explicitly through [`ReleaseHandle::release`], or with
/// [`Disposition::Discarded`] when dropped unreleased.
pub struct ReleaseHandle {
    callback: Option<ReleaseFn>,
}

impl ReleaseHandle {
    pub fn new(callback: impl FnOnce(Disposition) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// A handle with no observer
    pub fn noop() -> Self {
        Self { callback: None }
    }

    pub fn release(mut self, disposition: Disposition) {
        if let Some(callback) = self.callback.take() {
            callback(disposition);
        }
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Disposition::Discarded);
        }
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// Error reported by a Source or Decoder
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn decoder(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Decoder, message)
    }

    pub fn source(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Source, message)
    }
}

/// Final result carried by an end-of-stream sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    EndOfStream,
    Error(MediaError),
}

impl FinalResult {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FinalResult::EndOfStream)
    }
}

/// Non-data outcomes of pulling from a Source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStatus {
    /// Nothing available yet; retry later
    WouldBlock,
    /// Continuity break; `format_change` means the decoder must be rebuilt
    Discontinuity { format_change: bool },
    EndOfStream,
    Error(MediaError),
}

/// Elementary stream format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: String,
    pub kind: StreamKind,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u16,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub frame_rate: Option<f32>,
    #[serde(default)]
    pub duration_us: Option<i64>,
    /// Closed captions are embedded in this video stream
    #[serde(default)]
    pub has_captions: bool,
}

impl MediaFormat {
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            mime: mime.into(),
            kind: StreamKind::Audio,
            sample_rate,
            channels,
            width: 0,
            height: 0,
            frame_rate: None,
            duration_us: None,
            has_captions: false,
        }
    }

    pub fn video(mime: impl Into<String>, width: u32, height: u32, frame_rate: Option<f32>) -> Self {
        Self {
            mime: mime.into(),
            kind: StreamKind::Video,
            sample_rate: 0,
            channels: 0,
            width,
            height,
            frame_rate,
            duration_us: None,
            has_captions: false,
        }
    }
}

/// Track category as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Audio,
    Video,
    TimedText,
    Subtitle,
    Metadata,
    Unknown,
}

/// Description of one selectable track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_type: TrackType,
    pub mime: String,
    pub language: String,
}

impl TrackInfo {
    pub fn new(track_type: TrackType, mime: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            track_type,
            mime: mime.into(),
            language: language.into(),
        }
    }
}

/// Playback speed and pitch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub speed: f32,
    pub pitch: f32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self { speed: 1.0, pitch: 1.0 }
    }
}

impl PlaybackSettings {
    /// Speed must be finite and non-negative; zero means paused
    pub fn validate(&self) -> crate::Result<()> {
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(crate::Error::BadValue(format!("playback speed {}", self.speed)));
        }
        if !self.pitch.is_finite() || self.pitch <= 0.0 {
            return Err(crate::Error::BadValue(format!("playback pitch {}", self.pitch)));
        }
        Ok(())
    }
}

/// Master clock selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    #[default]
    Default,
    SystemTime,
    AudioTrack,
    Vsync,
}

/// A/V sync policy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    pub source: SyncSource,
    /// Allowed playback-rate deviation used to maintain sync, in [0, 1)
    pub tolerance: f32,
}

impl SyncSettings {
    /// Only the default master clock is supported
    pub fn validate(&self) -> crate::Result<()> {
        if self.source != SyncSource::Default {
            return Err(crate::Error::BadValue(format!("sync source {:?}", self.source)));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(crate::Error::BadValue(format!("sync tolerance {}", self.tolerance)));
        }
        Ok(())
    }
}

/// Per-stream command used by `FlushDecoders`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushCommand {
    None,
    Flush,
    Shutdown,
}

/// Why the Renderer gave up its audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTearDownReason {
    /// A write or start failed on the device
    SinkError,
    /// Offloaded audio stayed paused for too long
    OffloadPauseTimeout,
}

/// Capability flags reported by a Source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceFlags(u32);

impl SourceFlags {
    pub const CAN_PAUSE: SourceFlags = SourceFlags(1);
    pub const CAN_SEEK_BACKWARD: SourceFlags = SourceFlags(2);
    pub const CAN_SEEK_FORWARD: SourceFlags = SourceFlags(4);
    pub const CAN_SEEK: SourceFlags = SourceFlags(8);
    pub const DYNAMIC_DURATION: SourceFlags = SourceFlags(16);
    pub const SECURE: SourceFlags = SourceFlags(32);
    pub const REAL_TIME: SourceFlags = SourceFlags(64);

    pub const fn empty() -> Self {
        SourceFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: SourceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: SourceFlags) -> Self {
        SourceFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for SourceFlags {
    type Output = SourceFlags;

    fn bitor(self, rhs: SourceFlags) -> SourceFlags {
        self.union(rhs)
    }
}
