//! Synthetic collaborators
//!
//! A generated source and a pass-through decoder so a session can run end to
//! end without real media.

mod decoder;
mod source;

pub use decoder::{PassthroughDecoder, SyntheticDecoderFactory};
pub use source::SyntheticSource;

use crate::config::PlayerConfig;
use serde::Deserialize;

/// Shape of a generated stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyntheticParams {
    pub duration_ms: u64,
    #[serde(default = "enabled")]
    pub has_audio: bool,
    #[serde(default = "enabled")]
    pub has_video: bool,
    /// Offer a timed-text track with one cue per second
    #[serde(default)]
    pub timed_text: bool,
    /// Embed closed captions in the video stream
    #[serde(default)]
    pub captions: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub audio_frames_per_buffer: u32,
    pub video_fps: f32,
    pub width: u32,
    pub height: u32,
}

fn enabled() -> bool {
    true
}

impl SyntheticParams {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            duration_ms: config.synthetic.duration_ms,
            has_audio: true,
            has_video: true,
            timed_text: false,
            captions: false,
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
            audio_frames_per_buffer: config.synthetic.audio_frames_per_buffer,
            video_fps: config.synthetic.video_fps,
            width: config.synthetic.width,
            height: config.synthetic.height,
        }
    }
}
