//! Configuration management for the mpe-player service
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (`--port`)
//! 2. Environment variables (`MPE_CONFIG`, `MPE_PORT`)
//! 3. TOML configuration file (see `mpe_common::config::resolve_config_path`)
//! 4. Built-in defaults (code constants below)

use crate::error::{Error, Result};
use mpe_common::time::ms_to_us;
use serde::Deserialize;
use std::path::Path;

/// Config file name under the platform config directory
pub const CONFIG_FILE_NAME: &str = "player.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MPE_CONFIG";

/// Service configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Renderer and controller timing policy
    #[serde(default)]
    pub playback: PlaybackTuning,

    /// Simulated audio device parameters
    #[serde(default)]
    pub audio: AudioDeviceConfig,

    /// Default parameters for generated sessions
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            logging: LoggingConfig::default(),
            playback: PlaybackTuning::default(),
            audio: AudioDeviceConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Load from `path`, falling back to defaults when no file was resolved
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: PlayerConfig = mpe_common::config::load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PlayerConfig = mpe_common::config::parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.playback.vsync_refresh_hz <= 0.0 {
            return Err(Error::Config("playback.vsync_refresh_hz must be positive".to_string()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(Error::Config("audio.sample_rate and audio.channels must be non-zero".to_string()));
        }
        if self.synthetic.video_fps <= 0.0 {
            return Err(Error::Config("synthetic.video_fps must be positive".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

/// Timing policy shared by the Renderer and the Controller
///
/// These are tuning values rather than protocol constants.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackTuning {
    /// Audio leading video by more than this at sync time is trimmed
    #[serde(default = "default_sync_gap_threshold_ms")]
    pub sync_gap_threshold_ms: u64,

    /// Video frames later than this are dropped instead of rendered
    #[serde(default = "default_late_frame_threshold_ms")]
    pub late_frame_threshold_ms: u64,

    /// Video frames due further out than this are re-evaluated later
    #[serde(default = "default_video_reevaluate_gap_ms")]
    pub video_reevaluate_gap_ms: u64,

    /// Retry interval for decoder creation while formats are not ready
    #[serde(default = "default_scan_sources_retry_ms")]
    pub scan_sources_retry_ms: u64,

    /// Poll interval for sources with a growing duration
    #[serde(default = "default_duration_poll_interval_ms")]
    pub duration_poll_interval_ms: u64,

    /// Offloaded audio paused longer than this is torn down
    #[serde(default = "default_offload_pause_timeout_ms")]
    pub offload_pause_timeout_ms: u64,

    /// Display refresh rate used by the video frame scheduler
    #[serde(default = "default_vsync_refresh_hz")]
    pub vsync_refresh_hz: f64,

    /// Per-session event channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            sync_gap_threshold_ms: default_sync_gap_threshold_ms(),
            late_frame_threshold_ms: default_late_frame_threshold_ms(),
            video_reevaluate_gap_ms: default_video_reevaluate_gap_ms(),
            scan_sources_retry_ms: default_scan_sources_retry_ms(),
            duration_poll_interval_ms: default_duration_poll_interval_ms(),
            offload_pause_timeout_ms: default_offload_pause_timeout_ms(),
            vsync_refresh_hz: default_vsync_refresh_hz(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl PlaybackTuning {
    pub fn sync_gap_threshold_us(&self) -> i64 {
        ms_to_us(self.sync_gap_threshold_ms as i64)
    }

    pub fn late_frame_threshold_us(&self) -> i64 {
        ms_to_us(self.late_frame_threshold_ms as i64)
    }

    pub fn video_reevaluate_gap_us(&self) -> i64 {
        ms_to_us(self.video_reevaluate_gap_ms as i64)
    }
}

/// Simulated audio output device
#[derive(Debug, Clone, Deserialize)]
pub struct AudioDeviceConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Device buffer depth
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,

    /// Report the device as offload capable
    #[serde(default)]
    pub offload: bool,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_ms: default_buffer_ms(),
            offload: false,
        }
    }
}

/// Default generated stream for new sessions
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    #[serde(default = "default_video_fps")]
    pub video_fps: f32,

    #[serde(default = "default_audio_frames_per_buffer")]
    pub audio_frames_per_buffer: u32,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            video_fps: default_video_fps(),
            audio_frames_per_buffer: default_audio_frames_per_buffer(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_port() -> u16 {
    5750
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sync_gap_threshold_ms() -> u64 {
    100
}

fn default_late_frame_threshold_ms() -> u64 {
    40
}

fn default_video_reevaluate_gap_ms() -> u64 {
    500
}

fn default_scan_sources_retry_ms() -> u64 {
    100
}

fn default_duration_poll_interval_ms() -> u64 {
    1000
}

fn default_offload_pause_timeout_ms() -> u64 {
    10_000
}

fn default_vsync_refresh_hz() -> f64 {
    60.0
}

fn default_event_capacity() -> usize {
    256
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    2
}

fn default_buffer_ms() -> u64 {
    200
}

fn default_duration_ms() -> u64 {
    10_000
}

fn default_video_fps() -> f32 {
    30.0
}

fn default_audio_frames_per_buffer() -> u32 {
    1024
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    360
}
