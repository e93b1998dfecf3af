//! Audio output device contract
//!
//! The Renderer talks to the device only through [`AudioSink`]. All calls are
//! non-blocking: a full device answers `write` with [`SinkError::WouldBlock`].
//!
//! [`SimulatedAudioSink`] models a device with a bounded buffer that plays
//! frames in real time as reported by a [`TimeSource`]; the service binds it to
//! every session and tests drive it with `ManualTime`.

use crate::playback::clock::SharedTimeSource;
use crate::playback::types::PlaybackSettings;
use mpe_common::time::{frames_to_us, us_to_frames};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Audio device failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("device buffer full")]
    WouldBlock,
    #[error("device not open")]
    NotOpen,
    #[error("device failure: {0}")]
    Device(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Parameters for opening the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSinkConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Request offloaded (device-timed) playback
    pub offload: bool,
}

/// Audio output device
pub trait AudioSink: Send + Sync {
    /// Open with `config`. Returns whether offload was granted.
    fn open(&self, config: &AudioSinkConfig) -> Result<bool, SinkError>;
    fn close(&self);
    fn ready(&self) -> bool;
    fn start(&self) -> Result<(), SinkError>;
    fn pause(&self);
    fn stop(&self);
    /// Discard everything written but not yet played
    fn flush(&self);
    fn is_stopped(&self) -> bool;
    /// Write interleaved 16-bit samples without blocking; returns bytes accepted
    fn write(&self, data: &[u8]) -> Result<usize, SinkError>;
    fn frame_size(&self) -> usize;
    fn sample_rate(&self) -> u32;
    /// Frames actually played since the last flush or stop
    fn played_frames(&self) -> Result<u64, SinkError>;
    /// EOS must wait for residual audio and stop the device
    fn needs_trailing_padding(&self) -> bool;
    fn set_playback_settings(&self, settings: &PlaybackSettings) -> Result<(), SinkError>;
}

const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug)]
struct DeviceState {
    open: bool,
    offloaded: bool,
    sample_rate: u32,
    channels: u16,
    playing: bool,
    stopped: bool,
    /// Frames accepted since the last flush/stop
    written: u64,
    /// Frames played before the current playing stretch
    played_base: u64,
    playing_since_us: i64,
    speed: f32,
    write_calls: u64,
    failure: Option<String>,
}

impl DeviceState {
    fn played(&self, now_us: i64) -> u64 {
        if !self.playing {
            return self.played_base.min(self.written);
        }
        let elapsed_us = ((now_us - self.playing_since_us).max(0) as f64 * self.speed as f64) as i64;
        (self.played_base + us_to_frames(elapsed_us, self.sample_rate)).min(self.written)
    }

    fn freeze(&mut self, now_us: i64) {
        self.played_base = self.played(now_us);
        self.playing_since_us = now_us;
    }
}

/// Real-time audio device model with a bounded buffer
pub struct SimulatedAudioSink {
    time: SharedTimeSource,
    buffer_us: i64,
    offload_capable: bool,
    state: Mutex<DeviceState>,
}

impl SimulatedAudioSink {
    pub fn new(time: SharedTimeSource, buffer_ms: u64, offload_capable: bool) -> Self {
        Self {
            time,
            buffer_us: buffer_ms as i64 * 1_000,
            offload_capable,
            state: Mutex::new(DeviceState {
                open: false,
                offloaded: false,
                sample_rate: 0,
                channels: 0,
                playing: false,
                stopped: true,
                written: 0,
                played_base: 0,
                playing_since_us: 0,
                speed: 1.0,
                write_calls: 0,
                failure: None,
            }),
        }
    }

    /// Number of `write` calls that reached an open device
    pub fn write_calls(&self) -> u64 {
        self.state.lock().write_calls
    }

    /// Frames accepted since the last flush or stop
    pub fn frames_written(&self) -> u64 {
        self.state.lock().written
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_offloaded(&self) -> bool {
        self.state.lock().offloaded
    }

    /// Make subsequent writes and starts fail, modelling a lost device
    pub fn inject_failure(&self, reason: Option<String>) {
        self.state.lock().failure = reason;
    }

    fn capacity_frames(&self, sample_rate: u32) -> u64 {
        us_to_frames(self.buffer_us, sample_rate).max(1)
    }
}

impl AudioSink for SimulatedAudioSink {
    fn open(&self, config: &AudioSinkConfig) -> Result<bool, SinkError> {
        if config.sample_rate == 0 || config.channels == 0 {
            return Err(SinkError::Unsupported(format!(
                "{} Hz x {} channels",
                config.sample_rate, config.channels
            )));
        }
        let mut state = self.state.lock();
        state.open = true;
        state.offloaded = config.offload && self.offload_capable;
        state.sample_rate = config.sample_rate;
        state.channels = config.channels;
        state.playing = false;
        state.stopped = true;
        state.written = 0;
        state.played_base = 0;
        debug!(
            "simulated sink opened: {} Hz, {} ch, offload={}",
            config.sample_rate, config.channels, state.offloaded
        );
        Ok(state.offloaded)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.playing = false;
        state.stopped = true;
        state.written = 0;
        state.played_base = 0;
    }

    fn ready(&self) -> bool {
        self.state.lock().open
    }

    fn start(&self) -> Result<(), SinkError> {
        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        if !state.open {
            return Err(SinkError::NotOpen);
        }
        if let Some(reason) = &state.failure {
            return Err(SinkError::Device(reason.clone()));
        }
        if !state.playing {
            state.playing = true;
            state.playing_since_us = now_us;
        }
        state.stopped = false;
        Ok(())
    }

    fn pause(&self) {
        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        if state.playing {
            state.freeze(now_us);
            state.playing = false;
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.stopped = true;
        state.written = 0;
        state.played_base = 0;
    }

    fn flush(&self) {
        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        state.written = 0;
        state.played_base = 0;
        state.playing_since_us = now_us;
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        if !state.open {
            return Err(SinkError::NotOpen);
        }
        if let Some(reason) = &state.failure {
            return Err(SinkError::Device(reason.clone()));
        }
        state.write_calls += 1;

        let frame_size = state.channels as usize * BYTES_PER_SAMPLE;
        let frames = (data.len() / frame_size) as u64;
        let queued = state.written - state.played(now_us);
        let room = self.capacity_frames(state.sample_rate).saturating_sub(queued);
        let accepted = frames.min(room);
        if accepted == 0 {
            return Err(SinkError::WouldBlock);
        }
        state.written += accepted;
        Ok(accepted as usize * frame_size)
    }

    fn frame_size(&self) -> usize {
        let state = self.state.lock();
        (state.channels as usize * BYTES_PER_SAMPLE).max(1)
    }

    fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    fn played_frames(&self) -> Result<u64, SinkError> {
        let now_us = self.time.now_us();
        let state = self.state.lock();
        if !state.open {
            return Err(SinkError::NotOpen);
        }
        Ok(state.played(now_us))
    }

    fn needs_trailing_padding(&self) -> bool {
        !self.state.lock().offloaded
    }

    fn set_playback_settings(&self, settings: &PlaybackSettings) -> Result<(), SinkError> {
        if settings.speed <= 0.0 {
            return Err(SinkError::Unsupported(format!("speed {}", settings.speed)));
        }
        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        state.freeze(now_us);
        state.speed = settings.speed;
        Ok(())
    }
}

/// Duration of audio written to `sink` but not yet played
pub fn pending_playout_us(sink: &dyn AudioSink, frames_written: u64) -> i64 {
    let rate = sink.sample_rate();
    let played = sink.played_frames().unwrap_or(0);
    frames_to_us(frames_written.saturating_sub(played), rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::clock::ManualTime;
    use std::sync::Arc;

    fn open_sink(buffer_ms: u64) -> (Arc<ManualTime>, SimulatedAudioSink) {
        let time = Arc::new(ManualTime::new(0));
        let sink = SimulatedAudioSink::new(time.clone(), buffer_ms, false);
        sink.open(&AudioSinkConfig {
            sample_rate: 1_000,
            channels: 1,
            offload: false,
        })
        .unwrap();
        (time, sink)
    }

    #[test]
    fn test_write_fills_until_would_block() {
        let (_time, sink) = open_sink(100);
        // 100 ms at 1 kHz mono = 100 frames = 200 bytes
        assert_eq!(sink.write(&[0u8; 300]), Ok(200));
        assert_eq!(sink.write(&[0u8; 2]), Err(SinkError::WouldBlock));
    }

    #[test]
    fn test_playing_frees_room() {
        let (time, sink) = open_sink(100);
        sink.write(&[0u8; 200]).unwrap();
        sink.start().unwrap();
        time.advance(40_000);
        assert_eq!(sink.played_frames(), Ok(40));
        assert_eq!(sink.write(&[0u8; 200]), Ok(80));
        assert_eq!(pending_playout_us(&sink, sink.frames_written()), 100_000);
    }

    #[test]
    fn test_pause_freezes_playout() {
        let (time, sink) = open_sink(100);
        sink.write(&[0u8; 200]).unwrap();
        sink.start().unwrap();
        time.advance(10_000);
        sink.pause();
        time.advance(50_000);
        assert_eq!(sink.played_frames(), Ok(10));
        assert!(!sink.is_stopped());
    }

    #[test]
    fn test_stop_resets_counters() {
        let (time, sink) = open_sink(100);
        sink.write(&[0u8; 20]).unwrap();
        sink.start().unwrap();
        time.advance(5_000);
        sink.stop();
        assert!(sink.is_stopped());
        assert_eq!(sink.frames_written(), 0);
        assert_eq!(sink.played_frames(), Ok(0));
    }

    #[test]
    fn test_injected_failure() {
        let (_time, sink) = open_sink(100);
        sink.inject_failure(Some("unplugged".into()));
        assert!(matches!(sink.write(&[0u8; 2]), Err(SinkError::Device(_))));
        assert!(sink.start().is_err());
    }

    #[test]
    fn test_closed_sink_rejects_writes() {
        let time = Arc::new(ManualTime::new(0));
        let sink = SimulatedAudioSink::new(time, 100, true);
        assert!(!sink.ready());
        assert_eq!(sink.write(&[0u8; 4]), Err(SinkError::NotOpen));
    }
}
