//! Generated audio/video source

use super::SyntheticParams;
use crate::error::{Error, Result};
use crate::playback::source::{Source, SourceNotification, SourceNotifier};
use crate::playback::types::{
    MediaBuffer, MediaError, MediaFormat, MediaStatus, PerStream, SourceFlags, StreamKind, TrackInfo,
    TrackType,
};
use mpe_common::time::{frames_to_us, ms_to_us, us_to_frames};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const AUDIO_MIME: &str = "audio/raw";
const VIDEO_MIME: &str = "video/raw";
const TEXT_MIME: &str = "text/3gpp-tt";
const CUE_INTERVAL_US: i64 = 1_000_000;

#[derive(Debug)]
struct ReadState {
    /// Next audio frame index
    audio_frame: u64,
    /// Next video frame index
    video_frame: u64,
    /// First read after a seek reports a discontinuity
    discontinuity: PerStream<bool>,
    next_cue_us: i64,
    text_selected: bool,
    started: bool,
    paused: bool,
}

pub struct SyntheticSource {
    params: SyntheticParams,
    duration_us: i64,
    tracks: Vec<TrackInfo>,
    flags: SourceFlags,
    notifier: Mutex<Option<SourceNotifier>>,
    state: Mutex<ReadState>,
    disconnected: AtomicBool,
}

impl SyntheticSource {
    pub fn new(params: SyntheticParams) -> Self {
        let mut tracks = Vec::new();
        if params.has_audio {
            tracks.push(TrackInfo::new(TrackType::Audio, AUDIO_MIME, "und"));
        }
        if params.has_video {
            tracks.push(TrackInfo::new(TrackType::Video, VIDEO_MIME, "und"));
        }
        if params.timed_text {
            tracks.push(TrackInfo::new(TrackType::TimedText, TEXT_MIME, "en"));
        }
        Self {
            duration_us: ms_to_us(params.duration_ms as i64),
            params,
            tracks,
            flags: SourceFlags::CAN_PAUSE
                .union(SourceFlags::CAN_SEEK)
                .union(SourceFlags::CAN_SEEK_BACKWARD)
                .union(SourceFlags::CAN_SEEK_FORWARD),
            notifier: Mutex::new(None),
            state: Mutex::new(ReadState {
                audio_frame: 0,
                video_frame: 0,
                discontinuity: PerStream::new(false, false),
                next_cue_us: 0,
                text_selected: false,
                started: false,
                paused: false,
            }),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &SyntheticParams {
        &self.params
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Simulate a network stall: playback holds until [`end_stall`](Self::end_stall)
    pub fn begin_stall(&self) {
        self.notify(SourceNotification::PauseOnBufferingStart);
    }

    pub fn end_stall(&self) {
        self.notify(SourceNotification::ResumeOnBufferingEnd);
    }

    fn has_stream(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Audio => self.params.has_audio,
            StreamKind::Video => self.params.has_video,
        }
    }

    /// The stream that drives timed-text cues
    fn lead_stream(&self) -> StreamKind {
        if self.params.has_video {
            StreamKind::Video
        } else {
            StreamKind::Audio
        }
    }

    fn audio_pts(&self, frame: u64) -> i64 {
        frames_to_us(frame, self.params.sample_rate)
    }

    fn video_pts(&self, frame: u64) -> i64 {
        (frame as f64 * 1_000_000.0 / self.params.video_fps as f64) as i64
    }

    fn notify(&self, notification: SourceNotification) {
        if let Some(notifier) = self.notifier.lock().as_ref() {
            notifier.notify(notification);
        }
    }

    fn emit_cues_up_to(&self, state: &mut ReadState, pts_us: i64) {
        while state.next_cue_us <= pts_us {
            let time_us = state.next_cue_us;
            state.next_cue_us += CUE_INTERVAL_US;
            if state.text_selected {
                self.notify(SourceNotification::TimedText {
                    time_us,
                    text: format!("cue {}", time_us / CUE_INTERVAL_US),
                });
            }
        }
    }
}

impl Source for SyntheticSource {
    fn prepare_async(&self, notifier: SourceNotifier) {
        *self.notifier.lock() = Some(notifier);
        if !self.params.has_audio && !self.params.has_video {
            self.notify(SourceNotification::Prepared(Err(MediaError::source("no streams"))));
            return;
        }
        self.notify(SourceNotification::FlagsChanged(self.flags));
        self.notify(SourceNotification::Prepared(Ok(())));
    }

    fn start(&self) {
        self.state.lock().started = true;
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.started = false;
        state.paused = false;
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn resume(&self) {
        self.state.lock().paused = false;
    }

    fn disconnect(&self) {
        debug!("synthetic source disconnected");
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn dequeue_access_unit(&self, stream: StreamKind) -> std::result::Result<MediaBuffer, MediaStatus> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(MediaStatus::WouldBlock);
        }
        if !self.has_stream(stream) {
            return Err(MediaStatus::EndOfStream);
        }
        let mut state = self.state.lock();
        if !state.started {
            return Err(MediaStatus::WouldBlock);
        }
        if std::mem::take(state.discontinuity.get_mut(stream)) {
            return Err(MediaStatus::Discontinuity { format_change: false });
        }

        let buffer = match stream {
            StreamKind::Audio => {
                let pts_us = self.audio_pts(state.audio_frame);
                if pts_us >= self.duration_us {
                    return Err(MediaStatus::EndOfStream);
                }
                let frames = self.params.audio_frames_per_buffer as usize;
                state.audio_frame += frames as u64;
                MediaBuffer::new(pts_us, vec![0u8; frames * self.params.channels as usize * 2])
            }
            StreamKind::Video => {
                let pts_us = self.video_pts(state.video_frame);
                if pts_us >= self.duration_us {
                    return Err(MediaStatus::EndOfStream);
                }
                let index = state.video_frame;
                state.video_frame += 1;
                MediaBuffer::new(pts_us, index.to_le_bytes().to_vec())
            }
        };
        if stream == self.lead_stream() {
            self.emit_cues_up_to(&mut state, buffer.pts_us);
        }
        Ok(buffer)
    }

    fn format(&self, stream: StreamKind) -> Option<MediaFormat> {
        match stream {
            StreamKind::Audio if self.params.has_audio => {
                let mut format = MediaFormat::audio(AUDIO_MIME, self.params.sample_rate, self.params.channels);
                format.duration_us = Some(self.duration_us);
                Some(format)
            }
            StreamKind::Video if self.params.has_video => {
                let mut format = MediaFormat::video(
                    VIDEO_MIME,
                    self.params.width,
                    self.params.height,
                    Some(self.params.video_fps),
                );
                format.duration_us = Some(self.duration_us);
                format.has_captions = self.params.captions;
                Some(format)
            }
            _ => None,
        }
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.duration_us)
    }

    fn feed_more_data(&self) -> std::result::Result<(), MediaStatus> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(MediaStatus::WouldBlock);
        }
        let state = self.state.lock();
        let audio_left = self.params.has_audio && self.audio_pts(state.audio_frame) < self.duration_us;
        let video_left = self.params.has_video && self.video_pts(state.video_frame) < self.duration_us;
        if audio_left || video_left {
            Ok(())
        } else {
            Err(MediaStatus::EndOfStream)
        }
    }

    fn flags(&self) -> SourceFlags {
        self.flags
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_info(&self, index: usize) -> Option<TrackInfo> {
        self.tracks.get(index).cloned()
    }

    fn selected_track(&self, track_type: TrackType) -> Option<usize> {
        let index = self.tracks.iter().position(|t| t.track_type == track_type)?;
        if track_type == TrackType::TimedText && !self.state.lock().text_selected {
            return None;
        }
        Some(index)
    }

    fn select_track(&self, index: usize, select: bool, _time_us: i64) -> Result<()> {
        let track = self
            .tracks
            .get(index)
            .ok_or_else(|| Error::InvalidTrack(format!("track {} out of range", index)))?;
        match track.track_type {
            TrackType::TimedText => {
                self.state.lock().text_selected = select;
                Ok(())
            }
            _ if select => Ok(()),
            _ => Err(Error::InvalidTrack(format!(
                "{:?} track {} cannot be deselected",
                track.track_type, index
            ))),
        }
    }

    fn seek_to(&self, time_us: i64) -> Result<()> {
        if time_us < 0 {
            return Err(Error::BadValue(format!("seek to {}", time_us)));
        }
        let time_us = time_us.min(self.duration_us);
        let mut state = self.state.lock();
        let frames_per_buffer = self.params.audio_frames_per_buffer.max(1) as u64;
        state.audio_frame = us_to_frames(time_us, self.params.sample_rate) / frames_per_buffer * frames_per_buffer;
        state.video_frame = (time_us as f64 * self.params.video_fps as f64 / 1_000_000.0) as u64;
        state.discontinuity = PerStream::new(self.params.has_audio, self.params.has_video);
        // Next cue at or after the seek point
        state.next_cue_us = (time_us + CUE_INTERVAL_US - 1) / CUE_INTERVAL_US * CUE_INTERVAL_US;
        debug!(time_us, "synthetic source seeked");
        Ok(())
    }
}
