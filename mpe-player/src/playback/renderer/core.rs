//! Renderer logic
//!
//! [`RendererCore`] is the state the renderer actor owns. It is driven one
//! message at a time and never sleeps: drains it wants later are collected
//! in its outbox and delivered by the actor loop.

use super::{RendererConfig, RendererMessage, RendererNotification, RendererNotifier, RendererShared, VideoFrameScheduler};
use crate::config::PlaybackTuning;
use crate::error::{Error, Result};
use crate::playback::clock::{MediaClock, SharedTimeSource};
use crate::playback::looper::{Outbox, Scheduled};
use crate::playback::sink::{self, AudioSink, AudioSinkConfig, SinkError};
use crate::playback::types::{
    AudioTearDownReason, Disposition, FinalResult, MediaBuffer, MediaFormat, PlaybackSettings,
    ReleaseHandle, StreamKind, SyncSettings,
};
use mpe_common::time::{frames_to_us, ms_to_us, us_to_duration};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Video with no audio extends the max media time this far past each frame
const VIDEO_ONLY_MAX_MEDIA_LEAD_US: i64 = 100_000;

/// Re-check interval for video waiting on audio to catch up
const VIDEO_WAIT_FOR_AUDIO_US: i64 = 10_000;

/// Queue-sync progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Queues drain independently
    Off,
    /// Holding both queues until each has a head entry
    Waiting,
    /// Dropping audio older than the first video frame
    TrimAudio { until_us: i64 },
}

enum Payload {
    Buffer {
        buffer: MediaBuffer,
        offset: usize,
        release: ReleaseHandle,
    },
    Eos(FinalResult),
}

struct QueueEntry {
    ordinal: u64,
    payload: Payload,
}

impl QueueEntry {
    fn is_eos(&self) -> bool {
        matches!(self.payload, Payload::Eos(_))
    }

    fn pts_us(&self) -> Option<i64> {
        match &self.payload {
            Payload::Buffer { buffer, .. } => Some(buffer.pts_us),
            Payload::Eos(_) => None,
        }
    }

    fn release(self, disposition: Disposition) {
        if let Payload::Buffer { release, .. } = self.payload {
            release.release(disposition);
        }
    }
}

pub struct RendererCore {
    tuning: PlaybackTuning,
    real_time: bool,
    shared: Arc<RendererShared>,
    clock: Arc<MediaClock>,
    time: SharedTimeSource,
    notifier: RendererNotifier,
    sink: Option<Arc<dyn AudioSink>>,
    scheduler: VideoFrameScheduler,
    outbox: Outbox<RendererMessage>,

    audio_queue: VecDeque<QueueEntry>,
    video_queue: VecDeque<QueueEntry>,
    drain_audio_pending: bool,
    drain_video_pending: bool,
    sync: SyncState,
    paused: bool,
    has_audio: bool,
    next_ordinal: u64,
    last_audio_ordinal_drained: Option<u64>,

    anchor_media_us: i64,
    anchor_frames_written: Option<u64>,
    audio_first_anchor_us: Option<i64>,
    frames_written: u64,
    video_late_by_us: i64,

    video_sample_received: bool,
    video_rendering_started: bool,
    audio_rendering_start_generation: Option<u64>,
    video_rendering_start_generation: Option<u64>,

    audio_eos_generation: u64,
    offload_pause_generation: u64,
    offloading_audio: bool,
    audio_torn_down: bool,

    playback_settings: PlaybackSettings,
    sync_settings: SyncSettings,
    video_fps_hint: f32,
}

impl RendererCore {
    pub fn new(
        config: RendererConfig,
        shared: Arc<RendererShared>,
        clock: Arc<MediaClock>,
        sink: Option<Arc<dyn AudioSink>>,
        notifier: RendererNotifier,
    ) -> Self {
        let time = clock.time_source().clone();
        clock.clear_anchor();
        clock.set_starting_time_media(-1);
        clock.set_playback_rate(config.playback_settings.speed);

        let mut core = Self {
            scheduler: VideoFrameScheduler::new(config.tuning.vsync_refresh_hz),
            tuning: config.tuning,
            real_time: config.real_time,
            shared,
            clock,
            time,
            notifier,
            sink,
            outbox: Outbox::default(),
            audio_queue: VecDeque::new(),
            video_queue: VecDeque::new(),
            drain_audio_pending: false,
            drain_video_pending: false,
            sync: if config.sync_on_start {
                SyncState::Waiting
            } else {
                SyncState::Off
            },
            paused: false,
            has_audio: false,
            next_ordinal: 0,
            last_audio_ordinal_drained: None,
            anchor_media_us: -1,
            anchor_frames_written: None,
            audio_first_anchor_us: None,
            frames_written: 0,
            video_late_by_us: 0,
            video_sample_received: false,
            video_rendering_started: false,
            audio_rendering_start_generation: None,
            video_rendering_start_generation: None,
            audio_eos_generation: 0,
            offload_pause_generation: 0,
            offloading_audio: false,
            audio_torn_down: false,
            playback_settings: config.playback_settings,
            sync_settings: SyncSettings::default(),
            video_fps_hint: -1.0,
        };
        core.prepare_for_media_rendering_start();
        core
    }

    pub fn shared(&self) -> &Arc<RendererShared> {
        &self.shared
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn queued(&self, stream: StreamKind) -> usize {
        self.queue(stream).len()
    }

    /// How late the last rendered video frame was
    pub fn video_late_by_us(&self) -> i64 {
        self.video_late_by_us
    }

    /// Messages to deliver back to this renderer
    pub fn take_scheduled(&mut self) -> Vec<Scheduled<RendererMessage>> {
        self.outbox.take()
    }

    pub fn handle(&mut self, message: RendererMessage) {
        match message {
            RendererMessage::QueueBuffer {
                stream,
                generation,
                buffer,
                release,
            } => self.on_queue_buffer(stream, generation, buffer, release),
            RendererMessage::QueueEos {
                stream,
                generation,
                result,
            } => self.on_queue_eos(stream, generation, result),
            RendererMessage::Flush { stream, resync } => self.on_flush(stream, resync),
            RendererMessage::DrainAudio { generation } => {
                if generation != self.shared.drain_generation(StreamKind::Audio) {
                    return;
                }
                self.drain_audio_pending = false;
                if self.on_drain_audio_queue() {
                    let delay_us = self.audio_reschedule_delay_us();
                    self.post_drain_audio_queue(delay_us);
                }
            }
            RendererMessage::PostDrainVideo { generation } => {
                if generation != self.shared.drain_generation(StreamKind::Video) {
                    return;
                }
                self.drain_video_pending = false;
                self.post_drain_video_queue();
            }
            RendererMessage::DrainVideo { generation } => {
                if generation != self.shared.drain_generation(StreamKind::Video) {
                    return;
                }
                self.drain_video_pending = false;
                self.on_drain_video_queue();
                self.post_drain_video_queue();
            }
            RendererMessage::NotifyAudioEos { generation, result } => {
                if generation == self.audio_eos_generation {
                    self.notifier.notify(RendererNotification::Eos {
                        stream: StreamKind::Audio,
                        result,
                    });
                }
            }
            RendererMessage::OffloadPauseTimeout { generation } => {
                if generation == self.offload_pause_generation && self.paused {
                    self.on_audio_tear_down(AudioTearDownReason::OffloadPauseTimeout);
                }
            }
            RendererMessage::Pause => self.on_pause(),
            RendererMessage::Resume => self.on_resume(),
            RendererMessage::SetVideoFrameRate(fps) => self.scheduler.init(Some(fps)),
            RendererMessage::SetPlaybackSettings { settings, reply } => {
                let _ = reply.send(self.on_set_playback_settings(settings));
            }
            RendererMessage::GetPlaybackSettings { reply } => {
                let _ = reply.send(Ok(self.playback_settings));
            }
            RendererMessage::SetSyncSettings {
                settings,
                video_fps_hint,
                reply,
            } => {
                let _ = reply.send(self.on_set_sync_settings(settings, video_fps_hint));
            }
            RendererMessage::GetSyncSettings { reply } => {
                let _ = reply.send(Ok((self.sync_settings, self.video_fps_hint)));
            }
            RendererMessage::OpenAudioSink {
                format,
                offload,
                reply,
            } => {
                let _ = reply.send(self.on_open_audio_sink(&format, offload));
            }
            RendererMessage::CloseAudioSink => self.on_close_audio_sink(),
            RendererMessage::Shutdown => self.on_shutdown(),
        }
    }

    fn queue(&self, stream: StreamKind) -> &VecDeque<QueueEntry> {
        match stream {
            StreamKind::Audio => &self.audio_queue,
            StreamKind::Video => &self.video_queue,
        }
    }

    fn queue_mut(&mut self, stream: StreamKind) -> &mut VecDeque<QueueEntry> {
        match stream {
            StreamKind::Audio => &mut self.audio_queue,
            StreamKind::Video => &mut self.video_queue,
        }
    }

    fn update_queue_depth(&self, stream: StreamKind) {
        self.shared.set_queued(stream, self.queue(stream).len());
    }

    fn ready_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.sink.clone().filter(|sink| sink.ready())
    }

    // ---- queueing ----

    fn on_queue_buffer(&mut self, stream: StreamKind, generation: u64, buffer: MediaBuffer, release: ReleaseHandle) {
        if generation != self.shared.queue_generation(stream) {
            debug!("dropping stale {} buffer at {}us", stream, buffer.pts_us);
            release.release(Disposition::Discarded);
            return;
        }

        if stream.is_audio() {
            self.has_audio = true;
        }
        self.shared.set_has_stream(stream);

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.queue_mut(stream).push_back(QueueEntry {
            ordinal,
            payload: Payload::Buffer {
                buffer,
                offset: 0,
                release,
            },
        });
        self.update_queue_depth(stream);

        self.sync_queues();
        self.post_drain(stream);
    }

    fn on_queue_eos(&mut self, stream: StreamKind, generation: u64, result: FinalResult) {
        if generation != self.shared.queue_generation(stream) {
            return;
        }

        if self.sync != SyncState::Off && self.queue(stream).is_empty() {
            // Nothing will ever arrive to pair with the other queue
            self.sync_queues_done();
        }

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.queue_mut(stream).push_back(QueueEntry {
            ordinal,
            payload: Payload::Eos(result),
        });
        self.update_queue_depth(stream);

        self.sync_queues();
        self.post_drain(stream);
    }

    fn post_drain(&mut self, stream: StreamKind) {
        match stream {
            StreamKind::Audio => self.post_drain_audio_queue(0),
            StreamKind::Video => self.post_drain_video_queue(),
        }
    }

    // ---- start-up synchronisation ----

    fn sync_queues(&mut self) {
        let until_us = match self.sync {
            SyncState::Off => return,
            SyncState::TrimAudio { until_us } => until_us,
            SyncState::Waiting => {
                let (Some(audio), Some(video)) = (self.audio_queue.front(), self.video_queue.front()) else {
                    return;
                };
                let (Some(audio_us), Some(video_us)) = (audio.pts_us(), video.pts_us()) else {
                    self.sync_queues_done();
                    return;
                };

                let gap_us = video_us - audio_us;
                if gap_us <= self.tuning.sync_gap_threshold_us() {
                    self.sync_queues_done();
                    return;
                }
                info!(
                    "audio leads video by {}us at start, dropping audio before {}us",
                    gap_us, video_us
                );
                self.sync = SyncState::TrimAudio { until_us: video_us };
                video_us
            }
        };

        if self.trim_audio_before(until_us) {
            self.sync_queues_done();
        }
    }

    /// Drop leading audio older than `until_us`. True once the audio head is
    /// at or past `until_us` (or end of stream).
    fn trim_audio_before(&mut self, until_us: i64) -> bool {
        let mut reached = false;
        while let Some(front) = self.audio_queue.front() {
            if front.pts_us().map_or(true, |pts| pts >= until_us) {
                reached = true;
                break;
            }
            if let Some(entry) = self.audio_queue.pop_front() {
                entry.release(Disposition::Discarded);
            }
        }
        self.update_queue_depth(StreamKind::Audio);
        reached
    }

    fn sync_queues_done(&mut self) {
        if self.sync == SyncState::Off {
            return;
        }
        self.sync = SyncState::Off;
        self.post_drain_audio_queue(0);
        self.post_drain_video_queue();
    }

    // ---- audio ----

    fn post_drain_audio_queue(&mut self, delay_us: i64) {
        if self.drain_audio_pending || self.sync != SyncState::Off || self.paused || self.audio_queue.is_empty() {
            return;
        }
        self.drain_audio_pending = true;
        let generation = self.shared.drain_generation(StreamKind::Audio);
        self.outbox
            .post_delayed(RendererMessage::DrainAudio { generation }, us_to_duration(delay_us));
    }

    /// Write as much queued audio as the device takes. Returns whether
    /// another drain should be scheduled.
    fn on_drain_audio_queue(&mut self) -> bool {
        let Some(sink) = self.ready_sink() else {
            self.drain_audio_queue_until_last_eos();
            return false;
        };

        let frame_size = sink.frame_size().max(1);
        let frames_before = self.frames_written;
        let mut failed: Option<SinkError> = None;

        while let Some(front) = self.audio_queue.front() {
            if front.is_eos() {
                if let Some(QueueEntry {
                    payload: Payload::Eos(result),
                    ..
                }) = self.audio_queue.pop_front()
                {
                    self.update_queue_depth(StreamKind::Audio);
                    self.on_audio_eos(sink.as_ref(), result);
                }
                return false;
            }

            let (pts_us, offset) = match &front.payload {
                Payload::Buffer { buffer, offset, .. } => (buffer.pts_us, *offset),
                Payload::Eos(_) => break,
            };
            if offset == 0 {
                self.on_new_audio_media_time(sink.as_ref(), pts_us);
            }

            let outcome = match self.audio_queue.front() {
                Some(QueueEntry {
                    payload: Payload::Buffer { buffer, offset, .. },
                    ..
                }) => {
                    let remaining = &buffer.data[*offset..];
                    let usable = remaining.len() - remaining.len() % frame_size;
                    if usable == 0 {
                        Ok((0, 0))
                    } else {
                        sink.write(&remaining[..usable]).map(|written| (written, usable))
                    }
                }
                _ => break,
            };

            match outcome {
                Ok((written, requested)) => {
                    let mut done = false;
                    if let Some(QueueEntry {
                        payload: Payload::Buffer { buffer, offset, .. },
                        ..
                    }) = self.audio_queue.front_mut()
                    {
                        *offset += written;
                        done = buffer.data.len() - *offset < frame_size;
                    }
                    if done {
                        if let Some(entry) = self.audio_queue.pop_front() {
                            self.last_audio_ordinal_drained = Some(entry.ordinal);
                            entry.release(Disposition::Written);
                        }
                    }

                    self.frames_written += (written / frame_size) as u64;
                    if written > 0 {
                        self.notify_if_media_rendering_started();
                    }
                    if written < requested {
                        break;
                    }
                }
                Err(SinkError::WouldBlock) => break,
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
        self.update_queue_depth(StreamKind::Audio);

        if let Some(e) = failed {
            warn!("audio sink write failed: {}", e);
            self.on_audio_tear_down(AudioTearDownReason::SinkError);
            return false;
        }

        if let Some(anchor_frames) = self.anchor_frames_written {
            if self.anchor_media_us >= 0 {
                let played_ahead_us =
                    frames_to_us(self.frames_written.saturating_sub(anchor_frames), sink.sample_rate());
                self.clock.update_max_media_time(self.anchor_media_us + played_ahead_us);
            }
        }

        !self.audio_queue.is_empty() && (!self.paused || frames_before != self.frames_written)
    }

    /// EOS goes up once everything written is estimated to have played
    fn on_audio_eos(&mut self, sink: &dyn AudioSink, result: FinalResult) {
        let delay_us = self.pending_playout_us(sink);
        self.notify_audio_eos(result, delay_us);
        // An offloaded device keeps playing out what it holds
        if sink.needs_trailing_padding() {
            sink.stop();
            self.frames_written = 0;
        }
    }

    fn notify_audio_eos(&mut self, result: FinalResult, delay_us: i64) {
        if delay_us > 0 {
            self.outbox.post_delayed(
                RendererMessage::NotifyAudioEos {
                    generation: self.audio_eos_generation,
                    result,
                },
                us_to_duration(delay_us),
            );
        } else {
            self.notifier.notify(RendererNotification::Eos {
                stream: StreamKind::Audio,
                result,
            });
        }
    }

    /// Without a device, discard through the last end-of-stream so the
    /// stream still completes
    fn drain_audio_queue_until_last_eos(&mut self) {
        let Some(last_eos) = self.audio_queue.iter().rposition(QueueEntry::is_eos) else {
            return;
        };
        let drained: Vec<QueueEntry> = self.audio_queue.drain(..=last_eos).collect();
        self.update_queue_depth(StreamKind::Audio);
        for entry in drained {
            match entry.payload {
                Payload::Eos(result) => self.notify_audio_eos(result, 0),
                Payload::Buffer { release, .. } => release.release(Disposition::Discarded),
            }
        }
    }

    fn on_new_audio_media_time(&mut self, sink: &dyn AudioSink, media_us: i64) {
        if media_us == self.anchor_media_us {
            return;
        }
        if self.audio_first_anchor_us.is_none() {
            self.audio_first_anchor_us = Some(media_us);
            self.clock.set_starting_time_media(media_us);
        }

        let now_us = self.time.now_us();
        let now_media_us = media_us - self.pending_playout_us(sink);
        self.clock.update_anchor(now_media_us, now_us, media_us);
        self.anchor_frames_written = Some(self.frames_written);
        self.anchor_media_us = media_us;
    }

    fn pending_playout_us(&self, sink: &dyn AudioSink) -> i64 {
        sink::pending_playout_us(sink, self.frames_written)
    }

    fn audio_reschedule_delay_us(&self) -> i64 {
        let Some(sink) = self.ready_sink() else {
            return 0;
        };
        let mut delay_us = self.pending_playout_us(sink.as_ref()) as f64;
        let speed = self.playback_settings.speed as f64;
        if speed > 1.0 {
            delay_us /= speed;
        }
        (delay_us / 2.0) as i64
    }

    fn on_audio_tear_down(&mut self, reason: AudioTearDownReason) {
        if self.audio_torn_down {
            return;
        }
        self.audio_torn_down = true;

        let position_us = self.clock.now_media_us().ok();
        if let Some(sink) = &self.sink {
            sink.stop();
            sink.flush();
        }
        warn!("audio torn down ({:?}) at {:?}us", reason, position_us);
        self.notifier
            .notify(RendererNotification::AudioTearDown { reason, position_us });
    }

    fn on_open_audio_sink(&mut self, format: &MediaFormat, offload: bool) -> Result<bool> {
        let Some(sink) = self.sink.clone() else {
            return Err(Error::InvalidState("no audio sink bound".to_string()));
        };
        if sink.ready() {
            sink.close();
        }

        let offloaded = sink.open(&AudioSinkConfig {
            sample_rate: format.sample_rate,
            channels: format.channels,
            offload,
        })?;
        self.offloading_audio = offloaded;
        self.audio_torn_down = false;
        self.frames_written = 0;
        self.anchor_frames_written = None;

        if let Err(e) = sink.set_playback_settings(&self.playback_settings) {
            debug!("sink rejected playback settings: {}", e);
        }
        if !self.paused {
            sink.start()?;
        }
        info!(
            "audio sink opened: {} Hz, {} ch, offload={}",
            format.sample_rate, format.channels, offloaded
        );
        Ok(offloaded)
    }

    fn on_close_audio_sink(&mut self) {
        if let Some(sink) = &self.sink {
            sink.close();
        }
        self.frames_written = 0;
        self.anchor_frames_written = None;
        self.offloading_audio = false;
    }

    // ---- video ----

    fn post_drain_video_queue(&mut self) {
        if self.drain_video_pending
            || self.sync != SyncState::Off
            || (self.paused && self.video_sample_received)
        {
            return;
        }
        let Some(entry) = self.video_queue.front() else {
            return;
        };
        let generation = self.shared.drain_generation(StreamKind::Video);

        let Some(media_us) = entry.pts_us() else {
            self.drain_video_pending = true;
            self.outbox.post(RendererMessage::DrainVideo { generation });
            return;
        };
        let ordinal = entry.ordinal;

        let now_us = self.time.now_us();
        let real_us = if self.real_time {
            media_us
        } else if self.anchor_media_us < 0 {
            self.clock.update_anchor(media_us, now_us, media_us);
            self.anchor_media_us = media_us;
            now_us
        } else {
            self.clock.real_time_for(media_us)
        };

        if !self.has_audio {
            self.clock
                .update_max_media_time(media_us + VIDEO_ONLY_MAX_MEDIA_LEAD_US);
        }

        let reevaluate_us = self.tuning.video_reevaluate_gap_us();
        if real_us - now_us > reevaluate_us {
            let audio_behind = self.has_audio
                && self
                    .last_audio_ordinal_drained
                    .map_or(true, |drained| drained < ordinal);
            let delay_us = if audio_behind {
                VIDEO_WAIT_FOR_AUDIO_US
            } else {
                reevaluate_us
            };
            self.drain_video_pending = true;
            self.outbox
                .post_delayed(RendererMessage::PostDrainVideo { generation }, us_to_duration(delay_us));
            self.scheduler.restart();
            return;
        }

        let target_us = self.scheduler.schedule(real_us);
        let delay_us = target_us - now_us - 2 * self.scheduler.vsync_period_us();
        self.drain_video_pending = true;
        self.outbox
            .post_delayed(RendererMessage::DrainVideo { generation }, us_to_duration(delay_us));
    }

    fn on_drain_video_queue(&mut self) {
        let Some(entry) = self.video_queue.pop_front() else {
            return;
        };
        self.update_queue_depth(StreamKind::Video);

        let (buffer, release) = match entry.payload {
            Payload::Eos(result) => {
                self.video_late_by_us = 0;
                self.notifier.notify(RendererNotification::Eos {
                    stream: StreamKind::Video,
                    result,
                });
                return;
            }
            Payload::Buffer { buffer, release, .. } => (buffer, release),
        };

        let now_us = self.time.now_us();
        let real_us = if self.real_time {
            buffer.pts_us
        } else {
            self.clock.real_time_for(buffer.pts_us)
        };

        let mut too_late = false;
        if self.paused {
            self.video_late_by_us = 0;
            if !self.video_sample_received && !self.has_audio {
                // A preview frame must not anchor the clock; resume may be
                // arbitrarily far away
                self.clock.clear_anchor();
                self.anchor_media_us = -1;
            }
        } else {
            self.video_late_by_us = now_us - real_us;
            too_late = self.video_late_by_us > self.tuning.late_frame_threshold_us();
            if too_late {
                debug!(
                    "video late by {}us, dropping frame at {}us",
                    self.video_late_by_us, buffer.pts_us
                );
            }
        }

        release.release(if too_late {
            Disposition::Late
        } else {
            Disposition::Rendered { render_time_us: real_us }
        });

        self.video_sample_received = true;
        if !self.paused {
            if !self.video_rendering_started {
                self.video_rendering_started = true;
                self.notifier.notify(RendererNotification::VideoRenderingStart);
            }
            self.notify_if_media_rendering_started();
        }
    }

    // ---- rendering start ----

    fn prepare_for_media_rendering_start(&mut self) {
        self.audio_rendering_start_generation = Some(self.shared.drain_generation(StreamKind::Audio));
        self.video_rendering_start_generation = Some(self.shared.drain_generation(StreamKind::Video));
    }

    fn notify_if_media_rendering_started(&mut self) {
        let audio_current =
            self.audio_rendering_start_generation == Some(self.shared.drain_generation(StreamKind::Audio));
        let video_current =
            self.video_rendering_start_generation == Some(self.shared.drain_generation(StreamKind::Video));
        if audio_current && video_current {
            self.audio_rendering_start_generation = None;
            self.video_rendering_start_generation = None;
            self.notifier.notify(RendererNotification::MediaRenderingStart);
        }
    }

    // ---- flush / pause / resume ----

    fn on_flush(&mut self, stream: StreamKind, resync: bool) {
        let notify_complete = self.shared.take_notify_complete(stream);

        let flushed: Vec<QueueEntry> = self.queue_mut(stream).drain(..).collect();
        for entry in flushed {
            entry.release(Disposition::Discarded);
        }
        self.update_queue_depth(stream);

        if resync {
            self.sync = SyncState::Waiting;
        } else {
            self.sync_queues_done();
        }

        self.anchor_media_us = -1;
        self.anchor_frames_written = None;
        self.clock.clear_anchor();

        match stream {
            StreamKind::Audio => {
                self.drain_audio_pending = false;
                self.audio_eos_generation += 1;
                self.audio_first_anchor_us = None;
                self.clock.set_starting_time_media(-1);
                self.last_audio_ordinal_drained = None;
                self.prepare_for_media_rendering_start();

                if let Some(sink) = self.ready_sink() {
                    sink.pause();
                    sink.flush();
                    sink.stop();
                    if !self.paused {
                        if let Err(e) = sink.start() {
                            warn!("audio sink restart after flush failed: {}", e);
                            self.on_audio_tear_down(AudioTearDownReason::SinkError);
                        }
                    }
                }
                self.frames_written = 0;
            }
            StreamKind::Video => {
                self.drain_video_pending = false;
                self.scheduler.restart();
                self.video_rendering_started = false;
                self.prepare_for_media_rendering_start();
            }
        }
        self.video_sample_received = false;

        debug!("{} flushed (resync={})", stream, resync);
        if notify_complete {
            self.notifier.notify(RendererNotification::FlushComplete(stream));
        }
    }

    fn on_pause(&mut self) {
        if self.paused {
            return;
        }
        self.shared.bump_drain_generation(StreamKind::Audio);
        self.shared.bump_drain_generation(StreamKind::Video);
        self.drain_audio_pending = false;
        self.drain_video_pending = false;
        self.prepare_for_media_rendering_start();

        self.paused = true;
        self.clock.set_playback_rate(0.0);

        if let Some(sink) = self.ready_sink() {
            sink.pause();
            if self.offloading_audio {
                self.offload_pause_generation += 1;
                let timeout_us = ms_to_us(self.tuning.offload_pause_timeout_ms as i64);
                self.outbox.post_delayed(
                    RendererMessage::OffloadPauseTimeout {
                        generation: self.offload_pause_generation,
                    },
                    us_to_duration(timeout_us),
                );
            }
        }
        debug!(
            "renderer paused: audio queued {}, video queued {}",
            self.audio_queue.len(),
            self.video_queue.len()
        );
    }

    fn on_resume(&mut self) {
        if !self.paused {
            return;
        }
        self.offload_pause_generation += 1;

        if let Some(sink) = self.ready_sink() {
            if !self.offloading_audio || sink.is_stopped() {
                if let Err(e) = sink.start() {
                    warn!("audio sink start on resume failed: {}", e);
                    self.on_audio_tear_down(AudioTearDownReason::SinkError);
                }
            }
        }

        self.paused = false;
        self.clock.set_playback_rate(self.playback_settings.speed);
        self.post_drain_audio_queue(0);
        self.post_drain_video_queue();
    }

    // ---- settings ----

    fn on_set_playback_settings(&mut self, settings: PlaybackSettings) -> Result<()> {
        settings.validate()?;
        if settings.speed == 0.0 {
            // Speed zero means pause; the last non-zero speed is kept
            self.on_pause();
            return Ok(());
        }

        if let Some(sink) = self.ready_sink() {
            sink.set_playback_settings(&settings)?;
        }
        self.playback_settings = settings;
        if !self.paused {
            self.clock.set_playback_rate(settings.speed);
        }
        Ok(())
    }

    fn on_set_sync_settings(&mut self, settings: SyncSettings, video_fps_hint: f32) -> Result<()> {
        settings.validate()?;
        self.sync_settings = settings;
        if video_fps_hint > 0.0 {
            self.video_fps_hint = video_fps_hint;
            self.scheduler.init(Some(video_fps_hint));
        }
        Ok(())
    }

    fn on_shutdown(&mut self) {
        for stream in StreamKind::ALL {
            let entries: Vec<QueueEntry> = self.queue_mut(stream).drain(..).collect();
            for entry in entries {
                entry.release(Disposition::Discarded);
            }
            self.update_queue_depth(stream);
        }
        if let Some(sink) = &self.sink {
            sink.stop();
            sink.close();
        }
        debug!("renderer shut down");
    }
}

impl std::fmt::Debug for RendererCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererCore")
            .field("audio_queued", &self.audio_queue.len())
            .field("video_queued", &self.video_queue.len())
            .field("sync", &self.sync)
            .field("paused", &self.paused)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}
