//! Controller logic
//!
//! Decoder lifecycle, flush/shutdown coordination and the deferred action
//! queue. Every handler runs on the controller actor; nothing here blocks
//! except awaiting a renderer reply for settings requests.

use super::{ControllerMessage, ControllerOptions};
use crate::error::{Error, Result};
use crate::playback::captions::CaptionTracks;
use crate::playback::clock::MediaClock;
use crate::playback::decoder::{
    Decoder, DecoderContext, DecoderFactory, DecoderNotification, DecoderNotifier, DecoderParameters,
};
use crate::playback::deferred::{DeferredAction, DeferredQueue};
use crate::playback::flush::{ErrorAction, FlushProgress, FlushSide, FlushState};
use crate::playback::looper::{Outbox, Scheduled};
use crate::playback::renderer::{RendererConfig, RendererHandle, RendererNotification, RendererNotifier};
use crate::playback::sink::AudioSink;
use crate::playback::source::{Source, SourceNotification, SourceNotifier};
use crate::playback::surface::SurfaceHandle;
use crate::playback::types::{
    AudioTearDownReason, FinalResult, FlushCommand, MediaError, MediaFormat, MediaStatus, PerStream,
    PlaybackSettings, SourceFlags, StreamKind, SyncSettings, TrackInfo, TrackType,
};
use crate::state::{PlaybackState, SessionState};
use mpe_common::events::{InfoKind, MediaErrorKind, PlayerEvent};
use mpe_common::time::{ms_to_us, us_to_duration};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type DecoderSlot = Option<Arc<dyn Decoder>>;

pub struct ControllerCore {
    session_id: Uuid,
    state: Arc<SessionState>,
    options: ControllerOptions,
    clock: Arc<MediaClock>,
    factory: Arc<dyn DecoderFactory>,
    tx: mpsc::UnboundedSender<ControllerMessage>,
    outbox: Outbox<ControllerMessage>,

    source: Option<Arc<dyn Source>>,
    source_slot: Arc<Mutex<Option<Arc<dyn Source>>>>,
    source_generation: u64,
    source_flags: SourceFlags,
    source_started: bool,
    preparing: bool,

    surface: Option<SurfaceHandle>,
    audio_sink: Option<Arc<dyn AudioSink>>,

    renderer: Option<RendererHandle>,
    renderer_generation: u64,

    decoders: PerStream<DecoderSlot>,
    decoder_generation: PerStream<u64>,
    /// Decoder already reported an error; its error EOS is not re-reported
    decoder_failed: PerStream<bool>,

    flush: FlushState,
    deferred: DeferredQueue,

    scan_generation: u64,
    scan_pending: bool,
    poll_duration_generation: u64,
    timed_text_generation: u64,

    prepared: bool,
    started: bool,
    paused: bool,
    paused_by_client: bool,
    paused_for_buffering: bool,
    resetting: bool,
    resume_pending: bool,

    eos: PerStream<bool>,
    completion_notified: bool,
    previous_seek_us: i64,

    playback_settings: PlaybackSettings,
    sync_settings: SyncSettings,
    video_fps_hint: f32,

    captions: CaptionTracks,
}

impl ControllerCore {
    pub fn new(
        options: ControllerOptions,
        state: Arc<SessionState>,
        clock: Arc<MediaClock>,
        factory: Arc<dyn DecoderFactory>,
        source_slot: Arc<Mutex<Option<Arc<dyn Source>>>>,
        tx: mpsc::UnboundedSender<ControllerMessage>,
    ) -> Self {
        Self {
            session_id: state.session_id(),
            state,
            options,
            clock,
            factory,
            tx,
            outbox: Outbox::default(),
            source: None,
            source_slot,
            source_generation: 0,
            source_flags: SourceFlags::empty(),
            source_started: false,
            preparing: false,
            surface: None,
            audio_sink: None,
            renderer: None,
            renderer_generation: 0,
            decoders: PerStream::new(None, None),
            decoder_generation: PerStream::new(0, 0),
            decoder_failed: PerStream::new(false, false),
            flush: FlushState::default(),
            deferred: DeferredQueue::new(),
            scan_generation: 0,
            scan_pending: false,
            poll_duration_generation: 0,
            timed_text_generation: 0,
            prepared: false,
            started: false,
            paused: false,
            paused_by_client: false,
            paused_for_buffering: false,
            resetting: false,
            resume_pending: false,
            eos: PerStream::new(false, false),
            completion_notified: false,
            previous_seek_us: 0,
            playback_settings: PlaybackSettings::default(),
            sync_settings: SyncSettings::default(),
            video_fps_hint: -1.0,
            captions: CaptionTracks::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn take_scheduled(&mut self) -> Vec<Scheduled<ControllerMessage>> {
        self.outbox.take()
    }

    pub async fn handle(&mut self, message: ControllerMessage) -> Result<()> {
        match message {
            ControllerMessage::SetDataSource { source, reply } => {
                let _ = reply.send(self.on_set_data_source(source));
            }
            ControllerMessage::Prepare => self.on_prepare(),
            ControllerMessage::SetSurface(surface) => self.on_set_surface(surface)?,
            ControllerMessage::SetAudioSink(sink) => {
                debug!(session_id = %self.session_id, "audio sink {}", if sink.is_some() { "attached" } else { "detached" });
                self.audio_sink = sink;
            }
            ControllerMessage::Start => {
                if self.started {
                    if !self.paused_for_buffering {
                        self.on_resume();
                    }
                } else {
                    self.on_start(None);
                }
                self.paused_by_client = false;
            }
            ControllerMessage::Pause => {
                self.on_pause();
                self.paused_by_client = true;
            }
            ControllerMessage::Resume => {
                if !self.started {
                    debug!(session_id = %self.session_id, "resume before start ignored");
                } else if !self.paused_for_buffering {
                    self.on_resume();
                }
                self.paused_by_client = false;
            }
            ControllerMessage::Seek { time_us, notify } => self.on_seek(time_us, notify)?,
            ControllerMessage::Reset => {
                info!(session_id = %self.session_id, "reset requested");
                self.resetting = true;
                self.deferred.push(DeferredAction::FlushDecoders {
                    audio: FlushCommand::Shutdown,
                    video: FlushCommand::Shutdown,
                });
                self.deferred.push(DeferredAction::Reset);
                self.process_deferred()?;
            }
            ControllerMessage::SelectTrack {
                index,
                select,
                time_us,
                reply,
            } => {
                let _ = reply.send(self.on_select_track(index, select, time_us));
            }
            ControllerMessage::GetTrackInfo { reply } => {
                let _ = reply.send(Ok(self.track_info()));
            }
            ControllerMessage::GetSelectedTrack { track_type, reply } => {
                let _ = reply.send(self.selected_track(track_type));
            }
            ControllerMessage::SetPlaybackSettings { settings, reply } => {
                let _ = reply.send(self.on_set_playback_settings(settings).await);
            }
            ControllerMessage::GetPlaybackSettings { reply } => {
                let _ = reply.send(self.on_get_playback_settings().await);
            }
            ControllerMessage::SetSyncSettings {
                settings,
                video_fps_hint,
                reply,
            } => {
                let _ = reply.send(self.on_set_sync_settings(settings, video_fps_hint).await);
            }
            ControllerMessage::GetSyncSettings { reply } => {
                let _ = reply.send(self.on_get_sync_settings().await);
            }
            ControllerMessage::GetFlushStatus { reply } => {
                let _ = reply.send(PerStream::new(
                    self.flush.status(StreamKind::Audio),
                    self.flush.status(StreamKind::Video),
                ));
            }
            ControllerMessage::ScanSources { generation } => self.on_scan_sources(generation),
            ControllerMessage::PollDuration { generation } => self.on_poll_duration(generation),
            ControllerMessage::TimedText {
                generation,
                time_us,
                text,
            } => self.on_timed_text(generation, time_us, text),
            ControllerMessage::Source {
                generation,
                notification,
            } => {
                if generation != self.source_generation {
                    debug!(session_id = %self.session_id, "dropping stale source notification");
                    return Ok(());
                }
                self.on_source_notify(notification)?;
            }
            ControllerMessage::Decoder {
                stream,
                generation,
                notification,
            } => {
                if generation != *self.decoder_generation.get(stream) {
                    debug!(
                        session_id = %self.session_id,
                        "dropping stale {} decoder notification {:?}", stream, notification
                    );
                    return Ok(());
                }
                self.on_decoder_notify(stream, notification)?;
            }
            ControllerMessage::Renderer {
                generation,
                notification,
            } => {
                if generation != self.renderer_generation {
                    debug!(session_id = %self.session_id, "dropping stale renderer notification {:?}", notification);
                    return Ok(());
                }
                self.on_renderer_notify(notification)?;
            }
            ControllerMessage::Shutdown => self.shutdown(),
        }
        Ok(())
    }

    // ---- events ----

    fn emit(&self, event: PlayerEvent) {
        self.state.broadcast_event(event);
    }

    fn emit_info(&self, kind: InfoKind, value: i64) {
        self.emit(PlayerEvent::Info {
            session_id: self.session_id,
            kind,
            value,
            timestamp: mpe_common::time::now(),
        });
    }

    fn emit_error(&self, kind: MediaErrorKind, message: impl Into<String>) {
        self.emit(PlayerEvent::PlaybackError {
            session_id: self.session_id,
            kind,
            message: message.into(),
            timestamp: mpe_common::time::now(),
        });
    }

    fn emit_simple(&self, make: fn(Uuid, chrono::DateTime<chrono::Utc>) -> PlayerEvent) {
        self.emit(make(self.session_id, mpe_common::time::now()));
    }

    // ---- commands ----

    fn on_set_data_source(&mut self, source: Arc<dyn Source>) -> Result<()> {
        if self.source.is_some() {
            return Err(Error::InvalidState("data source already set".to_string()));
        }
        self.source_generation += 1;
        *self.source_slot.lock() = Some(source.clone());
        self.source = Some(source);
        self.source_flags = SourceFlags::empty();
        info!(session_id = %self.session_id, "data source set");
        Ok(())
    }

    fn on_prepare(&mut self) {
        if self.preparing {
            debug!(session_id = %self.session_id, "prepare already in progress");
            return;
        }
        let Some(source) = self.source.clone() else {
            warn!(session_id = %self.session_id, "prepare without a data source");
            self.emit(PlayerEvent::Prepared {
                session_id: self.session_id,
                error: Some("no data source".to_string()),
                timestamp: mpe_common::time::now(),
            });
            return;
        };
        self.preparing = true;
        source.prepare_async(SourceNotifier::new(self.tx.clone(), self.source_generation));
    }

    fn on_start(&mut self, start_position_us: Option<i64>) {
        let Some(source) = self.source.clone() else {
            warn!(session_id = %self.session_id, "start without a data source");
            return;
        };
        if !self.source_started {
            self.source_started = true;
            source.start();
        }
        if let Some(position) = start_position_us.filter(|p| *p > 0) {
            self.perform_seek(position);
            // Only video needs a prepared pipeline before the seek lands
            if source.format(StreamKind::Video).is_none() {
                return;
            }
        }

        self.eos = PerStream::new(false, false);
        self.completion_notified = false;
        self.decoder_failed = PerStream::new(false, false);
        self.started = true;
        self.paused = false;

        let audio_format = source.format(StreamKind::Audio);
        let video_format = source.format(StreamKind::Video);
        let sync_on_start = audio_format.is_some()
            && video_format.is_some()
            && self.surface.is_some()
            && self.audio_sink.is_some();

        self.renderer_generation += 1;
        let config = RendererConfig {
            tuning: self.options.tuning.clone(),
            real_time: source.is_real_time() || self.source_flags.contains(SourceFlags::REAL_TIME),
            sync_on_start,
            playback_settings: self.playback_settings,
        };
        let renderer = RendererHandle::spawn(
            config,
            self.clock.clone(),
            self.audio_sink.clone(),
            RendererNotifier::new(self.tx.clone(), self.renderer_generation),
        );
        if let Some(fps) = video_format.as_ref().and_then(|f| f.frame_rate).filter(|f| *f > 0.0) {
            renderer.set_video_frame_rate(fps);
        }
        for stream in StreamKind::ALL {
            if let Some(decoder) = self.decoders.get(stream) {
                decoder.set_renderer(Some(renderer.clone()));
            }
        }
        self.renderer = Some(renderer);
        info!(session_id = %self.session_id, sync_on_start, "playback started");

        self.post_scan_sources();
        self.state.set_playback_state(PlaybackState::Playing);
    }

    fn on_pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        if let Some(source) = &self.source {
            source.pause();
        }
        if let Some(renderer) = &self.renderer {
            renderer.pause();
        }
        if self.started {
            self.state.set_playback_state(PlaybackState::Paused);
        }
    }

    fn on_resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if let Some(source) = &self.source {
            source.resume();
        }
        // Offload teardown while paused leaves audio without a decoder
        if self.audio_decoder_still_needed() && self.decoders.audio.is_none() {
            self.instantiate_decoder(StreamKind::Audio);
        }
        if let Some(renderer) = &self.renderer {
            renderer.resume();
        }
        if self.started {
            self.state.set_playback_state(PlaybackState::Playing);
        }
    }

    fn audio_decoder_still_needed(&self) -> bool {
        self.audio_sink.is_some() && !self.flush.status(StreamKind::Audio).is_shut_down()
    }

    fn on_seek(&mut self, time_us: i64, notify: bool) -> Result<()> {
        info!(session_id = %self.session_id, time_us, notify, "seek requested");
        if !self.started {
            // Seek before start: start there and hold on the first frame
            self.on_start(Some(time_us));
            if self.started {
                self.on_pause();
                self.paused_by_client = true;
            }
            if notify {
                self.emit_simple(|session_id, timestamp| PlayerEvent::SeekComplete { session_id, timestamp });
            }
            return Ok(());
        }
        if self.deferred.push_seek(time_us, notify) {
            debug!(session_id = %self.session_id, "seek coalesced with pending seek");
        }
        self.process_deferred()
    }

    fn on_set_surface(&mut self, surface: Option<SurfaceHandle>) -> Result<()> {
        let has_video_format = self
            .source
            .as_ref()
            .map(|s| s.format(StreamKind::Video).is_some())
            .unwrap_or(false);
        let switched_in_place = match &self.decoders.video {
            Some(decoder) if self.started && has_video_format => decoder.set_video_surface(surface.clone()),
            _ => false,
        };
        if self.source.is_none() || !self.started || !has_video_format || switched_in_place {
            self.perform_set_surface(surface);
            return Ok(());
        }

        // Rebuild the video path around the new surface
        self.deferred.push(DeferredAction::FlushDecoders {
            audio: FlushCommand::Flush,
            video: FlushCommand::Shutdown,
        });
        let rescan = surface.is_some() || self.decoders.audio.is_some();
        self.deferred.push(DeferredAction::SetSurface(surface));
        if rescan {
            if let Ok(position) = self.clock.now_media_us() {
                self.deferred.push(DeferredAction::Seek { time_us: position });
            }
            self.deferred.push(DeferredAction::RescanSources);
        }
        self.deferred.push(DeferredAction::ResumeDecoders { notify: false });
        self.process_deferred()
    }

    fn on_select_track(&mut self, index: usize, select: bool, time_us: i64) -> Result<()> {
        let Some(source) = self.source.clone() else {
            return Err(Error::InvalidState("no data source".to_string()));
        };
        let inband = source.track_count();
        if index < inband {
            source.select_track(index, select, time_us)?;
            let is_timed_text = source
                .track_info(index)
                .map(|t| t.track_type == TrackType::TimedText)
                .unwrap_or(false);
            if !select && is_timed_text {
                self.timed_text_generation += 1;
            }
            return Ok(());
        }
        if index - inband < self.captions.count() {
            return self.captions.select(index - inband, select);
        }
        Err(Error::InvalidTrack(format!("track {} out of range", index)))
    }

    fn track_info(&self) -> Vec<TrackInfo> {
        let mut tracks = Vec::new();
        if let Some(source) = &self.source {
            tracks.extend((0..source.track_count()).filter_map(|i| source.track_info(i)));
        }
        tracks.extend(self.captions.tracks().iter().cloned());
        tracks
    }

    fn selected_track(&self, track_type: TrackType) -> Result<Option<usize>> {
        let Some(source) = &self.source else {
            return Err(Error::InvalidState("no data source".to_string()));
        };
        if let Some(index) = source.selected_track(track_type) {
            return Ok(Some(index));
        }
        if track_type == TrackType::Subtitle {
            return Ok(self.captions.selected().map(|i| source.track_count() + i));
        }
        Ok(None)
    }

    async fn on_set_playback_settings(&mut self, settings: PlaybackSettings) -> Result<()> {
        match &self.renderer {
            Some(renderer) => renderer.set_playback_settings(settings).await?,
            None => settings.validate()?,
        }
        if settings.speed == 0.0 {
            // Keep the running speed for the next resume
            self.on_pause();
            self.paused_by_client = true;
            self.playback_settings.pitch = settings.pitch;
        } else {
            self.playback_settings = settings;
            if self.started {
                if !self.paused_for_buffering {
                    self.on_resume();
                }
            } else if self.prepared {
                self.on_start(None);
            }
            self.paused_by_client = false;
        }
        self.update_video_operating_rate();
        Ok(())
    }

    async fn on_get_playback_settings(&mut self) -> Result<PlaybackSettings> {
        if let Some(renderer) = &self.renderer {
            self.playback_settings = renderer.playback_settings().await?;
        }
        let mut settings = self.playback_settings;
        if self.paused {
            settings.speed = 0.0;
        }
        Ok(settings)
    }

    async fn on_set_sync_settings(&mut self, settings: SyncSettings, video_fps_hint: f32) -> Result<()> {
        match &self.renderer {
            Some(renderer) => renderer.set_sync_settings(settings, video_fps_hint).await?,
            None => settings.validate()?,
        }
        self.sync_settings = settings;
        if video_fps_hint > 0.0 {
            self.video_fps_hint = video_fps_hint;
        }
        Ok(())
    }

    async fn on_get_sync_settings(&mut self) -> Result<(SyncSettings, f32)> {
        if let Some(renderer) = &self.renderer {
            let (settings, fps) = renderer.sync_settings().await?;
            self.sync_settings = settings;
            self.video_fps_hint = fps;
        }
        Ok((self.sync_settings, self.video_fps_hint))
    }

    fn update_video_operating_rate(&self) {
        let Some(decoder) = &self.decoders.video else {
            return;
        };
        let fps = self
            .source
            .as_ref()
            .and_then(|s| s.format(StreamKind::Video))
            .and_then(|f| f.frame_rate)
            .filter(|f| *f > 0.0);
        if let Some(fps) = fps {
            decoder.set_parameters(DecoderParameters {
                operating_rate: Some(fps * self.playback_settings.speed),
            });
        }
    }

    // ---- decoder creation ----

    fn post_scan_sources(&mut self) {
        if self.scan_pending {
            return;
        }
        self.outbox.post(ControllerMessage::ScanSources {
            generation: self.scan_generation,
        });
        self.scan_pending = true;
    }

    fn on_scan_sources(&mut self, generation: u64) {
        if generation != self.scan_generation {
            return;
        }
        self.scan_pending = false;
        let Some(source) = self.source.clone() else {
            return;
        };

        let had_any_decoder = self.decoders.audio.is_some() || self.decoders.video.is_some();
        if self.surface.is_some() {
            self.instantiate_decoder(StreamKind::Video);
        }
        if self.audio_sink.is_some() && self.decoders.audio.is_none() {
            self.instantiate_decoder(StreamKind::Audio);
        }
        let has_any_decoder = self.decoders.audio.is_some() || self.decoders.video.is_some();
        if !had_any_decoder && has_any_decoder && self.source_flags.contains(SourceFlags::DYNAMIC_DURATION) {
            self.schedule_poll_duration();
        }

        match source.feed_more_data() {
            // Nothing buffered yet, or the source was disconnected ahead of a reset
            Ok(()) | Err(MediaStatus::WouldBlock) => {}
            Err(status) => {
                if !has_any_decoder && !self.resetting {
                    match status {
                        MediaStatus::EndOfStream => {
                            info!(session_id = %self.session_id, "source ended before any decoder was created");
                            self.emit_simple(|session_id, timestamp| PlayerEvent::PlaybackComplete {
                                session_id,
                                timestamp,
                            });
                        }
                        MediaStatus::Error(e) => self.emit_error(e.kind, e.message),
                        other => self.emit_error(MediaErrorKind::Source, format!("source stalled: {:?}", other)),
                    }
                }
                return;
            }
        }

        let missing_audio = self.decoders.audio.is_none() && self.audio_sink.is_some();
        let missing_video = self.decoders.video.is_none() && self.surface.is_some();
        if missing_audio || missing_video {
            self.outbox.post_delayed(
                ControllerMessage::ScanSources {
                    generation: self.scan_generation,
                },
                Duration::from_millis(self.options.tuning.scan_sources_retry_ms),
            );
            self.scan_pending = true;
        }
    }

    /// Create the decoder for `stream` if its format is known. Returns false
    /// when the format is not available yet.
    fn instantiate_decoder(&mut self, stream: StreamKind) -> bool {
        if self.decoders.get(stream).is_some() {
            return true;
        }
        if stream.is_audio() && self.flush.status(stream).is_shut_down() {
            // Audio was shut down deliberately; don't bring it back
            return true;
        }
        let Some(source) = self.source.clone() else {
            return false;
        };
        let Some(format) = source.format(stream) else {
            return false;
        };

        *self.decoder_generation.get_mut(stream) += 1;
        let generation = *self.decoder_generation.get(stream);
        if let Some(renderer) = &self.renderer {
            // A fence left by a decoder that shut down mid-flush
            renderer.open_input(stream);
        }
        let context = DecoderContext {
            notifier: DecoderNotifier::new(self.tx.clone(), stream, generation),
            source,
            renderer: self.renderer.clone(),
            surface: if stream.is_audio() { None } else { self.surface.clone() },
            offload_audio: self.options.offload_audio,
        };
        let decoder = match self.factory.create(stream, context) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!(session_id = %self.session_id, "failed to create {} decoder: {}", stream, e);
                self.emit_error(MediaErrorKind::Decoder, e.to_string());
                return false;
            }
        };
        if let Err(e) = decoder.configure(&format) {
            warn!(session_id = %self.session_id, "failed to configure {} decoder: {}", stream, e);
            decoder.initiate_shutdown();
            self.emit_error(MediaErrorKind::Decoder, e.to_string());
            return false;
        }

        *self.decoders.get_mut(stream) = Some(decoder);
        self.flush.get_mut(stream).reset();
        *self.decoder_failed.get_mut(stream) = false;
        info!(session_id = %self.session_id, generation, "{} decoder created for {}", stream, format.mime);
        if !stream.is_audio() {
            self.update_video_operating_rate();
        }
        true
    }

    // ---- deferred actions ----

    fn process_deferred(&mut self) -> Result<()> {
        while !self.deferred.is_empty() {
            if !self.flush.both_idle() {
                debug!(
                    session_id = %self.session_id,
                    "postponing {} deferred actions until flush completes",
                    self.deferred.len()
                );
                break;
            }
            let Some(action) = self.deferred.pop() else {
                break;
            };
            debug!(session_id = %self.session_id, "running deferred {:?}", action);
            self.execute(action)?;
        }
        Ok(())
    }

    fn execute(&mut self, action: DeferredAction) -> Result<()> {
        match action {
            DeferredAction::Seek { time_us } => self.perform_seek(time_us),
            DeferredAction::SetSurface(surface) => self.perform_set_surface(surface),
            DeferredAction::FlushDecoders { audio, video } => self.perform_decoder_flush(audio, video),
            DeferredAction::ResumeDecoders { notify } => self.perform_resume_decoders(notify),
            DeferredAction::PostMessage(reply) => {
                let _ = reply.send(());
            }
            DeferredAction::RescanSources => self.perform_scan_sources(),
            DeferredAction::Reset => self.perform_reset(),
        }
        Ok(())
    }

    fn perform_seek(&mut self, time_us: i64) {
        let Some(source) = self.source.clone() else {
            warn!(session_id = %self.session_id, "seek without a data source");
            return;
        };
        info!(session_id = %self.session_id, time_us, "seeking");
        self.previous_seek_us = time_us;
        if let Err(e) = source.seek_to(time_us) {
            warn!(session_id = %self.session_id, "source seek failed: {}", e);
            self.emit_error(MediaErrorKind::Source, e.to_string());
        }
        self.timed_text_generation += 1;
        self.eos = PerStream::new(false, false);
        self.completion_notified = false;
    }

    fn perform_set_surface(&mut self, surface: Option<SurfaceHandle>) {
        debug!(
            session_id = %self.session_id,
            "surface set to {:?}",
            surface.as_ref().map(|s| s.id())
        );
        self.surface = surface;
        self.emit_simple(|session_id, timestamp| PlayerEvent::SetSurfaceComplete { session_id, timestamp });
    }

    fn perform_decoder_flush(&mut self, audio: FlushCommand, video: FlushCommand) {
        let audio_applies = audio != FlushCommand::None && self.decoders.audio.is_some();
        let video_applies = video != FlushCommand::None && self.decoders.video.is_some();
        if !audio_applies && !video_applies {
            debug!(session_id = %self.session_id, "flush with no decoders to flush");
            return;
        }
        // Re-enter A/V sync only when both streams restart together
        let resync = audio == FlushCommand::Flush
            && video == FlushCommand::Flush
            && self.decoders.audio.is_some()
            && self.decoders.video.is_some();
        if audio_applies {
            self.flush_decoder(StreamKind::Audio, audio == FlushCommand::Shutdown, resync);
        }
        if video_applies {
            self.flush_decoder(StreamKind::Video, video == FlushCommand::Shutdown, resync);
        }
    }

    fn flush_decoder(&mut self, stream: StreamKind, shutdown: bool, resync: bool) {
        let Some(decoder) = self.decoders.get(stream).clone() else {
            return;
        };

        self.scan_generation += 1;
        if self.scan_pending {
            self.deferred.push(DeferredAction::RescanSources);
            self.scan_pending = false;
        }

        if let Some(renderer) = &self.renderer {
            renderer.flush_decoder_output(stream, resync);
        }
        decoder.signal_flush();

        let flush = self.flush.get_mut(stream);
        if !flush.status().is_idle() {
            warn!(session_id = %self.session_id, "{} flush started while {:?}", stream, flush.status());
        }
        flush.begin(shutdown, self.renderer.is_some());
        debug!(session_id = %self.session_id, "{} flush started: {:?}", stream, flush.status());
    }

    fn perform_resume_decoders(&mut self, notify: bool) {
        if notify {
            self.resume_pending = true;
            if self.decoders.video.is_none() {
                self.finish_resume();
            }
        }
        if let Some(decoder) = &self.decoders.video {
            decoder.signal_resume(notify);
        }
        if let Some(decoder) = &self.decoders.audio {
            decoder.signal_resume(false);
        }
    }

    fn finish_resume(&mut self) {
        if self.resume_pending {
            self.resume_pending = false;
            self.emit_simple(|session_id, timestamp| PlayerEvent::SeekComplete { session_id, timestamp });
        }
    }

    fn perform_scan_sources(&mut self) {
        if !self.started {
            return;
        }
        if self.decoders.audio.is_none() || self.decoders.video.is_none() {
            self.post_scan_sources();
        }
    }

    fn perform_reset(&mut self) {
        for stream in StreamKind::ALL {
            if let Some(decoder) = self.decoders.get_mut(stream).take() {
                warn!(session_id = %self.session_id, "{} decoder still alive at reset", stream);
                decoder.initiate_shutdown();
                *self.decoder_generation.get_mut(stream) += 1;
            }
            self.flush.get_mut(stream).reset();
        }

        self.poll_duration_generation += 1;
        self.scan_generation += 1;
        self.scan_pending = false;

        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        self.renderer_generation += 1;
        self.clock.clear_anchor();

        if let Some(source) = self.source.take() {
            source.stop();
        }
        *self.source_slot.lock() = None;
        self.source_generation += 1;
        self.source_flags = SourceFlags::empty();

        self.prepared = false;
        self.started = false;
        self.source_started = false;
        self.preparing = false;
        self.paused = false;
        self.paused_by_client = false;
        self.paused_for_buffering = false;
        self.resetting = false;
        self.resume_pending = false;
        self.captions.clear();

        info!(session_id = %self.session_id, "reset complete");
        self.state.set_playback_state(PlaybackState::Idle);
        self.emit_simple(|session_id, timestamp| PlayerEvent::ResetComplete { session_id, timestamp });
    }

    // ---- flush completion ----

    fn handle_flush_complete(&mut self, stream: StreamKind, side: FlushSide) -> Result<()> {
        let progress = self
            .flush
            .get_mut(stream)
            .record_complete(side)
            .map_err(|e| Error::Internal(e.to_string()))?;
        match progress {
            FlushProgress::Pending => {}
            FlushProgress::Flushed => debug!(session_id = %self.session_id, "{} flushed", stream),
            FlushProgress::InitiateShutdown => {
                info!(session_id = %self.session_id, "initiating {} decoder shutdown", stream);
                if !stream.is_audio() && self.source_flags.contains(SourceFlags::SECURE) {
                    // Secure video buffers belong to the source; release them first
                    if let Some(source) = &self.source {
                        source.stop();
                    }
                    self.source_started = false;
                }
                if let Some(decoder) = self.decoders.get(stream) {
                    decoder.initiate_shutdown();
                }
            }
        }
        Ok(())
    }

    fn finish_flush_if_possible(&mut self) -> Result<()> {
        if !self.flush.finish_if_possible() {
            return Ok(());
        }
        debug!(session_id = %self.session_id, "both streams flushed");
        self.process_deferred()
    }

    // ---- notifications ----

    fn on_source_notify(&mut self, notification: SourceNotification) -> Result<()> {
        match notification {
            SourceNotification::Prepared(result) => {
                self.preparing = false;
                self.prepared = result.is_ok();
                if let Err(e) = &result {
                    warn!(session_id = %self.session_id, "prepare failed: {}", e);
                    self.deferred.push(DeferredAction::FlushDecoders {
                        audio: FlushCommand::Shutdown,
                        video: FlushCommand::Shutdown,
                    });
                    self.process_deferred()?;
                }
                if let Some(duration_us) = self.source.as_ref().and_then(|s| s.duration_us()) {
                    self.emit(PlayerEvent::DurationChanged {
                        session_id: self.session_id,
                        duration_us,
                        timestamp: mpe_common::time::now(),
                    });
                }
                self.emit(PlayerEvent::Prepared {
                    session_id: self.session_id,
                    error: result.as_ref().err().map(|e| e.to_string()),
                    timestamp: mpe_common::time::now(),
                });
                self.state.set_playback_state(match result {
                    Ok(()) => PlaybackState::Prepared,
                    Err(_) => PlaybackState::Error,
                });
            }
            SourceNotification::FlagsChanged(flags) => {
                if !flags.contains(SourceFlags::CAN_SEEK) {
                    self.emit_info(InfoKind::NotSeekable, 0);
                }
                self.emit(PlayerEvent::FlagsChanged {
                    session_id: self.session_id,
                    flags: flags.bits(),
                    timestamp: mpe_common::time::now(),
                });
                let was_dynamic = self.source_flags.contains(SourceFlags::DYNAMIC_DURATION);
                let is_dynamic = flags.contains(SourceFlags::DYNAMIC_DURATION);
                if was_dynamic && !is_dynamic {
                    self.cancel_poll_duration();
                } else if !was_dynamic
                    && is_dynamic
                    && (self.decoders.audio.is_some() || self.decoders.video.is_some())
                {
                    self.schedule_poll_duration();
                }
                self.source_flags = flags;
            }
            SourceNotification::VideoSizeChanged(format) => self.on_video_size_changed(&format),
            SourceNotification::BufferingUpdate { percent } => {
                self.emit(PlayerEvent::BufferingUpdate {
                    session_id: self.session_id,
                    percent,
                    timestamp: mpe_common::time::now(),
                });
            }
            SourceNotification::PauseOnBufferingStart => {
                if self.started {
                    info!(session_id = %self.session_id, "pausing for buffering");
                    self.paused_for_buffering = true;
                    self.on_pause();
                }
                self.emit_info(InfoKind::BufferingStart, 0);
            }
            SourceNotification::BufferingStart => self.emit_info(InfoKind::BufferingStart, 0),
            SourceNotification::ResumeOnBufferingEnd => {
                if self.started {
                    info!(session_id = %self.session_id, "buffering done");
                    self.paused_for_buffering = false;
                    if !self.paused_by_client && !self.resetting {
                        self.on_resume();
                    }
                }
                self.emit_info(InfoKind::BufferingEnd, 0);
            }
            SourceNotification::BufferingEnd => self.emit_info(InfoKind::BufferingEnd, 0),
            SourceNotification::CacheStats { kbps } => self.emit_info(InfoKind::NetworkBandwidth, kbps),
            SourceNotification::SubtitleData {
                track_index,
                time_us,
                duration_us,
                data,
            } => {
                self.emit(PlayerEvent::SubtitleData {
                    session_id: self.session_id,
                    track_index,
                    time_us,
                    duration_us,
                    data,
                    timestamp: mpe_common::time::now(),
                });
            }
            SourceNotification::TimedText { time_us, text } => {
                self.on_timed_text(self.timed_text_generation, time_us, text);
            }
            SourceNotification::TimedMetadata { time_us, data } => {
                self.emit(PlayerEvent::TimedMetadata {
                    session_id: self.session_id,
                    time_us,
                    data,
                    timestamp: mpe_common::time::now(),
                });
            }
            SourceNotification::QueueDecoderShutdown { audio, video, reply } => {
                let command = |shutdown: bool| if shutdown { FlushCommand::Shutdown } else { FlushCommand::None };
                self.deferred.push(DeferredAction::FlushDecoders {
                    audio: command(audio),
                    video: command(video),
                });
                self.deferred.push(DeferredAction::RescanSources);
                self.deferred.push(DeferredAction::PostMessage(reply));
                self.process_deferred()?;
            }
            SourceNotification::DrmNoLicense => {
                self.emit_error(MediaErrorKind::DrmNoLicense, "no license for protected content");
            }
        }
        Ok(())
    }

    fn on_decoder_notify(&mut self, stream: StreamKind, notification: DecoderNotification) -> Result<()> {
        match notification {
            DecoderNotification::InputDiscontinuity { format_change } => {
                info!(session_id = %self.session_id, format_change, "{} input discontinuity", stream);
                if format_change {
                    let (audio, video) = match stream {
                        StreamKind::Audio => (FlushCommand::Shutdown, FlushCommand::None),
                        StreamKind::Video => (FlushCommand::None, FlushCommand::Shutdown),
                    };
                    self.deferred.push(DeferredAction::FlushDecoders { audio, video });
                }
                self.deferred.push(DeferredAction::RescanSources);
                self.process_deferred()?;
            }
            DecoderNotification::Eos(result) => {
                if !self.flush.status(stream).is_idle() {
                    // Sent before the decoder saw the flush
                    debug!(session_id = %self.session_id, "dropping {} EOS from flushed input", stream);
                    return Ok(());
                }
                if let Some(renderer) = &self.renderer {
                    renderer.queue_eos(stream, result);
                }
            }
            DecoderNotification::FlushCompleted => {
                // The decoder has stopped pulling; later posts are fresh
                if let Some(renderer) = &self.renderer {
                    renderer.open_input(stream);
                }
                self.handle_flush_complete(stream, FlushSide::Decoder)?;
                self.finish_flush_if_possible()?;
            }
            DecoderNotification::ShutdownCompleted => {
                info!(session_id = %self.session_id, "{} decoder shutdown completed", stream);
                *self.decoders.get_mut(stream) = None;
                *self.decoder_generation.get_mut(stream) += 1;
                if !stream.is_audio() {
                    self.captions.clear();
                }
                self.flush
                    .get_mut(stream)
                    .on_shutdown_complete()
                    .map_err(|e| Error::Internal(e.to_string()))?;
                self.finish_flush_if_possible()?;
            }
            DecoderNotification::ResumeCompleted => self.finish_resume(),
            DecoderNotification::VideoSizeChanged(format) => self.on_video_size_changed(&format),
            DecoderNotification::Error(err) => self.on_decoder_error(stream, err)?,
            DecoderNotification::CaptionTracks(tracks) => {
                debug!(session_id = %self.session_id, "{} caption tracks", tracks.len());
                self.captions.set_tracks(tracks);
            }
            DecoderNotification::CaptionData {
                caption_index,
                time_us,
                data,
            } => {
                if self.captions.is_selected(caption_index) {
                    let inband = self.source.as_ref().map(|s| s.track_count()).unwrap_or(0);
                    self.emit(PlayerEvent::SubtitleData {
                        session_id: self.session_id,
                        track_index: inband + caption_index,
                        time_us,
                        duration_us: 0,
                        data,
                        timestamp: mpe_common::time::now(),
                    });
                }
            }
        }
        Ok(())
    }

    fn on_decoder_error(&mut self, stream: StreamKind, err: MediaError) -> Result<()> {
        let status = self.flush.status(stream);
        warn!(session_id = %self.session_id, "{} decoder error while {:?}: {}", stream, status, err);
        *self.decoder_failed.get_mut(stream) = true;

        // Let the renderer finish what it has and report the stream as ended
        if let Some(renderer) = &self.renderer {
            renderer.queue_eos(stream, FinalResult::Error(err.clone()));
        }

        match self.flush.get_mut(stream).on_decoder_error() {
            ErrorAction::QueueShutdown => {
                let (audio, video) = match stream {
                    StreamKind::Audio => (FlushCommand::Shutdown, FlushCommand::None),
                    StreamKind::Video => (FlushCommand::None, FlushCommand::Shutdown),
                };
                self.deferred.push(DeferredAction::FlushDecoders { audio, video });
                self.process_deferred()?;
            }
            ErrorAction::ShutdownScheduled | ErrorAction::AlreadyShuttingDown => {}
            ErrorAction::ShutdownNow => {
                if let Some(decoder) = self.decoders.get(stream) {
                    decoder.initiate_shutdown();
                }
            }
            ErrorAction::AlreadyShutDown => self.finish_flush_if_possible()?,
        }

        if !self.resetting {
            let kind = match err.kind {
                MediaErrorKind::BadFrameSize => MediaErrorKind::BadFrameSize,
                _ => MediaErrorKind::Decoder,
            };
            self.emit_error(kind, err.message);
        }
        Ok(())
    }

    fn on_renderer_notify(&mut self, notification: RendererNotification) -> Result<()> {
        match notification {
            RendererNotification::Eos { stream, result } => {
                *self.eos.get_mut(stream) = true;
                match result {
                    FinalResult::EndOfStream => info!(session_id = %self.session_id, "{} reached end of stream", stream),
                    FinalResult::Error(e) => {
                        warn!(session_id = %self.session_id, "{} ended with error: {}", stream, e);
                        if !*self.decoder_failed.get(stream) {
                            self.emit_error(e.kind, e.message);
                        }
                    }
                }
                let audio_done = self.eos.audio || self.decoders.audio.is_none();
                let video_done = self.eos.video || self.decoders.video.is_none();
                if audio_done && video_done && !self.completion_notified {
                    self.completion_notified = true;
                    info!(session_id = %self.session_id, "playback complete");
                    self.emit_simple(|session_id, timestamp| PlayerEvent::PlaybackComplete { session_id, timestamp });
                }
            }
            RendererNotification::FlushComplete(stream) => {
                if self.flush.status(stream).is_quiescent() {
                    // Teardown already settled this stream's flush
                    debug!(session_id = %self.session_id, "late {} renderer flush completion", stream);
                    return Ok(());
                }
                self.handle_flush_complete(stream, FlushSide::Renderer)?;
                self.finish_flush_if_possible()?;
            }
            RendererNotification::VideoRenderingStart => self.emit_info(InfoKind::VideoRenderingStart, 0),
            RendererNotification::MediaRenderingStart => self.emit_info(InfoKind::MediaRenderingStart, 0),
            RendererNotification::AudioTearDown { reason, position_us } => {
                self.on_audio_tear_down(reason, position_us)?;
            }
        }
        Ok(())
    }

    fn on_audio_tear_down(&mut self, reason: AudioTearDownReason, position_us: Option<i64>) -> Result<()> {
        info!(session_id = %self.session_id, ?reason, "audio teardown");
        if let Some(decoder) = self.decoders.audio.take() {
            decoder.initiate_shutdown();
        }
        self.decoder_generation.audio += 1;

        let mut recreate = true;
        if !self.flush.status(StreamKind::Audio).is_quiescent() {
            // Settle the in-flight flush as if the decoder had answered
            recreate = !self.flush.get_mut(StreamKind::Audio).settle_without_decoder();
            self.finish_flush_if_possible()?;
        }

        let Some(renderer) = self.renderer.clone() else {
            return Ok(());
        };
        renderer.close_audio_sink();
        renderer.flush(StreamKind::Audio, false, false);
        if self.decoders.video.is_some() {
            renderer.flush(StreamKind::Video, false, false);
        }

        let position = position_us.unwrap_or(self.previous_seek_us);
        self.perform_seek(position);

        if reason == AudioTearDownReason::SinkError && recreate {
            self.instantiate_decoder(StreamKind::Audio);
        }
        self.emit_info(InfoKind::AudioTearDown, position);
        Ok(())
    }

    fn on_video_size_changed(&self, format: &MediaFormat) {
        self.emit(PlayerEvent::VideoSizeChanged {
            session_id: self.session_id,
            width: format.width,
            height: format.height,
            timestamp: mpe_common::time::now(),
        });
    }

    // ---- timers ----

    fn schedule_poll_duration(&mut self) {
        self.outbox.post(ControllerMessage::PollDuration {
            generation: self.poll_duration_generation,
        });
    }

    fn cancel_poll_duration(&mut self) {
        self.poll_duration_generation += 1;
    }

    fn on_poll_duration(&mut self, generation: u64) {
        if generation != self.poll_duration_generation {
            return;
        }
        if let Some(duration_us) = self.source.as_ref().and_then(|s| s.duration_us()) {
            self.emit(PlayerEvent::DurationChanged {
                session_id: self.session_id,
                duration_us,
                timestamp: mpe_common::time::now(),
            });
        }
        self.outbox.post_delayed(
            ControllerMessage::PollDuration { generation },
            Duration::from_millis(self.options.tuning.duration_poll_interval_ms),
        );
    }

    fn on_timed_text(&mut self, generation: u64, time_us: i64, text: String) {
        if generation != self.timed_text_generation {
            debug!(session_id = %self.session_id, "dropping stale timed text");
            return;
        }
        let position_us = self.clock.now_media_us().unwrap_or(0);
        if position_us < time_us {
            // Not due yet; never wait less than a millisecond to avoid spinning
            let delay = us_to_duration((time_us - position_us).max(ms_to_us(1)));
            self.outbox.post_delayed(
                ControllerMessage::TimedText {
                    generation,
                    time_us,
                    text,
                },
                delay,
            );
            return;
        }
        self.emit(PlayerEvent::TimedText {
            session_id: self.session_id,
            time_us,
            text,
            timestamp: mpe_common::time::now(),
        });
    }

    // ---- teardown ----

    /// Stop everything owned by this controller
    pub fn shutdown(&mut self) {
        debug!(session_id = %self.session_id, "controller shutting down");
        for stream in StreamKind::ALL {
            if let Some(decoder) = self.decoders.get_mut(stream).take() {
                decoder.initiate_shutdown();
            }
        }
        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        if let Some(source) = self.source.take() {
            source.disconnect();
            source.stop();
        }
        *self.source_slot.lock() = None;
    }

    /// Fatal error: report it and stop the session
    pub fn fail(&mut self, error: Error) {
        self.emit_error(MediaErrorKind::Internal, error.to_string());
        self.state.set_playback_state(PlaybackState::Error);
        self.shutdown();
    }
}
