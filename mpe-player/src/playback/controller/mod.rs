//! Controller actor
//!
//! The controller is the single owner of a session's playback pipeline. All
//! commands and all notifications from the source, the decoders and the
//! renderer are serialized through one mailbox and handled by
//! [`ControllerCore`]. [`PlayerController`] is the cloneable front handed to
//! the session manager and the HTTP layer.

mod core;

pub use self::core::ControllerCore;

use crate::config::PlaybackTuning;
use crate::error::{Error, Result};
use crate::playback::clock::MediaClock;
use crate::playback::decoder::{DecoderFactory, DecoderNotification};
use crate::playback::flush::FlushStatus;
use crate::playback::looper;
use crate::playback::renderer::RendererNotification;
use crate::playback::sink::AudioSink;
use crate::playback::source::{Source, SourceNotification};
use crate::playback::surface::SurfaceHandle;
use crate::playback::types::{
    PerStream, PlaybackSettings, StreamKind, SyncSettings, TrackInfo, TrackType,
};
use crate::state::{PlaybackState, SessionState};
use mpe_common::events::PlayerEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error};

/// Controller mailbox
pub enum ControllerMessage {
    // Commands
    SetDataSource {
        source: Arc<dyn Source>,
        reply: oneshot::Sender<Result<()>>,
    },
    Prepare,
    SetSurface(Option<SurfaceHandle>),
    SetAudioSink(Option<Arc<dyn AudioSink>>),
    Start,
    Pause,
    Resume,
    Seek { time_us: i64, notify: bool },
    Reset,

    // Requests
    SelectTrack {
        index: usize,
        select: bool,
        time_us: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    GetTrackInfo {
        reply: oneshot::Sender<Result<Vec<TrackInfo>>>,
    },
    GetSelectedTrack {
        track_type: TrackType,
        reply: oneshot::Sender<Result<Option<usize>>>,
    },
    SetPlaybackSettings {
        settings: PlaybackSettings,
        reply: oneshot::Sender<Result<()>>,
    },
    GetPlaybackSettings {
        reply: oneshot::Sender<Result<PlaybackSettings>>,
    },
    SetSyncSettings {
        settings: SyncSettings,
        video_fps_hint: f32,
        reply: oneshot::Sender<Result<()>>,
    },
    GetSyncSettings {
        reply: oneshot::Sender<Result<(SyncSettings, f32)>>,
    },
    GetFlushStatus {
        reply: oneshot::Sender<PerStream<FlushStatus>>,
    },

    // Self-posted
    ScanSources { generation: u64 },
    PollDuration { generation: u64 },
    TimedText {
        generation: u64,
        time_us: i64,
        text: String,
    },

    // Notifications
    Source {
        generation: u64,
        notification: SourceNotification,
    },
    Decoder {
        stream: StreamKind,
        generation: u64,
        notification: DecoderNotification,
    },
    Renderer {
        generation: u64,
        notification: RendererNotification,
    },

    Shutdown,
}

impl ControllerMessage {
    fn name(&self) -> &'static str {
        match self {
            ControllerMessage::SetDataSource { .. } => "set_data_source",
            ControllerMessage::Prepare => "prepare",
            ControllerMessage::SetSurface(_) => "set_surface",
            ControllerMessage::SetAudioSink(_) => "set_audio_sink",
            ControllerMessage::Start => "start",
            ControllerMessage::Pause => "pause",
            ControllerMessage::Resume => "resume",
            ControllerMessage::Seek { .. } => "seek",
            ControllerMessage::Reset => "reset",
            ControllerMessage::SelectTrack { .. } => "select_track",
            ControllerMessage::GetTrackInfo { .. } => "get_track_info",
            ControllerMessage::GetSelectedTrack { .. } => "get_selected_track",
            ControllerMessage::SetPlaybackSettings { .. } => "set_playback_settings",
            ControllerMessage::GetPlaybackSettings { .. } => "get_playback_settings",
            ControllerMessage::SetSyncSettings { .. } => "set_sync_settings",
            ControllerMessage::GetSyncSettings { .. } => "get_sync_settings",
            ControllerMessage::GetFlushStatus { .. } => "get_flush_status",
            ControllerMessage::ScanSources { .. } => "scan_sources",
            ControllerMessage::PollDuration { .. } => "poll_duration",
            ControllerMessage::TimedText { .. } => "timed_text",
            ControllerMessage::Source { .. } => "source_notify",
            ControllerMessage::Decoder { .. } => "decoder_notify",
            ControllerMessage::Renderer { .. } => "renderer_notify",
            ControllerMessage::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Debug for ControllerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Construction options for a controller
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub tuning: PlaybackTuning,
    /// Request an offloaded audio path when opening the sink
    pub offload_audio: bool,
}

/// Cloneable front of a controller actor
#[derive(Clone)]
pub struct PlayerController {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    state: Arc<SessionState>,
    clock: Arc<MediaClock>,
    /// Current source, readable off the mailbox so reset can disconnect it
    source: Arc<Mutex<Option<Arc<dyn Source>>>>,
}

impl PlayerController {
    /// Start a controller actor on the current tokio runtime
    pub fn spawn(
        options: ControllerOptions,
        state: Arc<SessionState>,
        clock: Arc<MediaClock>,
        factory: Arc<dyn DecoderFactory>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(Mutex::new(None));
        let core = ControllerCore::new(
            options,
            state.clone(),
            clock.clone(),
            factory,
            source.clone(),
            tx.clone(),
        );
        tokio::spawn(run(core, rx, tx.downgrade()));
        Self {
            tx,
            state,
            clock,
            source,
        }
    }

    fn post(&self, message: ControllerMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::ChannelClosed("controller".to_string()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControllerMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.post(make(reply))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("controller".to_string()))
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.state.session_id()
    }

    pub async fn set_data_source(&self, source: Arc<dyn Source>) -> Result<()> {
        self.request(|reply| ControllerMessage::SetDataSource { source, reply })
            .await?
    }

    /// Prepare the source; completion is reported as a `Prepared` event
    pub fn prepare_async(&self) -> Result<()> {
        self.post(ControllerMessage::Prepare)
    }

    /// Attach or detach the display surface; completion is reported as
    /// `SetSurfaceComplete`
    pub fn set_video_surface(&self, surface: Option<SurfaceHandle>) -> Result<()> {
        self.post(ControllerMessage::SetSurface(surface))
    }

    pub fn set_audio_sink(&self, sink: Option<Arc<dyn AudioSink>>) -> Result<()> {
        self.post(ControllerMessage::SetAudioSink(sink))
    }

    pub fn start(&self) -> Result<()> {
        self.post(ControllerMessage::Start)
    }

    pub fn pause(&self) -> Result<()> {
        self.post(ControllerMessage::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.post(ControllerMessage::Resume)
    }

    pub fn seek_to(&self, time_us: i64, notify: bool) -> Result<()> {
        self.post(ControllerMessage::Seek { time_us, notify })
    }

    /// Seek and wait for `SeekComplete`
    pub async fn seek_to_and_wait(&self, time_us: i64) -> Result<()> {
        let mut events = self.subscribe_events();
        self.seek_to(time_us, true)?;
        wait_for(&mut events, |e| matches!(e, PlayerEvent::SeekComplete { .. })).await
    }

    /// Tear the pipeline down; completion is reported as `ResetComplete`
    pub fn reset(&self) -> Result<()> {
        // Unblock any read the source is stuck in before the reset is queued
        let source = self.source.lock().clone();
        if let Some(source) = source {
            source.disconnect();
        }
        self.post(ControllerMessage::Reset)
    }

    /// Reset and wait for `ResetComplete`
    pub async fn reset_and_wait(&self) -> Result<()> {
        let mut events = self.subscribe_events();
        self.reset()?;
        wait_for(&mut events, |e| matches!(e, PlayerEvent::ResetComplete { .. })).await
    }

    pub async fn select_track(&self, index: usize, select: bool, time_us: i64) -> Result<()> {
        self.request(|reply| ControllerMessage::SelectTrack {
            index,
            select,
            time_us,
            reply,
        })
        .await?
    }

    pub async fn track_info(&self) -> Result<Vec<TrackInfo>> {
        self.request(|reply| ControllerMessage::GetTrackInfo { reply })
            .await?
    }

    pub async fn selected_track(&self, track_type: TrackType) -> Result<Option<usize>> {
        self.request(|reply| ControllerMessage::GetSelectedTrack { track_type, reply })
            .await?
    }

    pub async fn set_playback_settings(&self, settings: PlaybackSettings) -> Result<()> {
        self.request(|reply| ControllerMessage::SetPlaybackSettings { settings, reply })
            .await?
    }

    pub async fn playback_settings(&self) -> Result<PlaybackSettings> {
        self.request(|reply| ControllerMessage::GetPlaybackSettings { reply })
            .await?
    }

    pub async fn set_sync_settings(&self, settings: SyncSettings, video_fps_hint: f32) -> Result<()> {
        self.request(|reply| ControllerMessage::SetSyncSettings {
            settings,
            video_fps_hint,
            reply,
        })
        .await?
    }

    pub async fn sync_settings(&self) -> Result<(SyncSettings, f32)> {
        self.request(|reply| ControllerMessage::GetSyncSettings { reply })
            .await?
    }

    /// Flush progress of both streams
    pub async fn flush_status(&self) -> Result<PerStream<FlushStatus>> {
        self.request(|reply| ControllerMessage::GetFlushStatus { reply })
            .await
    }

    /// Current media position
    pub fn current_position_us(&self) -> Result<i64> {
        self.clock
            .now_media_us()
            .map_err(|e| Error::NotReady(e.to_string()))
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state.playback_state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.state.subscribe_events()
    }

    /// Stop the actor and everything it owns
    pub fn shutdown(&self) {
        let _ = self.post(ControllerMessage::Shutdown);
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<PlayerEvent>,
    done: impl Fn(&PlayerEvent) -> bool,
) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(event) if done(&event) => return Ok(()),
            Ok(PlayerEvent::PlaybackError {
                kind: mpe_common::events::MediaErrorKind::Internal,
                message,
                ..
            }) => return Err(Error::Internal(message)),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("event waiter lagged by {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(Error::ChannelClosed("session events".to_string()));
            }
        }
    }
}

async fn run(
    mut core: ControllerCore,
    mut rx: mpsc::UnboundedReceiver<ControllerMessage>,
    tx: mpsc::WeakUnboundedSender<ControllerMessage>,
) {
    let session_id = core.session_id();
    while let Some(message) = rx.recv().await {
        if matches!(message, ControllerMessage::Shutdown) {
            core.shutdown();
            break;
        }
        let name = message.name();
        let result = core.handle(message).await;
        looper::dispatch(&tx, core.take_scheduled());
        if let Err(e) = result {
            error!(session_id = %session_id, "controller stopped while handling {}: {}", name, e);
            core.fail(e);
            break;
        }
    }
    debug!(session_id = %session_id, "controller loop exited");
}
