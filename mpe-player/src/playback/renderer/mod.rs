//! Renderer actor
//!
//! Owns the audio and video queues, drains them against the Media Clock and
//! reports stream end, rendering start and audio teardown to the controller.
//!
//! [`RendererHandle`] is the cloneable front: decoders queue buffers through
//! it and the controller drives flush/pause/resume. Queue and drain
//! generations live in [`RendererShared`] so `flush()` can invalidate posts
//! that are already in the mailbox before the flush itself is handled.

pub mod core;
pub mod scheduler;

pub use self::core::{RendererCore, SyncState};
pub use scheduler::VideoFrameScheduler;

use crate::config::PlaybackTuning;
use crate::error::{Error, Result};
use crate::playback::clock::MediaClock;
use crate::playback::controller::ControllerMessage;
use crate::playback::looper;
use crate::playback::sink::AudioSink;
use crate::playback::types::{
    AudioTearDownReason, FinalResult, MediaBuffer, MediaFormat, PlaybackSettings, ReleaseHandle,
    StreamKind, SyncSettings,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Upward notifications consumed by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum RendererNotification {
    Eos { stream: StreamKind, result: FinalResult },
    FlushComplete(StreamKind),
    VideoRenderingStart,
    MediaRenderingStart,
    AudioTearDown {
        reason: AudioTearDownReason,
        position_us: Option<i64>,
    },
}

/// Sends renderer notifications tagged with the renderer generation
#[derive(Debug, Clone)]
pub struct RendererNotifier {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    generation: u64,
}

impl RendererNotifier {
    pub fn new(tx: mpsc::UnboundedSender<ControllerMessage>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn notify(&self, notification: RendererNotification) {
        let _ = self.tx.send(ControllerMessage::Renderer {
            generation: self.generation,
            notification,
        });
    }
}

fn slot(stream: StreamKind) -> usize {
    match stream {
        StreamKind::Audio => 0,
        StreamKind::Video => 1,
    }
}

/// State shared between the renderer actor and its handles
#[derive(Debug, Default)]
pub struct RendererShared {
    queue_generation: [AtomicU64; 2],
    drain_generation: [AtomicU64; 2],
    notify_complete: [AtomicBool; 2],
    queued: [AtomicUsize; 2],
    has_stream: [AtomicBool; 2],
    /// Set while a decoder flush is in flight; posts from that decoder
    /// belong to the flushed epoch whatever generation is current
    input_fenced: [AtomicBool; 2],
}

impl RendererShared {
    pub fn queue_generation(&self, stream: StreamKind) -> u64 {
        self.queue_generation[slot(stream)].load(Ordering::SeqCst)
    }

    pub fn drain_generation(&self, stream: StreamKind) -> u64 {
        self.drain_generation[slot(stream)].load(Ordering::SeqCst)
    }

    pub fn bump_drain_generation(&self, stream: StreamKind) -> u64 {
        self.drain_generation[slot(stream)].fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Synchronous half of a flush: invalidate queued posts and pending
    /// drains, and remember whether completion must be reported
    pub fn begin_flush(&self, stream: StreamKind, notify_complete: bool) {
        let i = slot(stream);
        if notify_complete {
            self.notify_complete[i].store(true, Ordering::SeqCst);
        }
        self.queue_generation[i].fetch_add(1, Ordering::SeqCst);
        self.drain_generation[i].fetch_add(1, Ordering::SeqCst);
    }

    /// Refuse input for `stream` until [`open_input`](Self::open_input).
    /// Must precede the matching [`begin_flush`](Self::begin_flush).
    pub fn fence_input(&self, stream: StreamKind) {
        self.input_fenced[slot(stream)].store(true, Ordering::SeqCst);
    }

    pub fn open_input(&self, stream: StreamKind) {
        self.input_fenced[slot(stream)].store(false, Ordering::SeqCst);
    }

    /// Generation to stamp on a post made now, or `None` while fenced.
    /// The generation is read before the fence, so a post that sees the
    /// bumped generation also sees the fence raised ahead of it.
    pub fn input_generation(&self, stream: StreamKind) -> Option<u64> {
        let generation = self.queue_generation(stream);
        if self.input_fenced[slot(stream)].load(Ordering::SeqCst) {
            None
        } else {
            Some(generation)
        }
    }

    pub fn take_notify_complete(&self, stream: StreamKind) -> bool {
        self.notify_complete[slot(stream)].swap(false, Ordering::SeqCst)
    }

    pub fn queued(&self, stream: StreamKind) -> usize {
        self.queued[slot(stream)].load(Ordering::Relaxed)
    }

    pub(crate) fn set_queued(&self, stream: StreamKind, depth: usize) {
        self.queued[slot(stream)].store(depth, Ordering::Relaxed);
    }

    pub fn has_stream(&self, stream: StreamKind) -> bool {
        self.has_stream[slot(stream)].load(Ordering::Relaxed)
    }

    pub(crate) fn set_has_stream(&self, stream: StreamKind) {
        self.has_stream[slot(stream)].store(true, Ordering::Relaxed);
    }
}

/// Construction parameters
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub tuning: PlaybackTuning,
    /// Video timestamps are real time (live sources)
    pub real_time: bool,
    /// Start in queue-sync mode; set when both streams are expected
    pub sync_on_start: bool,
    /// Initial speed and pitch
    pub playback_settings: PlaybackSettings,
}

/// Renderer mailbox
pub enum RendererMessage {
    QueueBuffer {
        stream: StreamKind,
        generation: u64,
        buffer: MediaBuffer,
        release: ReleaseHandle,
    },
    QueueEos {
        stream: StreamKind,
        generation: u64,
        result: FinalResult,
    },
    Flush { stream: StreamKind, resync: bool },
    DrainAudio { generation: u64 },
    PostDrainVideo { generation: u64 },
    DrainVideo { generation: u64 },
    NotifyAudioEos { generation: u64, result: FinalResult },
    OffloadPauseTimeout { generation: u64 },
    Pause,
    Resume,
    SetVideoFrameRate(f32),
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
    OpenAudioSink {
        format: MediaFormat,
        offload: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
    CloseAudioSink,
    Shutdown,
}

/// Cloneable front of a renderer actor
#[derive(Clone)]
pub struct RendererHandle {
    tx: mpsc::UnboundedSender<RendererMessage>,
    shared: Arc<RendererShared>,
    clock: Arc<MediaClock>,
}

impl RendererHandle {
    /// Start a renderer actor on the current tokio runtime
    pub fn spawn(
        config: RendererConfig,
        clock: Arc<MediaClock>,
        sink: Option<Arc<dyn AudioSink>>,
        notifier: RendererNotifier,
    ) -> Self {
        let shared = Arc::new(RendererShared::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let core = RendererCore::new(config, shared.clone(), clock.clone(), sink, notifier);
        tokio::spawn(run(core, rx, tx.downgrade()));
        Self { tx, shared, clock }
    }

    fn post(&self, message: RendererMessage) {
        if self.tx.send(message).is_err() {
            debug!("renderer mailbox closed");
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> RendererMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| Error::ChannelClosed("renderer".to_string()))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("renderer".to_string()))?
    }

    pub fn shared(&self) -> &Arc<RendererShared> {
        &self.shared
    }

    /// Dropping `release` unqueued reports the buffer as discarded
    pub fn queue_buffer(&self, stream: StreamKind, buffer: MediaBuffer, release: ReleaseHandle) {
        let Some(generation) = self.shared.input_generation(stream) else {
            debug!(pts_us = buffer.pts_us, "{} buffer from a flushing decoder dropped", stream);
            return;
        };
        self.post(RendererMessage::QueueBuffer {
            stream,
            generation,
            buffer,
            release,
        });
    }

    pub fn queue_eos(&self, stream: StreamKind, result: FinalResult) {
        let Some(generation) = self.shared.input_generation(stream) else {
            debug!("{} EOS from a flushing decoder dropped", stream);
            return;
        };
        self.post(RendererMessage::QueueEos {
            stream,
            generation,
            result,
        });
    }

    /// Empty `stream`'s queue. `resync` re-enters queue-sync mode; it is
    /// set when both streams are flushed together.
    pub fn flush(&self, stream: StreamKind, notify_complete: bool, resync: bool) {
        self.shared.begin_flush(stream, notify_complete);
        self.clock.clear_anchor();
        self.post(RendererMessage::Flush { stream, resync });
    }

    /// Flush on behalf of `stream`'s decoder. Input stays refused until the
    /// controller sees the decoder's own flush complete and calls
    /// [`open_input`](Self::open_input); anything the decoder pulled in
    /// between is pre-flush data.
    pub fn flush_decoder_output(&self, stream: StreamKind, resync: bool) {
        self.shared.fence_input(stream);
        self.flush(stream, true, resync);
    }

    pub fn open_input(&self, stream: StreamKind) {
        self.shared.open_input(stream);
    }

    pub fn pause(&self) {
        self.post(RendererMessage::Pause);
    }

    pub fn resume(&self) {
        self.post(RendererMessage::Resume);
    }

    pub fn set_video_frame_rate(&self, fps: f32) {
        self.post(RendererMessage::SetVideoFrameRate(fps));
    }

    pub fn close_audio_sink(&self) {
        self.post(RendererMessage::CloseAudioSink);
    }

    pub fn shutdown(&self) {
        self.post(RendererMessage::Shutdown);
    }

    pub async fn set_playback_settings(&self, settings: PlaybackSettings) -> Result<()> {
        self.request(|reply| RendererMessage::SetPlaybackSettings { settings, reply })
            .await
    }

    pub async fn playback_settings(&self) -> Result<PlaybackSettings> {
        self.request(|reply| RendererMessage::GetPlaybackSettings { reply })
            .await
    }

    pub async fn set_sync_settings(&self, settings: SyncSettings, video_fps_hint: f32) -> Result<()> {
        self.request(|reply| RendererMessage::SetSyncSettings {
            settings,
            video_fps_hint,
            reply,
        })
        .await
    }

    pub async fn sync_settings(&self) -> Result<(SyncSettings, f32)> {
        self.request(|reply| RendererMessage::GetSyncSettings { reply })
            .await
    }

    /// Open the audio device for `format`; returns whether offload was granted
    pub async fn open_audio_sink(&self, format: MediaFormat, offload: bool) -> Result<bool> {
        self.request(|reply| RendererMessage::OpenAudioSink {
            format,
            offload,
            reply,
        })
        .await
    }

    /// Current media position from the shared clock
    pub fn current_position_us(&self) -> Result<i64> {
        self.clock
            .now_media_us()
            .map_err(|e| Error::NotReady(e.to_string()))
    }

    pub fn queued_buffers(&self, stream: StreamKind) -> usize {
        self.shared.queued(stream)
    }
}

async fn run(
    mut core: RendererCore,
    mut rx: mpsc::UnboundedReceiver<RendererMessage>,
    tx: mpsc::WeakUnboundedSender<RendererMessage>,
) {
    while let Some(message) = rx.recv().await {
        if matches!(message, RendererMessage::Shutdown) {
            core.handle(message);
            break;
        }
        core.handle(message);
        looper::dispatch(&tx, core.take_scheduled());
    }
    debug!("renderer loop exited");
}
