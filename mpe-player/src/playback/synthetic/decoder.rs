//! Pass-through decoder
//!
//! Access units are already "decoded" samples/frames, so the decoder only
//! moves them from the source to the renderer. One tokio task per stream
//! does the pulling; the handle forwards controller commands to it.

use crate::error::Result;
use crate::playback::decoder::{
    Decoder, DecoderContext, DecoderFactory, DecoderNotification, DecoderNotifier, DecoderParameters,
};
use crate::playback::renderer::RendererHandle;
use crate::playback::source::Source;
use crate::playback::surface::SurfaceHandle;
use crate::playback::types::{
    Disposition, FinalResult, MediaError, MediaFormat, MediaStatus, ReleaseHandle, StreamKind, TrackInfo,
    TrackType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Buffers handed to the renderer and not yet released
const MAX_OUTSTANDING_BUFFERS: usize = 8;

/// Retry interval while the source has nothing to give
const SOURCE_RETRY: Duration = Duration::from_millis(10);

const CAPTION_INTERVAL_US: i64 = 1_000_000;

enum Command {
    Configure(MediaFormat),
    SetRenderer(Option<RendererHandle>),
    SetParameters(DecoderParameters),
    Flush,
    Resume { notify: bool },
    Shutdown,
}

/// Handle to a running pass-through decoder task
pub struct PassthroughDecoder {
    stream: StreamKind,
    tx: mpsc::UnboundedSender<Command>,
}

impl PassthroughDecoder {
    pub fn spawn(stream: StreamKind, context: DecoderContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            stream,
            commands: rx,
            notifier: context.notifier,
            source: context.source,
            renderer: context.renderer,
            surface: context.surface,
            offload_audio: context.offload_audio,
            format: None,
            sink_open: false,
            active: false,
            eos: false,
            outstanding: Arc::new(AtomicUsize::new(0)),
            wake: Arc::new(Notify::new()),
            next_caption_us: 0,
        };
        tokio::spawn(worker.run());
        Self { stream, tx }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("{} decoder task already gone", self.stream);
        }
    }
}

impl Decoder for PassthroughDecoder {
    fn configure(&self, format: &MediaFormat) -> Result<()> {
        self.send(Command::Configure(format.clone()));
        Ok(())
    }

    fn set_renderer(&self, renderer: Option<RendererHandle>) {
        self.send(Command::SetRenderer(renderer));
    }

    fn set_parameters(&self, params: DecoderParameters) {
        self.send(Command::SetParameters(params));
    }

    fn signal_flush(&self) {
        self.send(Command::Flush);
    }

    fn signal_resume(&self, notify: bool) {
        self.send(Command::Resume { notify });
    }

    fn initiate_shutdown(&self) {
        self.send(Command::Shutdown);
    }
}

/// Creates [`PassthroughDecoder`]s
#[derive(Debug, Default)]
pub struct SyntheticDecoderFactory;

impl DecoderFactory for SyntheticDecoderFactory {
    fn create(&self, stream: StreamKind, context: DecoderContext) -> Result<Arc<dyn Decoder>> {
        Ok(Arc::new(PassthroughDecoder::spawn(stream, context)))
    }
}

enum Pulled {
    Queued,
    Idle,
}

struct Worker {
    stream: StreamKind,
    commands: mpsc::UnboundedReceiver<Command>,
    notifier: DecoderNotifier,
    source: Arc<dyn Source>,
    renderer: Option<RendererHandle>,
    surface: Option<SurfaceHandle>,
    offload_audio: bool,
    format: Option<MediaFormat>,
    sink_open: bool,
    /// Pulling from the source; false until configured and after a flush
    active: bool,
    eos: bool,
    outstanding: Arc<AtomicUsize>,
    wake: Arc<Notify>,
    next_caption_us: i64,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if self.ready_to_pull() {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.on_command(command).await {
                            break;
                        }
                        continue;
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                    Err(mpsc::error::TryRecvError::Empty) => {}
                }
                if let Pulled::Queued = self.pull_one() {
                    tokio::task::yield_now().await;
                    continue;
                }
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(SOURCE_RETRY) => {}
            }
        }
        debug!("{} decoder task exited", self.stream);
    }

    fn ready_to_pull(&self) -> bool {
        self.active
            && !self.eos
            && self.renderer.is_some()
            && (!self.stream.is_audio() || self.sink_open)
            && self.outstanding.load(Ordering::SeqCst) < MAX_OUTSTANDING_BUFFERS
    }

    /// Returns false when the task should exit
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Configure(format) => {
                if !self.stream.is_audio() {
                    self.notifier.notify(DecoderNotification::VideoSizeChanged(format.clone()));
                    if format.has_captions {
                        self.notifier.notify(DecoderNotification::CaptionTracks(vec![TrackInfo::new(
                            TrackType::Subtitle,
                            "text/cea-608",
                            "en",
                        )]));
                    }
                }
                self.format = Some(format);
                self.active = true;
                self.open_sink_if_needed().await;
            }
            Command::SetRenderer(renderer) => {
                self.renderer = renderer;
                self.sink_open = false;
                self.open_sink_if_needed().await;
            }
            Command::SetParameters(params) => {
                debug!("{} decoder operating rate {:?}", self.stream, params.operating_rate);
            }
            Command::Flush => {
                self.active = false;
                self.eos = false;
                self.notifier.notify(DecoderNotification::FlushCompleted);
            }
            Command::Resume { notify } => {
                self.active = true;
                if notify {
                    self.notifier.notify(DecoderNotification::ResumeCompleted);
                }
            }
            Command::Shutdown => {
                self.active = false;
                self.notifier.notify(DecoderNotification::ShutdownCompleted);
                return false;
            }
        }
        true
    }

    async fn open_sink_if_needed(&mut self) {
        if !self.stream.is_audio() || self.sink_open {
            return;
        }
        let (Some(renderer), Some(format)) = (self.renderer.clone(), self.format.clone()) else {
            return;
        };
        match renderer.open_audio_sink(format, self.offload_audio).await {
            Ok(offloaded) => {
                debug!(offloaded, "audio sink opened");
                self.sink_open = true;
            }
            Err(e) => {
                warn!("failed to open audio sink: {}", e);
                self.active = false;
                self.notifier
                    .notify(DecoderNotification::Error(MediaError::decoder(e.to_string())));
            }
        }
    }

    fn pull_one(&mut self) -> Pulled {
        let Some(renderer) = self.renderer.clone() else {
            return Pulled::Idle;
        };
        match self.source.dequeue_access_unit(self.stream) {
            Ok(buffer) => {
                let pts_us = buffer.pts_us;
                if !self.stream.is_audio() {
                    self.emit_captions_up_to(pts_us);
                }
                let outstanding = self.outstanding.clone();
                let wake = self.wake.clone();
                let surface = self.surface.clone();
                outstanding.fetch_add(1, Ordering::SeqCst);
                let release = ReleaseHandle::new(move |disposition| {
                    if let (Some(surface), Disposition::Rendered { render_time_us }) = (&surface, disposition) {
                        surface.present(pts_us, render_time_us);
                    }
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    wake.notify_one();
                });
                renderer.queue_buffer(self.stream, buffer, release);
                Pulled::Queued
            }
            Err(MediaStatus::WouldBlock) => Pulled::Idle,
            Err(MediaStatus::Discontinuity { format_change }) => {
                self.notifier
                    .notify(DecoderNotification::InputDiscontinuity { format_change });
                if format_change {
                    // The controller replaces this decoder
                    self.active = false;
                }
                Pulled::Queued
            }
            Err(MediaStatus::EndOfStream) => {
                self.eos = true;
                self.notifier.notify(DecoderNotification::Eos(FinalResult::EndOfStream));
                Pulled::Idle
            }
            Err(MediaStatus::Error(e)) => {
                self.eos = true;
                self.notifier.notify(DecoderNotification::Error(e));
                Pulled::Idle
            }
        }
    }

    fn emit_captions_up_to(&mut self, pts_us: i64) {
        let has_captions = self.format.as_ref().map_or(false, |f| f.has_captions);
        if !has_captions {
            return;
        }
        if pts_us < self.next_caption_us - CAPTION_INTERVAL_US {
            // Input jumped backwards
            self.next_caption_us = pts_us;
        }
        while self.next_caption_us <= pts_us {
            self.notifier.notify(DecoderNotification::CaptionData {
                caption_index: 0,
                time_us: self.next_caption_us,
                data: format!("cc {}", self.next_caption_us / CAPTION_INTERVAL_US).into_bytes(),
            });
            self.next_caption_us += CAPTION_INTERVAL_US;
        }
    }
}
