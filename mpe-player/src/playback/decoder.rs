//! Decoder contract
//!
//! Decoders are actors owned by the controller. Commands are fire-and-forget;
//! their outcomes come back as [`DecoderNotification`]s tagged with the
//! stream and the decoder generation current when the decoder was created.

use crate::error::Result;
use crate::playback::controller::ControllerMessage;
use crate::playback::renderer::RendererHandle;
use crate::playback::source::Source;
use crate::playback::surface::SurfaceHandle;
use crate::playback::types::{FinalResult, MediaError, MediaFormat, StreamKind, TrackInfo};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events raised by a decoder
#[derive(Debug)]
pub enum DecoderNotification {
    /// Input hit a discontinuity; `format_change` requires a new decoder
    InputDiscontinuity { format_change: bool },
    Eos(FinalResult),
    FlushCompleted,
    ShutdownCompleted,
    ResumeCompleted,
    VideoSizeChanged(MediaFormat),
    Error(MediaError),
    /// Closed-caption tracks found in the video stream
    CaptionTracks(Vec<TrackInfo>),
    CaptionData {
        caption_index: usize,
        time_us: i64,
        data: Vec<u8>,
    },
}

/// Delivers decoder notifications to the controller
#[derive(Debug, Clone)]
pub struct DecoderNotifier {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    stream: StreamKind,
    generation: u64,
}

impl DecoderNotifier {
    pub fn new(tx: mpsc::UnboundedSender<ControllerMessage>, stream: StreamKind, generation: u64) -> Self {
        Self { tx, stream, generation }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn notify(&self, notification: DecoderNotification) {
        let _ = self.tx.send(ControllerMessage::Decoder {
            stream: self.stream,
            generation: self.generation,
            notification,
        });
    }
}

/// Runtime parameters pushed to a decoder
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecoderParameters {
    /// Expected frames per second of output, frame rate times speed
    pub operating_rate: Option<f32>,
}

/// Everything a new decoder needs
pub struct DecoderContext {
    pub notifier: DecoderNotifier,
    pub source: Arc<dyn Source>,
    pub renderer: Option<RendererHandle>,
    pub surface: Option<SurfaceHandle>,
    /// Ask the renderer for an offloaded audio path
    pub offload_audio: bool,
}

/// Decode stage for one stream
pub trait Decoder: Send + Sync {
    fn configure(&self, format: &MediaFormat) -> Result<()>;
    fn set_renderer(&self, renderer: Option<RendererHandle>);
    fn set_parameters(&self, params: DecoderParameters);

    /// Drop all pending work and report `FlushCompleted`; the decoder stays
    /// idle until resumed
    fn signal_flush(&self);

    /// Continue after a flush; reports `ResumeCompleted` when `notify`
    fn signal_resume(&self, notify: bool);

    /// Release resources and report `ShutdownCompleted`
    fn initiate_shutdown(&self);

    /// Switch display surface without a rebuild. Returns false when the
    /// decoder cannot, in which case the controller rebuilds it.
    fn set_video_surface(&self, _surface: Option<SurfaceHandle>) -> bool {
        false
    }
}

/// Creates decoders for the controller
pub trait DecoderFactory: Send + Sync {
    fn create(&self, stream: StreamKind, context: DecoderContext) -> Result<Arc<dyn Decoder>>;
}
