//! Source contract
//!
//! A Source delivers demultiplexed access units per stream plus format and
//! track metadata. Its asynchronous events reach the controller through a
//! [`SourceNotifier`] tagged with the source generation, so events from a
//! source that has since been replaced are ignored.

use crate::error::Result;
use crate::playback::controller::ControllerMessage;
use crate::playback::types::{
    MediaBuffer, MediaError, MediaFormat, MediaStatus, SourceFlags, StreamKind, TrackInfo, TrackType,
};
use tokio::sync::{mpsc, oneshot};

/// Asynchronous events raised by a Source
#[derive(Debug)]
pub enum SourceNotification {
    Prepared(std::result::Result<(), MediaError>),
    FlagsChanged(SourceFlags),
    VideoSizeChanged(MediaFormat),
    BufferingUpdate { percent: u8 },
    BufferingStart,
    BufferingEnd,
    /// Buffering started and playback must pause until it ends
    PauseOnBufferingStart,
    /// Buffering ended; resume unless the client paused
    ResumeOnBufferingEnd,
    CacheStats { kbps: i64 },
    SubtitleData {
        track_index: usize,
        time_us: i64,
        duration_us: i64,
        data: Vec<u8>,
    },
    TimedText { time_us: i64, text: String },
    TimedMetadata { time_us: i64, data: Vec<u8> },
    /// Shut down the named decoders, rescan, then reply
    QueueDecoderShutdown {
        audio: bool,
        video: bool,
        reply: oneshot::Sender<()>,
    },
    DrmNoLicense,
}

/// Delivers source notifications to the controller
#[derive(Debug, Clone)]
pub struct SourceNotifier {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    generation: u64,
}

impl SourceNotifier {
    pub fn new(tx: mpsc::UnboundedSender<ControllerMessage>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn notify(&self, notification: SourceNotification) {
        let _ = self.tx.send(ControllerMessage::Source {
            generation: self.generation,
            notification,
        });
    }
}

/// Demultiplexed media input
pub trait Source: Send + Sync {
    /// Begin preparing; completion arrives as `Prepared`
    fn prepare_async(&self, notifier: SourceNotifier);
    fn start(&self);
    fn stop(&self);
    fn pause(&self);
    fn resume(&self);

    /// Make pending and future reads return promptly; called off the
    /// controller's queue during reset
    fn disconnect(&self);

    /// Pull the next access unit for `stream`
    fn dequeue_access_unit(&self, stream: StreamKind) -> std::result::Result<MediaBuffer, MediaStatus>;

    /// Format of `stream`, once known
    fn format(&self, stream: StreamKind) -> Option<MediaFormat>;

    fn duration_us(&self) -> Option<i64>;

    /// Give the source a chance to read ahead; an error status means no more
    /// data will arrive
    fn feed_more_data(&self) -> std::result::Result<(), MediaStatus>;

    fn flags(&self) -> SourceFlags;

    fn track_count(&self) -> usize;
    fn track_info(&self, index: usize) -> Option<TrackInfo>;
    fn selected_track(&self, track_type: TrackType) -> Option<usize>;
    fn select_track(&self, index: usize, select: bool, time_us: i64) -> Result<()>;

    fn seek_to(&self, time_us: i64) -> Result<()>;

    /// Live sources present video at its media time
    fn is_real_time(&self) -> bool {
        false
    }
}
