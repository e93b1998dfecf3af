//! Flush and teardown state machine
//!
//! One [`StreamFlush`] per stream tracks a flush cycle across the decode and
//! render stages:
//!
//! ```text
//! None ─► FlushingDecoder ─────────────────────────────► Flushed
//! None ─► FlushingDecoderThenShutdown ─► ShuttingDown ─► ShutDown
//! ```
//!
//! A cycle only advances once both the decoder and the renderer have reported
//! completion, so a decoder is never shut down while the renderer may still
//! hold its buffers.

use crate::playback::types::StreamKind;
use std::fmt;
use thiserror::Error;

/// Per-stream flush status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushStatus {
    #[default]
    None,
    FlushingDecoder,
    FlushingDecoderThenShutdown,
    ShuttingDown,
    Flushed,
    ShutDown,
}

impl FlushStatus {
    /// None, Flushed and ShutDown: nothing is in flight for this stream
    pub fn is_quiescent(self) -> bool {
        matches!(self, FlushStatus::None | FlushStatus::Flushed | FlushStatus::ShutDown)
    }

    pub fn is_idle(self) -> bool {
        self == FlushStatus::None
    }

    pub fn is_shut_down(self) -> bool {
        self == FlushStatus::ShutDown
    }
}

impl fmt::Display for FlushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushStatus::None => "NONE",
            FlushStatus::FlushingDecoder => "FLUSHING_DECODER",
            FlushStatus::FlushingDecoderThenShutdown => "FLUSHING_DECODER_THEN_SHUTDOWN",
            FlushStatus::ShuttingDown => "SHUTTING_DOWN",
            FlushStatus::Flushed => "FLUSHED",
            FlushStatus::ShutDown => "SHUT_DOWN",
        };
        f.write_str(name)
    }
}

/// Which stage reported flush completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushSide {
    Decoder,
    Renderer,
}

/// Result of recording a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushProgress {
    /// The other side has not reported yet
    Pending,
    /// Simple flush finished
    Flushed,
    /// Both sides done; the caller must now call `initiate_shutdown()`
    InitiateShutdown,
}

/// What the controller must do about a decoder error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Nothing in flight: queue a flush-to-shutdown
    QueueShutdown,
    /// A flush is running; shutdown now follows it automatically
    ShutdownScheduled,
    /// Already heading to shutdown; nothing to do
    AlreadyShuttingDown,
    /// Flushed and idle: shut the decoder down immediately
    ShutdownNow,
    /// Decoder already gone; just try to finish the flush cycle
    AlreadyShutDown,
}

/// Protocol violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlushError {
    #[error("{stream} decoder flush completed while {status}")]
    UnexpectedDecoderFlush { stream: StreamKind, status: FlushStatus },
    #[error("{stream} decoder shutdown completed while {status}")]
    UnexpectedShutdown { stream: StreamKind, status: FlushStatus },
}

/// Flush status plus completion bookkeeping for one stream
#[derive(Debug, Clone, Copy)]
pub struct StreamFlush {
    stream: StreamKind,
    status: FlushStatus,
    decoder_done: bool,
    renderer_done: bool,
}

impl StreamFlush {
    pub fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            status: FlushStatus::None,
            decoder_done: false,
            renderer_done: false,
        }
    }

    pub fn status(&self) -> FlushStatus {
        self.status
    }

    /// Start a cycle. Without a renderer the render side counts as done.
    pub fn begin(&mut self, shutdown: bool, renderer_present: bool) {
        self.status = if shutdown {
            FlushStatus::FlushingDecoderThenShutdown
        } else {
            FlushStatus::FlushingDecoder
        };
        self.decoder_done = false;
        self.renderer_done = !renderer_present;
    }

    pub fn is_complete(&self, side: FlushSide) -> bool {
        match side {
            FlushSide::Decoder => self.decoder_done,
            FlushSide::Renderer => self.renderer_done,
        }
    }

    pub fn record_complete(&mut self, side: FlushSide) -> Result<FlushProgress, FlushError> {
        match side {
            FlushSide::Decoder => self.decoder_done = true,
            FlushSide::Renderer => self.renderer_done = true,
        }

        if !(self.decoder_done && self.renderer_done) {
            return Ok(FlushProgress::Pending);
        }

        match self.status {
            FlushStatus::FlushingDecoder => {
                self.status = FlushStatus::Flushed;
                Ok(FlushProgress::Flushed)
            }
            FlushStatus::FlushingDecoderThenShutdown => {
                self.status = FlushStatus::ShuttingDown;
                Ok(FlushProgress::InitiateShutdown)
            }
            status if side == FlushSide::Decoder => Err(FlushError::UnexpectedDecoderFlush {
                stream: self.stream,
                status,
            }),
            _ => Ok(FlushProgress::Pending),
        }
    }

    pub fn on_decoder_error(&mut self) -> ErrorAction {
        match self.status {
            FlushStatus::None => ErrorAction::QueueShutdown,
            FlushStatus::FlushingDecoder => {
                self.status = FlushStatus::FlushingDecoderThenShutdown;
                ErrorAction::ShutdownScheduled
            }
            FlushStatus::FlushingDecoderThenShutdown | FlushStatus::ShuttingDown => {
                ErrorAction::AlreadyShuttingDown
            }
            FlushStatus::Flushed => {
                self.status = FlushStatus::ShuttingDown;
                ErrorAction::ShutdownNow
            }
            FlushStatus::ShutDown => ErrorAction::AlreadyShutDown,
        }
    }

    pub fn on_shutdown_complete(&mut self) -> Result<(), FlushError> {
        if self.status != FlushStatus::ShuttingDown {
            return Err(FlushError::UnexpectedShutdown {
                stream: self.stream,
                status: self.status,
            });
        }
        self.status = FlushStatus::ShutDown;
        Ok(())
    }

    /// Audio device teardown dropped the decoder mid-cycle: settle the
    /// cycle as if the decoder side had completed. Returns true when the
    /// decoder should not be recreated.
    pub fn settle_without_decoder(&mut self) -> bool {
        match self.status {
            FlushStatus::FlushingDecoder => {
                self.decoder_done = true;
                self.renderer_done = true;
                self.status = FlushStatus::Flushed;
                false
            }
            FlushStatus::FlushingDecoderThenShutdown | FlushStatus::ShuttingDown => {
                self.decoder_done = true;
                self.renderer_done = true;
                self.status = FlushStatus::ShutDown;
                true
            }
            _ => false,
        }
    }

    /// Return to `None` once the cycle is over
    pub fn reset(&mut self) {
        self.status = FlushStatus::None;
        self.decoder_done = false;
        self.renderer_done = false;
    }
}

/// Both streams' flush state
#[derive(Debug, Clone, Copy)]
pub struct FlushState {
    audio: StreamFlush,
    video: StreamFlush,
}

impl Default for FlushState {
    fn default() -> Self {
        Self {
            audio: StreamFlush::new(StreamKind::Audio),
            video: StreamFlush::new(StreamKind::Video),
        }
    }
}

impl FlushState {
    pub fn get(&self, stream: StreamKind) -> &StreamFlush {
        match stream {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    pub fn get_mut(&mut self, stream: StreamKind) -> &mut StreamFlush {
        match stream {
            StreamKind::Audio => &mut self.audio,
            StreamKind::Video => &mut self.video,
        }
    }

    pub fn status(&self, stream: StreamKind) -> FlushStatus {
        self.get(stream).status()
    }

    pub fn both_quiescent(&self) -> bool {
        self.audio.status.is_quiescent() && self.video.status.is_quiescent()
    }

    pub fn both_idle(&self) -> bool {
        self.audio.status == FlushStatus::None && self.video.status == FlushStatus::None
    }

    /// If both streams are quiescent, reset them to `None` and return true
    pub fn finish_if_possible(&mut self) -> bool {
        if !self.both_quiescent() {
            return false;
        }
        self.audio.reset();
        self.video.reset();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_flush_needs_both_sides() {
        let mut flush = StreamFlush::new(StreamKind::Video);
        flush.begin(false, true);
        assert_eq!(flush.status(), FlushStatus::FlushingDecoder);
        assert_eq!(flush.record_complete(FlushSide::Renderer), Ok(FlushProgress::Pending));
        assert_eq!(flush.status(), FlushStatus::FlushingDecoder);
        assert_eq!(flush.record_complete(FlushSide::Decoder), Ok(FlushProgress::Flushed));
        assert_eq!(flush.status(), FlushStatus::Flushed);
    }

    #[test]
    fn test_shutdown_only_after_both_sides() {
        let mut flush = StreamFlush::new(StreamKind::Audio);
        flush.begin(true, true);
        assert_eq!(flush.record_complete(FlushSide::Decoder), Ok(FlushProgress::Pending));
        assert_eq!(
            flush.record_complete(FlushSide::Renderer),
            Ok(FlushProgress::InitiateShutdown)
        );
        assert_eq!(flush.status(), FlushStatus::ShuttingDown);
        assert_eq!(flush.on_shutdown_complete(), Ok(()));
        assert_eq!(flush.status(), FlushStatus::ShutDown);
    }

    #[test]
    fn test_missing_renderer_counts_as_done() {
        let mut flush = StreamFlush::new(StreamKind::Audio);
        flush.begin(false, false);
        assert!(flush.is_complete(FlushSide::Renderer));
        assert_eq!(flush.record_complete(FlushSide::Decoder), Ok(FlushProgress::Flushed));
    }

    #[test]
    fn test_error_during_flush_defers_shutdown() {
        let mut flush = StreamFlush::new(StreamKind::Video);
        flush.begin(false, true);
        assert_eq!(flush.on_decoder_error(), ErrorAction::ShutdownScheduled);
        assert_eq!(flush.status(), FlushStatus::FlushingDecoderThenShutdown);
        assert_eq!(flush.on_decoder_error(), ErrorAction::AlreadyShuttingDown);
        assert_eq!(flush.record_complete(FlushSide::Decoder), Ok(FlushProgress::Pending));
        assert_eq!(
            flush.record_complete(FlushSide::Renderer),
            Ok(FlushProgress::InitiateShutdown)
        );
    }

    #[test]
    fn test_error_policy_per_status() {
        let mut flush = StreamFlush::new(StreamKind::Audio);
        assert_eq!(flush.on_decoder_error(), ErrorAction::QueueShutdown);

        flush.begin(false, false);
        flush.record_complete(FlushSide::Decoder).unwrap();
        assert_eq!(flush.on_decoder_error(), ErrorAction::ShutdownNow);
        assert_eq!(flush.status(), FlushStatus::ShuttingDown);

        flush.on_shutdown_complete().unwrap();
        assert_eq!(flush.on_decoder_error(), ErrorAction::AlreadyShutDown);
    }

    #[test]
    fn test_unexpected_completions_are_errors() {
        let mut flush = StreamFlush::new(StreamKind::Video);
        assert_eq!(flush.record_complete(FlushSide::Renderer), Ok(FlushProgress::Pending));
        assert!(matches!(
            flush.record_complete(FlushSide::Decoder),
            Err(FlushError::UnexpectedDecoderFlush { .. })
        ));
        let mut flush = StreamFlush::new(StreamKind::Video);
        assert!(flush.on_shutdown_complete().is_err());
    }

    #[test]
    fn test_finish_requires_both_quiescent() {
        let mut state = FlushState::default();
        state.get_mut(StreamKind::Audio).begin(false, false);
        assert!(!state.finish_if_possible());
        state
            .get_mut(StreamKind::Audio)
            .record_complete(FlushSide::Decoder)
            .unwrap();
        assert!(state.finish_if_possible());
        assert!(state.both_idle());
    }

    #[test]
    fn test_teardown_settles_cycle() {
        let mut flush = StreamFlush::new(StreamKind::Audio);
        flush.begin(false, true);
        assert!(!flush.settle_without_decoder());
        assert_eq!(flush.status(), FlushStatus::Flushed);

        flush.begin(true, true);
        assert!(flush.settle_without_decoder());
        assert_eq!(flush.status(), FlushStatus::ShutDown);
    }
}
