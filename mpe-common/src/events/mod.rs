//! Event types for the media playback engine
//!
//! Provides the caller-visible event model and the EventBus that fans events
//! out to SSE subscribers.

mod player_types;

pub use player_types::{InfoKind, MediaErrorKind, PlaybackState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Caller-visible playback events
///
/// Every event names the session it belongs to so a single bus can serve
/// several sessions. Serialized with an internal `type` tag for SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Playback state changed
    PlaybackStateChanged {
        session_id: Uuid,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Source preparation finished
    Prepared {
        session_id: Uuid,
        /// Error description when preparation failed
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Known duration of the content changed
    DurationChanged {
        session_id: Uuid,
        duration_us: i64,
        timestamp: DateTime<Utc>,
    },

    /// Every active stream reached end of stream
    PlaybackComplete {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Playback error; playback stops for `Internal` and for errors with no
    /// remaining decoder
    PlaybackError {
        session_id: Uuid,
        kind: MediaErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Informational notice
    Info {
        session_id: Uuid,
        kind: InfoKind,
        /// Kind-specific value (bandwidth in kbps, position for teardown)
        value: i64,
        timestamp: DateTime<Utc>,
    },

    /// A seek requested with notification finished
    SeekComplete {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Reset finished; all decoders and the renderer are gone
    ResetComplete {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// New display surface is in effect
    SetSurfaceComplete {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Buffered fraction of the content
    BufferingUpdate {
        session_id: Uuid,
        percent: u8,
        timestamp: DateTime<Utc>,
    },

    /// Displayed video dimensions changed
    VideoSizeChanged {
        session_id: Uuid,
        width: u32,
        height: u32,
        timestamp: DateTime<Utc>,
    },

    /// Source capability flags changed
    FlagsChanged {
        session_id: Uuid,
        flags: u32,
        timestamp: DateTime<Utc>,
    },

    /// Timed text cue due for display
    TimedText {
        session_id: Uuid,
        time_us: i64,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// Subtitle sample from a selected subtitle track
    SubtitleData {
        session_id: Uuid,
        track_index: usize,
        time_us: i64,
        duration_us: i64,
        data: Vec<u8>,
        timestamp: DateTime<Utc>,
    },

    /// Timed metadata sample
    TimedMetadata {
        session_id: Uuid,
        time_us: i64,
        data: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Get event type as string for SSE event names and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            PlayerEvent::Prepared { .. } => "Prepared",
            PlayerEvent::DurationChanged { .. } => "DurationChanged",
            PlayerEvent::PlaybackComplete { .. } => "PlaybackComplete",
            PlayerEvent::PlaybackError { .. } => "PlaybackError",
            PlayerEvent::Info { .. } => "Info",
            PlayerEvent::SeekComplete { .. } => "SeekComplete",
            PlayerEvent::ResetComplete { .. } => "ResetComplete",
            PlayerEvent::SetSurfaceComplete { .. } => "SetSurfaceComplete",
            PlayerEvent::BufferingUpdate { .. } => "BufferingUpdate",
            PlayerEvent::VideoSizeChanged { .. } => "VideoSizeChanged",
            PlayerEvent::FlagsChanged { .. } => "FlagsChanged",
            PlayerEvent::TimedText { .. } => "TimedText",
            PlayerEvent::SubtitleData { .. } => "SubtitleData",
            PlayerEvent::TimedMetadata { .. } => "TimedMetadata",
        }
    }

    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            PlayerEvent::PlaybackStateChanged { session_id, .. }
            | PlayerEvent::Prepared { session_id, .. }
            | PlayerEvent::DurationChanged { session_id, .. }
            | PlayerEvent::PlaybackComplete { session_id, .. }
            | PlayerEvent::PlaybackError { session_id, .. }
            | PlayerEvent::Info { session_id, .. }
            | PlayerEvent::SeekComplete { session_id, .. }
            | PlayerEvent::ResetComplete { session_id, .. }
            | PlayerEvent::SetSurfaceComplete { session_id, .. }
            | PlayerEvent::BufferingUpdate { session_id, .. }
            | PlayerEvent::VideoSizeChanged { session_id, .. }
            | PlayerEvent::FlagsChanged { session_id, .. }
            | PlayerEvent::TimedText { session_id, .. }
            | PlayerEvent::SubtitleData { session_id, .. }
            | PlayerEvent::TimedMetadata { session_id, .. } => *session_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Event distribution bus
///
/// Wraps a `tokio::sync::broadcast` channel: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers, and
/// subscribers are cleaned up when dropped.
///
/// ```
/// use mpe_common::events::{EventBus, PlayerEvent};
///
/// let bus = EventBus::new(64);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(PlayerEvent::PlaybackComplete {
///     session_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(session_id: Uuid) -> PlayerEvent {
        PlayerEvent::PlaybackComplete {
            session_id,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(PlayerEvent::BufferingUpdate {
            session_id: id,
            percent: 42,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "BufferingUpdate");
        assert_eq!(json["percent"], 42);
        assert_eq!(json["session_id"], id.to_string());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_value(MediaErrorKind::BadFrameSize).unwrap();
        assert_eq!(json, "bad_frame_size");
    }

    #[test]
    fn test_session_id_and_event_type() {
        let id = Uuid::new_v4();
        let event = complete(id);
        assert_eq!(event.session_id(), id);
        assert_eq!(event.event_type(), "PlaybackComplete");
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        assert!(bus.emit(complete(Uuid::new_v4())).is_err());
        bus.emit_lossy(complete(Uuid::new_v4()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        bus.emit(complete(first)).unwrap();
        bus.emit(complete(second)).unwrap();
        assert_eq!(rx.recv().await.unwrap().session_id(), first);
        assert_eq!(rx.recv().await.unwrap().session_id(), second);
        assert_eq!(bus.capacity(), 8);
    }
}
