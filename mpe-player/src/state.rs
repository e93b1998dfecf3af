//! Shared session state
//!
//! Per-session state read by HTTP handlers and written by the controller
//! actor: the caller-visible playback state and the session's event bus.

use mpe_common::events::{EventBus, PlayerEvent};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use mpe_common::events::PlaybackState;

/// State shared between a session's controller and its API surface
pub struct SessionState {
    session_id: Uuid,

    /// Caller-visible playback state
    playback_state: RwLock<PlaybackState>,

    /// Event fan-out for SSE subscribers and waiters
    events: EventBus,
}

impl SessionState {
    pub fn new(session_id: Uuid, event_capacity: usize) -> Self {
        Self {
            session_id,
            playback_state: RwLock::new(PlaybackState::Idle),
            events: EventBus::new(event_capacity),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Broadcast an event to all listeners
    pub fn broadcast_event(&self, event: PlayerEvent) {
        // No receivers is fine
        self.events.emit_lossy(event);
    }

    /// Subscribe to this session's events
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn playback_state(&self) -> PlaybackState {
        *self.playback_state.read()
    }

    /// Set the playback state, emitting `PlaybackStateChanged` on change
    pub fn set_playback_state(&self, new_state: PlaybackState) {
        let old_state = {
            let mut state = self.playback_state.write();
            let old = *state;
            *state = new_state;
            old
        };
        if old_state != new_state {
            self.broadcast_event(PlayerEvent::PlaybackStateChanged {
                session_id: self.session_id,
                old_state,
                new_state,
                timestamp: mpe_common::time::now(),
            });
        }
    }
}
