//! Session management
//!
//! A session is one controller with its own clock, synthetic source,
//! display surface and simulated audio device. Sessions are independent:
//! a fatal error stops only the session it happened in.

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::playback::clock::{MediaClock, SharedTimeSource};
use crate::playback::controller::{ControllerOptions, PlayerController};
use crate::playback::sink::SimulatedAudioSink;
use crate::playback::surface::NullVideoSurface;
use crate::playback::synthetic::{SyntheticDecoderFactory, SyntheticParams, SyntheticSource};
use crate::state::SessionState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// How long a session teardown waits for the reset to finish
const RESET_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Session {
    pub id: Uuid,
    pub controller: PlayerController,
    pub source: Arc<SyntheticSource>,
    pub surface: Arc<NullVideoSurface>,
    pub sink: Arc<SimulatedAudioSink>,
}

pub struct SessionManager {
    config: PlayerConfig,
    time: SharedTimeSource,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: PlayerConfig, time: SharedTimeSource) -> Self {
        Self {
            config,
            time,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Create a session with its source, surface and sink bound
    pub async fn create(&self, params: SyntheticParams) -> Result<Arc<Session>> {
        let id = Uuid::new_v4();
        let state = Arc::new(SessionState::new(id, self.config.playback.event_capacity));
        let clock = Arc::new(MediaClock::new(self.time.clone()));
        let controller = PlayerController::spawn(
            ControllerOptions {
                tuning: self.config.playback.clone(),
                offload_audio: self.config.audio.offload,
            },
            state,
            clock,
            Arc::new(SyntheticDecoderFactory),
        );

        let source = Arc::new(SyntheticSource::new(params));
        let surface = Arc::new(NullVideoSurface::new());
        let sink = Arc::new(SimulatedAudioSink::new(
            self.time.clone(),
            self.config.audio.buffer_ms,
            self.config.audio.offload,
        ));

        let bound = async {
            controller.set_data_source(source.clone()).await?;
            controller.set_video_surface(Some(surface.clone()))?;
            controller.set_audio_sink(Some(sink.clone()))
        };
        if let Err(e) = bound.await {
            controller.shutdown();
            return Err(e);
        }

        let session = Arc::new(Session {
            id,
            controller,
            source,
            surface,
            sink,
        });
        self.sessions.write().insert(id, session.clone());
        info!(session_id = %id, "session created");
        Ok(session)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    pub fn list(&self) -> Vec<Uuid> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Reset the session, stop its controller and forget it
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let session = self
            .sessions
            .write()
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        close(&session).await;
        info!(session_id = %id, "session removed");
        Ok(())
    }

    /// Reset and drop every session
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            close(&session).await;
        }
    }
}

async fn close(session: &Session) {
    match tokio::time::timeout(RESET_TIMEOUT, session.controller.reset_and_wait()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(session_id = %session.id, "reset failed: {}", e),
        Err(_) => warn!(session_id = %session.id, "reset timed out"),
    }
    session.controller.shutdown();
}
