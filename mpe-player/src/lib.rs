//! # Media Playback Engine (mpe-player)
//!
//! Streaming playback core with A/V synchronization, flush/teardown
//! coordination and an HTTP/SSE control surface.
//!
//! **Architecture:** a Controller actor owns the Source, the per-stream
//! Decoders and a Renderer actor. The Renderer schedules audio writes and
//! video presentation against a shared Media Clock.

pub mod api;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod state;

pub use error::{Error, Result};
pub use session::{Session, SessionManager};
pub use state::SessionState;
