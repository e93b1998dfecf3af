//! # Media Playback Engine Common Library
//!
//! Shared code for the playback service crates:
//! - Error type and `Result` alias
//! - Configuration file resolution and TOML loading
//! - Caller-visible event model (`PlayerEvent`) and `EventBus`
//! - Microsecond time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
