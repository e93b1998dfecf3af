//! Playback pipeline
//!
//! Source → Decoder → Renderer, coordinated by the Controller. The Controller
//! and the Renderer are actors; decoders and sources are reached through the
//! contracts in [`source`] and [`decoder`].

pub mod captions;
pub mod clock;
pub mod controller;
pub mod decoder;
pub mod deferred;
pub mod flush;
pub mod looper;
pub mod renderer;
pub mod sink;
pub mod source;
pub mod surface;
pub mod synthetic;
pub mod types;

pub use controller::{ControllerOptions, PlayerController};
pub use renderer::RendererHandle;
