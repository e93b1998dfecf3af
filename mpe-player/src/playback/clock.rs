//! Media Clock
//!
//! Maps between the media time axis and the monotonic real-time axis using a
//! single anchor point and a playback rate. The clock is a guarded value
//! object shared by the Renderer (which moves the anchor) and the Controller
//! handle (which reads the current position); it owns no task.
//!
//! Real time is read through [`TimeSource`] so tests can drive it by hand.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Anchors that move media time backwards by less than this are ignored, so
/// small audio latency estimate jitter cannot make the position regress.
const ANCHOR_FLUCTUATION_ALLOWED_US: i64 = 10_000;

/// Monotonic microsecond clock
pub trait TimeSource: Send + Sync + fmt::Debug {
    fn now_us(&self) -> i64;
}

pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Real monotonic time measured from construction.
///
/// Built on `tokio::time::Instant`, so it follows a paused tokio test clock.
#[derive(Debug)]
pub struct MonotonicTime {
    origin: tokio::time::Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn shared() -> SharedTimeSource {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// Hand-driven time for deterministic tests and simulations
#[derive(Debug, Default)]
pub struct ManualTime {
    now_us: AtomicI64,
}

impl ManualTime {
    pub fn new(start_us: i64) -> Self {
        Self {
            now_us: AtomicI64::new(start_us),
        }
    }

    pub fn set(&self, now_us: i64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_us: i64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Clock query failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("no anchor established")]
    NoAnchor,
    #[error("playback rate is zero")]
    Paused,
}

#[derive(Debug, Clone)]
struct ClockState {
    anchor_media_us: i64,
    anchor_real_us: i64,
    max_media_us: i64,
    starting_media_us: i64,
    playback_rate: f64,
}

impl ClockState {
    fn has_anchor(&self) -> bool {
        self.anchor_real_us >= 0
    }

    fn media_at(&self, real_us: i64) -> i64 {
        self.anchor_media_us + ((real_us - self.anchor_real_us) as f64 * self.playback_rate) as i64
    }
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            anchor_media_us: -1,
            anchor_real_us: -1,
            max_media_us: i64::MAX,
            starting_media_us: -1,
            playback_rate: 1.0,
        }
    }
}

/// Anchor-based media/real time mapping
pub struct MediaClock {
    time: SharedTimeSource,
    state: Mutex<ClockState>,
}

impl fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaClock").field("state", &*self.state.lock()).finish()
    }
}

impl MediaClock {
    pub fn new(time: SharedTimeSource) -> Self {
        Self {
            time,
            state: Mutex::new(ClockState::default()),
        }
    }

    pub fn time_source(&self) -> &SharedTimeSource {
        &self.time
    }

    pub fn now_us(&self) -> i64 {
        self.time.now_us()
    }

    /// Lower bound applied to reported media time
    pub fn set_starting_time_media(&self, starting_media_us: i64) {
        self.state.lock().starting_media_us = starting_media_us;
    }

    pub fn clear_anchor(&self) {
        let mut state = self.state.lock();
        state.anchor_media_us = -1;
        state.anchor_real_us = -1;
    }

    pub fn has_anchor(&self) -> bool {
        self.state.lock().has_anchor()
    }

    /// Establish `media_us` as playing at `real_us`; media time will not be
    /// extrapolated past `max_media_us`. A negative max leaves the current
    /// limit unchanged.
    pub fn update_anchor(&self, media_us: i64, real_us: i64, max_media_us: i64) {
        if media_us < 0 || real_us < 0 {
            warn!("reject anchor with negative time: media={} real={}", media_us, real_us);
            return;
        }

        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        let now_media_us = media_us + ((now_us - real_us) as f64 * state.playback_rate) as i64;
        if now_media_us < 0 {
            warn!("reject anchor since it leads to negative media time");
            return;
        }

        if max_media_us >= 0 {
            state.max_media_us = max_media_us;
        }

        if state.has_anchor() {
            let old_now_media_us = state.media_at(now_us);
            if now_media_us < old_now_media_us
                && now_media_us > old_now_media_us - ANCHOR_FLUCTUATION_ALLOWED_US
            {
                return;
            }
        }

        state.anchor_media_us = now_media_us;
        state.anchor_real_us = now_us;
    }

    pub fn update_max_media_time(&self, max_media_us: i64) {
        self.state.lock().max_media_us = max_media_us;
    }

    /// Change the rate, re-anchoring at the current point so media time
    /// stays continuous. Rate 0 freezes media time.
    pub fn set_playback_rate(&self, rate: f32) {
        let rate = if rate < 0.0 {
            warn!("negative playback rate {} clamped to 0", rate);
            0.0
        } else {
            rate as f64
        };

        let now_us = self.time.now_us();
        let mut state = self.state.lock();
        if !state.has_anchor() {
            state.playback_rate = rate;
            return;
        }

        let mut media_us = state.media_at(now_us);
        if media_us < 0 {
            media_us = 0;
        }
        state.anchor_media_us = media_us;
        state.anchor_real_us = now_us;
        state.playback_rate = rate;
        debug!("clock rate set to {} at media {}", rate, media_us);
    }

    pub fn playback_rate(&self) -> f32 {
        self.state.lock().playback_rate as f32
    }

    /// Media time at `real_us`, clamped to the max media time unless
    /// `allow_past_max`, and never below the starting time or zero.
    pub fn media_time_us(&self, real_us: i64, allow_past_max: bool) -> Result<i64, ClockError> {
        let state = self.state.lock();
        Self::media_time_locked(&state, real_us, allow_past_max)
    }

    /// Media time now
    pub fn now_media_us(&self) -> Result<i64, ClockError> {
        self.media_time_us(self.time.now_us(), false)
    }

    fn media_time_locked(state: &ClockState, real_us: i64, allow_past_max: bool) -> Result<i64, ClockError> {
        if !state.has_anchor() {
            return Err(ClockError::NoAnchor);
        }

        let mut media_us = state.media_at(real_us);
        if !allow_past_max && media_us > state.max_media_us {
            media_us = state.max_media_us;
        }
        if media_us < state.starting_media_us {
            media_us = state.starting_media_us;
        }
        Ok(media_us.max(0))
    }

    /// Real time at which `target_media_us` will be reached
    pub fn try_real_time_for(&self, target_media_us: i64) -> Result<i64, ClockError> {
        let now_us = self.time.now_us();
        let state = self.state.lock();
        if state.playback_rate == 0.0 {
            return Err(ClockError::Paused);
        }
        let now_media_us = Self::media_time_locked(&state, now_us, true)?;
        Ok(((target_media_us - now_media_us) as f64 / state.playback_rate) as i64 + now_us)
    }

    /// Like [`try_real_time_for`](Self::try_real_time_for), but answers "now"
    /// when no anchor exists or the clock is paused.
    pub fn real_time_for(&self, target_media_us: i64) -> i64 {
        match self.try_real_time_for(target_media_us) {
            Ok(real_us) => real_us,
            Err(_) => self.time.now_us(),
        }
    }
}
