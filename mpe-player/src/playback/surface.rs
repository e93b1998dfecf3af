//! Display surface contract

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Display target for decoded video frames
pub trait VideoSurface: Send + Sync {
    /// Stable identity, used to tell surfaces apart in logs
    fn id(&self) -> u64;

    /// Show the frame with presentation time `pts_us` at real time `render_time_us`
    fn present(&self, pts_us: i64, render_time_us: i64);
}

pub type SurfaceHandle = Arc<dyn VideoSurface>;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Surface that records presented frames instead of drawing them
#[derive(Debug)]
pub struct NullVideoSurface {
    id: u64,
    presented: AtomicU64,
    last: Mutex<Option<(i64, i64)>>,
}

impl NullVideoSurface {
    pub fn new() -> Self {
        Self {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            presented: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// (pts, render time) of the most recent frame
    pub fn last_presented(&self) -> Option<(i64, i64)> {
        *self.last.lock()
    }
}

impl Default for NullVideoSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSurface for NullVideoSurface {
    fn id(&self) -> u64 {
        self.id
    }

    fn present(&self, pts_us: i64, render_time_us: i64) {
        self.presented.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = Some((pts_us, render_time_us));
    }
}
