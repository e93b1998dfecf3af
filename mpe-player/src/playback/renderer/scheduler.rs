//! Video frame scheduler
//!
//! Aligns target presentation times to the display's vsync grid so frames
//! land on refresh boundaries instead of drifting between them.

/// Snaps render times to vsync boundaries
#[derive(Debug, Clone)]
pub struct VideoFrameScheduler {
    vsync_period_us: i64,
    frame_rate: Option<f32>,
    last_scheduled_us: Option<i64>,
}

impl VideoFrameScheduler {
    pub fn new(refresh_hz: f64) -> Self {
        let vsync_period_us = if refresh_hz > 0.0 {
            (1_000_000.0 / refresh_hz).round() as i64
        } else {
            0
        };
        Self {
            vsync_period_us,
            frame_rate: None,
            last_scheduled_us: None,
        }
    }

    /// Record the content frame rate
    pub fn init(&mut self, frame_rate: Option<f32>) {
        self.frame_rate = frame_rate.filter(|fps| *fps > 0.0);
        self.last_scheduled_us = None;
    }

    pub fn frame_rate(&self) -> Option<f32> {
        self.frame_rate
    }

    /// Forget history after a discontinuity
    pub fn restart(&mut self) {
        self.last_scheduled_us = None;
    }

    pub fn vsync_period_us(&self) -> i64 {
        self.vsync_period_us
    }

    /// Content frame period, when the frame rate is known
    pub fn frame_period_us(&self) -> Option<i64> {
        self.frame_rate
            .map(|fps| (1_000_000.0 / fps as f64).round() as i64)
    }

    /// Nearest vsync boundary to `render_time_us`.
    ///
    /// When content is no faster than the display, a frame never lands on
    /// the vsync its predecessor took; it moves to the next boundary
    /// instead of being shown for zero refreshes.
    pub fn schedule(&mut self, render_time_us: i64) -> i64 {
        if self.vsync_period_us <= 0 {
            return render_time_us;
        }
        let period = self.vsync_period_us;
        let mut snapped = (render_time_us + period / 2).div_euclid(period) * period;
        let paced = self.frame_period_us().map_or(false, |frame_period| frame_period >= period);
        if let Some(last) = self.last_scheduled_us {
            if paced && snapped == last && render_time_us > last {
                snapped += period;
            }
        }
        self.last_scheduled_us = Some(snapped);
        snapped
    }

    pub fn last_scheduled_us(&self) -> Option<i64> {
        self.last_scheduled_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snaps_to_nearest_vsync() {
        let mut scheduler = VideoFrameScheduler::new(50.0);
        assert_eq!(scheduler.vsync_period_us(), 20_000);
        assert_eq!(scheduler.schedule(29_000), 20_000);
        assert_eq!(scheduler.schedule(31_000), 40_000);
        assert_eq!(scheduler.last_scheduled_us(), Some(40_000));
    }

    #[test]
    fn test_known_frame_rate_keeps_frames_on_separate_vsyncs() {
        let mut scheduler = VideoFrameScheduler::new(50.0);
        scheduler.init(Some(40.0));
        assert_eq!(scheduler.frame_period_us(), Some(25_000));
        assert_eq!(scheduler.schedule(31_000), 40_000);
        // Nearest boundary is 40ms again; the frame takes the next one
        assert_eq!(scheduler.schedule(49_000), 60_000);
    }

    #[test]
    fn test_unknown_frame_rate_allows_shared_vsync() {
        let mut scheduler = VideoFrameScheduler::new(50.0);
        assert_eq!(scheduler.frame_period_us(), None);
        assert_eq!(scheduler.schedule(31_000), 40_000);
        assert_eq!(scheduler.schedule(49_000), 40_000);
    }

    #[test]
    fn test_fast_content_may_share_vsync() {
        let mut scheduler = VideoFrameScheduler::new(50.0);
        scheduler.init(Some(120.0));
        assert_eq!(scheduler.schedule(31_000), 40_000);
        assert_eq!(scheduler.schedule(39_000), 40_000);
    }

    #[test]
    fn test_restart_clears_history() {
        let mut scheduler = VideoFrameScheduler::new(60.0);
        scheduler.schedule(1_000_000);
        scheduler.restart();
        assert_eq!(scheduler.last_scheduled_us(), None);
    }

    #[test]
    fn test_zero_refresh_passes_through() {
        let mut scheduler = VideoFrameScheduler::new(0.0);
        assert_eq!(scheduler.schedule(12_345), 12_345);
    }

    #[test]
    fn test_init_ignores_non_positive_rate() {
        let mut scheduler = VideoFrameScheduler::new(60.0);
        scheduler.init(Some(0.0));
        assert_eq!(scheduler.frame_rate(), None);
        scheduler.init(Some(24.0));
        assert_eq!(scheduler.frame_rate(), Some(24.0));
    }
}
