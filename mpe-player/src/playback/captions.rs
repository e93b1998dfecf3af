//! Closed-caption tracks discovered inside the video stream
//!
//! Caption tracks are listed after the source's own tracks; index `i` here
//! is reported to callers as `source.track_count() + i`.

use crate::error::{Error, Result};
use crate::playback::types::TrackInfo;

#[derive(Debug, Default)]
pub struct CaptionTracks {
    tracks: Vec<TrackInfo>,
    selected: Option<usize>,
}

impl CaptionTracks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the track list; a selection that no longer exists is dropped
    pub fn set_tracks(&mut self, tracks: Vec<TrackInfo>) {
        if self.selected.map_or(false, |i| i >= tracks.len()) {
            self.selected = None;
        }
        self.tracks = tracks;
    }

    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    pub fn count(&self) -> usize {
        self.tracks.len()
    }

    pub fn select(&mut self, index: usize, select: bool) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::InvalidTrack(format!("caption track {} out of range", index)));
        }
        if select {
            self.selected = Some(index);
        } else if self.selected == Some(index) {
            self.selected = None;
        } else {
            return Err(Error::InvalidTrack(format!("caption track {} is not selected", index)));
        }
        Ok(())
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected == Some(index)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.selected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::types::TrackType;

    fn cc(lang: &str) -> TrackInfo {
        TrackInfo::new(TrackType::Subtitle, "text/cea-608", lang)
    }

    #[test]
    fn test_select_and_deselect() {
        let mut captions = CaptionTracks::new();
        captions.set_tracks(vec![cc("en"), cc("es")]);

        assert!(captions.select(1, true).is_ok());
        assert!(captions.is_selected(1));
        assert!(matches!(captions.select(0, false), Err(Error::InvalidTrack(_))));
        assert!(captions.select(1, false).is_ok());
        assert_eq!(captions.selected(), None);
        assert!(matches!(captions.select(2, true), Err(Error::InvalidTrack(_))));
    }

    #[test]
    fn test_shrinking_track_list_drops_selection() {
        let mut captions = CaptionTracks::new();
        captions.set_tracks(vec![cc("en"), cc("es")]);
        captions.select(1, true).unwrap();

        captions.set_tracks(vec![cc("en")]);
        assert_eq!(captions.selected(), None);
        assert_eq!(captions.count(), 1);
    }
}
