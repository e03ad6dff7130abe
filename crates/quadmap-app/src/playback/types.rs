use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Every surface loops and plays at once.
    #[default]
    Concurrent,
    /// Surfaces take turns following the playlist.
    Sequential,
}

impl PlaybackMode {
    pub fn toggled(self) -> Self {
        match self {
            PlaybackMode::Concurrent => PlaybackMode::Sequential,
            PlaybackMode::Sequential => PlaybackMode::Concurrent,
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::Concurrent => f.write_str("concurrent"),
            PlaybackMode::Sequential => f.write_str("sequential"),
        }
    }
}

/// One playlist entry: show `media_path` on surface `surface_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistStep {
    pub surface_index: usize,
    pub media_path: PathBuf,
    #[serde(alias = "media_type")]
    pub media_kind: MediaKind,
}

impl PlaylistStep {
    pub fn new(surface_index: usize, media_path: impl Into<PathBuf>, media_kind: MediaKind) -> Self {
        Self {
            surface_index,
            media_path: media_path.into(),
            media_kind,
        }
    }
}

/// Surfaces exempt from sequential gating.
pub type ContinuousSet = BTreeSet<usize>;

/// Playlist after deleting surface `removed`: steps on it are dropped, later
/// indices move down by one. Produces a new list in a single pass.
pub fn playlist_without_surface(steps: &[PlaylistStep], removed: usize) -> Vec<PlaylistStep> {
    steps
        .iter()
        .filter(|s| s.surface_index != removed)
        .map(|s| PlaylistStep {
            surface_index: shift_index(s.surface_index, removed),
            ..s.clone()
        })
        .collect()
}

/// Same transform applied to the continuous set.
pub fn continuous_without_surface(set: &ContinuousSet, removed: usize) -> ContinuousSet {
    set.iter()
        .filter(|&&i| i != removed)
        .map(|&i| shift_index(i, removed))
        .collect()
}

fn shift_index(index: usize, removed: usize) -> usize {
    if index > removed { index - 1 } else { index }
}

/// Steps whose surface index is not below `surface_count` are stale.
pub fn retain_live_steps(steps: Vec<PlaylistStep>, surface_count: usize) -> Vec<PlaylistStep> {
    steps
        .into_iter()
        .filter(|s| s.surface_index < surface_count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(i: usize) -> PlaylistStep {
        PlaylistStep::new(i, format!("clip{i}.mp4"), MediaKind::Video)
    }

    #[test]
    fn removal_drops_and_shifts() {
        let steps = vec![step(0), step(2), step(1), step(3), step(2)];
        let out = playlist_without_surface(&steps, 2);
        let indices: Vec<_> = out.iter().map(|s| s.surface_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        // Paths follow their steps.
        assert_eq!(out[1].media_path, PathBuf::from("clip1.mp4"));
        assert_eq!(out[2].media_path, PathBuf::from("clip3.mp4"));
    }

    #[test]
    fn removal_of_unreferenced_surface_only_shifts() {
        let steps = vec![step(0), step(3)];
        let out = playlist_without_surface(&steps, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].surface_index, 0);
        assert_eq!(out[1].surface_index, 2);
    }

    #[test]
    fn continuous_set_shifts_too() {
        let set: ContinuousSet = [0, 2, 4].into_iter().collect();
        let out = continuous_without_surface(&set, 2);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn stale_steps_are_dropped() {
        let out = retain_live_steps(vec![step(0), step(5), step(1)], 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn step_accepts_legacy_media_type_key() {
        let json = r#"{"surface_index": 1, "media_path": "a.png", "media_type": "image"}"#;
        let s: PlaylistStep = serde_json::from_str(json).unwrap();
        assert_eq!(s.media_kind, MediaKind::Image);
        assert_eq!(serde_json::to_value(&s).unwrap()["media_kind"], "image");
    }

    #[test]
    fn mode_toggle_and_serde() {
        assert_eq!(PlaybackMode::Concurrent.toggled(), PlaybackMode::Sequential);
        assert_eq!(
            serde_json::to_string(&PlaybackMode::Sequential).unwrap(),
            "\"sequential\""
        );
        assert_eq!(PlaybackMode::default(), PlaybackMode::Concurrent);
    }
}
