use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Default cap on the long edge of a decoded frame.
pub const DEFAULT_MAX_DIMENSION: u32 = 1280;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "gif"];

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A decoded RGBA8 frame ready for GPU upload.
///
/// Every frame gets a process-unique serial so texture caches can skip
/// re-uploading a buffer they have already seen.
#[derive(Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub serial: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 4);
        Self {
            data,
            width,
            height,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Solid-color frame, handy for placeholders and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 4)
            .collect();
        Self::new(data, width, height)
    }
}

pub type SharedFrame = Arc<Frame>;

/// What a surface (or playlist step) shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Guess the kind from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "Video",
            MediaKind::Image => "Image",
        }
    }
}

/// Playback flags shared between the decode thread and the render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportState {
    pub playing: bool,
    pub looping: bool,
    pub finished: bool,
}

impl Default for TransportState {
    fn default() -> Self {
        Self {
            playing: true,
            looping: true,
            finished: false,
        }
    }
}

/// Scale `(width, height)` down so the long edge is at most `max_dimension`,
/// preserving aspect ratio. Frames already within bounds are unchanged.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let scale = max_dimension as f64 / width.max(height) as f64;
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_state_defaults() {
        let t = TransportState::default();
        assert!(t.playing);
        assert!(t.looping);
        assert!(!t.finished);
    }

    #[test]
    fn fit_within_keeps_small_frames() {
        assert_eq!(fit_within(640, 480, 1280), (640, 480));
        assert_eq!(fit_within(1280, 720, 1280), (1280, 720));
    }

    #[test]
    fn fit_within_scales_long_edge() {
        assert_eq!(fit_within(1920, 1080, 1280), (1280, 720));
        assert_eq!(fit_within(1080, 1920, 1280), (720, 1280));
        assert_eq!(fit_within(3840, 2160, 1280), (1280, 720));
    }

    #[test]
    fn fit_within_never_collapses_to_zero() {
        assert_eq!(fit_within(10_000, 1, 1280), (1280, 1));
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/clip.MP4")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("b.mkv")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("c.png")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("d.JPEG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn media_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), "\"video\"");
        let k: MediaKind = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(k, MediaKind::Image);
    }

    #[test]
    fn frame_serials_are_unique() {
        let a = Frame::solid(2, 2, [255, 0, 0, 255]);
        let b = Frame::solid(2, 2, [255, 0, 0, 255]);
        assert_ne!(a.serial, b.serial);
        assert_eq!(a.data.len(), 16);
        assert_eq!(&a.data[4..8], &[255, 0, 0, 255]);
    }
}
