use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::SLOT_COUNT;
use crate::media::types::DEFAULT_MAX_DIMENSION;
use crate::media::video::FfmpegTools;
use crate::surface::CanvasSize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub version: u32,
    pub canvas: CanvasSize,
    pub image_duration_secs: f32,
    pub decode_rate_hz: f32,
    pub render_rate_hz: f32,
    pub max_frame_dimension: u32,
    /// Corner grab radius in canvas pixels.
    pub preview_hit_threshold: f32,
    pub fullscreen_hit_threshold: f32,
    /// Monitor for the fullscreen output; falls back to the primary one.
    pub output_monitor: Option<usize>,
    pub slots: [Option<PathBuf>; SLOT_COUNT],
    pub slot_loop_secs: f32,
    pub ffmpeg: FfmpegTools,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            version: 1,
            canvas: CanvasSize::default(),
            image_duration_secs: 5.0,
            decode_rate_hz: 30.0,
            render_rate_hz: 60.0,
            max_frame_dimension: DEFAULT_MAX_DIMENSION,
            preview_hit_threshold: 50.0,
            fullscreen_hit_threshold: 30.0,
            output_monitor: None,
            slots: Default::default(),
            slot_loop_secs: 10.0,
            ffmpeg: FfmpegTools::default(),
        }
    }
}

impl SettingsConfig {
    fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("quadmap").join("settings.json"))
    }

    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(json) => Self::from_json(&json),
            Err(_) => Self::default(),
        }
    }

    fn from_json(json: &str) -> Self {
        match serde_json::from_str::<Self>(json) {
            Ok(settings) => settings.sanitized(),
            Err(e) => {
                log::warn!("Ignoring unreadable settings: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::path() else {
            return;
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }

    /// Replace nonsensical values with defaults.
    fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !positive(self.canvas.width) || !positive(self.canvas.height) {
            self.canvas = d.canvas;
        }
        if !positive(self.image_duration_secs) {
            self.image_duration_secs = d.image_duration_secs;
        }
        if !at_least(self.decode_rate_hz, 1.0) {
            self.decode_rate_hz = d.decode_rate_hz;
        }
        if !at_least(self.render_rate_hz, 1.0) {
            self.render_rate_hz = d.render_rate_hz;
        }
        if self.max_frame_dimension == 0 {
            self.max_frame_dimension = d.max_frame_dimension;
        }
        if !positive(self.slot_loop_secs) {
            self.slot_loop_secs = d.slot_loop_secs;
        }
        self
    }

    pub fn image_duration(&self) -> Duration {
        Duration::from_secs_f32(self.image_duration_secs)
    }

    pub fn slot_loop_interval(&self) -> Duration {
        Duration::from_secs_f32(self.slot_loop_secs)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.render_rate_hz)
    }
}

fn positive(x: f32) -> bool {
    x.is_finite() && x > 0.0
}

fn at_least(x: f32, min: f32) -> bool {
    x.is_finite() && x >= min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = SettingsConfig::default();
        assert_eq!(s.canvas, CanvasSize { width: 1920.0, height: 1080.0 });
        assert_eq!(s.image_duration(), Duration::from_secs(5));
        assert_eq!(s.max_frame_dimension, 1280);
        assert_eq!(s.preview_hit_threshold, 50.0);
        assert_eq!(s.fullscreen_hit_threshold, 30.0);
        assert_eq!(s.slot_loop_interval(), Duration::from_secs(10));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let s = SettingsConfig::from_json(r#"{"image_duration_secs": 2.5}"#);
        assert_eq!(s.image_duration(), Duration::from_millis(2500));
        assert_eq!(s.decode_rate_hz, 30.0);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        assert_eq!(SettingsConfig::from_json("{{{"), SettingsConfig::default());
    }

    #[test]
    fn invalid_values_are_sanitized() {
        let s = SettingsConfig::from_json(
            r#"{"render_rate_hz": 0, "image_duration_secs": -1, "max_frame_dimension": 0}"#,
        );
        assert_eq!(s.render_rate_hz, 60.0);
        assert_eq!(s.image_duration_secs, 5.0);
        assert_eq!(s.max_frame_dimension, 1280);
    }

    #[test]
    fn roundtrips_through_json() {
        let mut s = SettingsConfig::default();
        s.slots[1] = Some("show.json".into());
        s.output_monitor = Some(1);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(SettingsConfig::from_json(&json), s);
    }
}
