//! Serializable picture of the whole mapping and its restore path.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{MapperError, MapperResult};
use crate::media::MediaKind;
use crate::playback::{ContinuousSet, PlaybackMode, PlaybackScheduler, PlaylistStep};
use crate::stage::Stage;
use crate::surface::Point;

pub const SNAPSHOT_VERSION: u32 = 1;

fn default_opacity() -> f32 {
    1.0
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceEntry {
    pub name: String,
    #[serde(alias = "points")]
    pub corners: [Point; 4],
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub media_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub surfaces: Vec<SurfaceEntry>,
    #[serde(default)]
    pub playback_mode: PlaybackMode,
    #[serde(default, alias = "sequence_steps")]
    pub playlist_steps: Vec<PlaylistStep>,
    #[serde(default)]
    pub continuous_surfaces: Vec<usize>,
    /// Older files list surface indices instead of steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_order: Option<Vec<usize>>,
}

/// Top-level shape with entries left unparsed, so one bad entry does not
/// reject the whole file.
#[derive(Deserialize)]
struct LenientSnapshot {
    #[serde(default = "default_version")]
    version: u32,
    surfaces: Vec<serde_json::Value>,
    #[serde(default)]
    playback_mode: Option<serde_json::Value>,
    #[serde(default, alias = "sequence_steps")]
    playlist_steps: Vec<serde_json::Value>,
    #[serde(default)]
    continuous_surfaces: Vec<serde_json::Value>,
    #[serde(default)]
    sequence_order: Option<Vec<serde_json::Value>>,
}

/// What a restore did. `skipped` holds one line per entry that was not applied.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RestoreReport {
    pub surfaces: usize,
    pub media_loaded: usize,
    pub steps: usize,
    pub skipped: Vec<String>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

impl ProjectSnapshot {
    pub fn capture(stage: &Stage, scheduler: &PlaybackScheduler) -> Self {
        let surfaces = stage
            .surfaces()
            .iter()
            .map(|s| SurfaceEntry {
                name: s.name.clone(),
                corners: s.corners,
                opacity: s.opacity(),
                media_path: s.media_path.clone(),
            })
            .collect();
        Self {
            version: SNAPSHOT_VERSION,
            surfaces,
            playback_mode: scheduler.mode(),
            playlist_steps: scheduler.playlist().to_vec(),
            continuous_surfaces: scheduler.continuous().iter().copied().collect(),
            sequence_order: None,
        }
    }

    pub fn to_json(&self) -> MapperResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot, dropping malformed entries. Fails only when the
    /// document itself is unusable; `rejected` notes every dropped entry.
    pub fn from_json(json: &str) -> MapperResult<(Self, Vec<String>)> {
        let raw: LenientSnapshot = serde_json::from_str(json)
            .map_err(|e| MapperError::Restore(format!("invalid project file: {e}")))?;
        let mut rejected = Vec::new();

        let (surfaces, index_map) = parse_surfaces(raw.surfaces, &mut rejected);
        let playlist_steps: Vec<PlaylistStep> =
            parse_entries(raw.playlist_steps, "playlist step", &mut rejected)
                .into_iter()
                .filter_map(|mut step: PlaylistStep| {
                    step.surface_index =
                        remap_index(&index_map, step.surface_index, "playlist step", &mut rejected)?;
                    Some(step)
                })
                .collect();
        let continuous_surfaces: Vec<usize> =
            parse_entries(raw.continuous_surfaces, "continuous surface", &mut rejected)
                .into_iter()
                .filter_map(|i| remap_index(&index_map, i, "continuous surface", &mut rejected))
                .collect();
        let sequence_order = raw.sequence_order.map(|order| {
            parse_entries(order, "sequence order entry", &mut rejected)
                .into_iter()
                .filter_map(|i| remap_index(&index_map, i, "sequence order entry", &mut rejected))
                .collect()
        });

        let playback_mode = match raw.playback_mode {
            None => PlaybackMode::default(),
            Some(v) => serde_json::from_value(v).unwrap_or_else(|e| {
                rejected.push(format!("playback mode: {e}"));
                PlaybackMode::default()
            }),
        };

        Ok((
            Self {
                version: raw.version,
                surfaces,
                playback_mode,
                playlist_steps,
                continuous_surfaces,
                sequence_order,
            },
            rejected,
        ))
    }

    /// Steps to apply: the stored playlist, or one migrated from a legacy
    /// `sequence_order` using each surface's own media.
    fn effective_steps(&self) -> Vec<PlaylistStep> {
        if !self.playlist_steps.is_empty() {
            return self.playlist_steps.clone();
        }
        let Some(order) = &self.sequence_order else {
            return Vec::new();
        };
        order
            .iter()
            .filter_map(|&index| {
                let path = self.surfaces.get(index)?.media_path.clone()?;
                let kind = MediaKind::from_path(&path)?;
                Some(PlaylistStep::new(index, path, kind))
            })
            .collect()
    }

    /// Replace everything on `stage` with this snapshot and reset playback.
    ///
    /// Media that cannot be opened leaves its surface empty; invalid playlist
    /// indices are dropped. Neither aborts the restore.
    pub fn restore(
        &self,
        stage: &mut Stage,
        scheduler: &mut PlaybackScheduler,
        now: Instant,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        stage.clear();

        for entry in &self.surfaces {
            let index = stage
                .surfaces_mut()
                .push(entry.name.clone(), entry.corners, entry.opacity);
            report.surfaces += 1;

            let Some(path) = &entry.media_path else {
                continue;
            };
            let loaded = match MediaKind::from_path(path) {
                Some(kind) => stage.assign(index, path, kind, true),
                None => Err(MapperError::media_open(path, "unsupported media")),
            };
            match loaded {
                Ok(()) => report.media_loaded += 1,
                Err(e) => {
                    report.skipped.push(format!("{}: {e}", entry.name));
                    // The path stays for the next capture.
                    if let Some(surface) = stage.surfaces_mut().get_mut(index) {
                        surface.media_path = Some(path.clone());
                    }
                }
            }
        }

        let steps = self.effective_steps();
        let count = stage.surfaces().len();
        for step in steps.iter().filter(|s| s.surface_index >= count) {
            report.skipped.push(format!(
                "playlist step for missing surface {}",
                step.surface_index
            ));
        }
        let continuous: ContinuousSet = self.continuous_surfaces.iter().copied().collect();
        for index in continuous.iter().filter(|i| **i >= count) {
            report
                .skipped
                .push(format!("continuous surface {index} does not exist"));
        }

        scheduler.configure(self.playback_mode, steps, continuous, stage, now);
        report.steps = scheduler.playlist().len();

        for line in &report.skipped {
            log::warn!("Restore skipped {line}");
        }
        log::info!(
            "Restored {} surfaces ({} with media), {} steps, {} mode",
            report.surfaces,
            report.media_loaded,
            report.steps,
            self.playback_mode
        );
        report
    }
}

/// Parse surfaces, returning a map from stored position to restored index.
/// Malformed surfaces map to `None`.
fn parse_surfaces(
    values: Vec<serde_json::Value>,
    rejected: &mut Vec<String>,
) -> (Vec<SurfaceEntry>, Vec<Option<usize>>) {
    let mut surfaces = Vec::with_capacity(values.len());
    let mut index_map = Vec::with_capacity(values.len());
    for (i, v) in values.into_iter().enumerate() {
        match serde_json::from_value::<SurfaceEntry>(v) {
            Ok(entry) => {
                index_map.push(Some(surfaces.len()));
                surfaces.push(entry);
            }
            Err(e) => {
                rejected.push(format!("surface #{i}: {e}"));
                index_map.push(None);
            }
        }
    }
    (surfaces, index_map)
}

/// Translate a stored surface index after malformed surfaces were dropped.
/// Indices past the stored list stay out of range so restore reports them.
fn remap_index(
    index_map: &[Option<usize>],
    index: usize,
    what: &str,
    rejected: &mut Vec<String>,
) -> Option<usize> {
    match index_map.get(index) {
        Some(Some(new)) => Some(*new),
        Some(None) => {
            rejected.push(format!("{what} for malformed surface #{index}"));
            None
        }
        None => Some(index),
    }
}

fn parse_entries<T: serde::de::DeserializeOwned>(
    values: Vec<serde_json::Value>,
    what: &str,
    rejected: &mut Vec<String>,
) -> Vec<T> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match serde_json::from_value(v) {
            Ok(entry) => Some(entry),
            Err(e) => {
                rejected.push(format!("{what} #{i}: {e}"));
                None
            }
        })
        .collect()
}
