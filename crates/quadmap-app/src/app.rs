use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::control::{LiveControl, SLOT_COUNT};
use crate::error::{MapperError, MapperResult};
use crate::gpu::{DrawItem, OutputKind, OverlayFlags, plan};
use crate::media::{DecodeThread, FsMediaOpener, MediaKind, MediaOpener};
use crate::playback::{PlaybackMode, PlaybackScheduler, PlaylistStep};
use crate::project::store::{load_from, save_to};
use crate::project::{ProjectSnapshot, ProjectStore, RestoreReport};
use crate::settings::SettingsConfig;
use crate::stage::Stage;
use crate::surface::Point;

const FPS_WINDOW: Duration = Duration::from_secs(5);

/// A corner being dragged with the pointer on one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CornerDrag {
    output: OutputKind,
    surface: usize,
    corner: usize,
}

/// Frames rendered per window of time.
#[derive(Debug)]
struct FpsCounter {
    frames: u32,
    since: Instant,
    last: Option<f32>,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            since: now,
            last: None,
        }
    }

    /// Count a frame. Returns the rate once per window.
    fn frame(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed < FPS_WINDOW {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.since = now;
        self.last = Some(fps);
        Some(fps)
    }
}

/// Render-thread state: surfaces, playback, live control and editing.
///
/// Only the decode thread runs elsewhere; it shares the stage's media
/// registry and nothing else.
pub struct App {
    pub stage: Stage,
    pub scheduler: PlaybackScheduler,
    pub control: LiveControl,
    pub settings: SettingsConfig,
    pub projects: ProjectStore,
    decode: Option<DecodeThread>,
    pub edit_mode: bool,
    pub show_controls: bool,
    drag: Option<CornerDrag>,
    fps: FpsCounter,
    pub quit_requested: bool,
}

impl App {
    pub fn new(settings: SettingsConfig) -> Result<Self> {
        if !settings.ffmpeg.available() {
            log::warn!(
                "{} not found, video surfaces will fail to open",
                settings.ffmpeg.ffprobe
            );
        }
        let opener = FsMediaOpener::new(settings.max_frame_dimension, settings.ffmpeg.clone());
        let mut app = Self::with_opener(settings, Box::new(opener));
        app.projects.scan();
        app.decode = Some(DecodeThread::spawn(
            app.stage.registry().clone(),
            app.settings.decode_rate_hz,
        )?);
        Ok(app)
    }

    /// State without a decode thread; media advances only when asked.
    pub fn with_opener(settings: SettingsConfig, opener: Box<dyn MediaOpener>) -> Self {
        let now = Instant::now();
        let mut control = LiveControl::new(settings.slot_loop_interval());
        for (slot, path) in settings.slots.iter().enumerate() {
            if let Some(path) = path {
                // A fresh control always has the show enabled.
                let _ = control.assign_slot(slot, path.clone());
            }
        }
        Self {
            stage: Stage::new(settings.canvas, opener),
            scheduler: PlaybackScheduler::new(settings.image_duration()),
            control,
            projects: ProjectStore::new(),
            decode: None,
            edit_mode: false,
            show_controls: true,
            drag: None,
            fps: FpsCounter::new(now),
            quit_requested: false,
            settings,
        }
    }

    /// One render-loop step: slot loop, then playback.
    pub fn tick(&mut self, now: Instant) {
        if let Some(path) = self.control.poll(now) {
            if let Err(e) = self.restore_from(&path, now) {
                log::warn!("Slot loop could not restore {}: {e:#}", path.display());
            }
        }
        self.scheduler.tick(&mut self.stage, now);
    }

    pub fn frame_rendered(&mut self, now: Instant) {
        if let Some(fps) = self.fps.frame(now) {
            log::debug!("Preview: {fps:.1} fps");
        }
    }

    pub fn last_fps(&self) -> Option<f32> {
        self.fps.last
    }

    pub fn overlay_flags(&self) -> OverlayFlags {
        OverlayFlags {
            edit_mode: self.edit_mode,
            show_controls: self.show_controls,
            blackout: self.control.blackout(),
        }
    }

    pub fn draw_list(&self, output: OutputKind) -> Vec<DrawItem> {
        plan(output, &self.stage, &self.scheduler, self.overlay_flags())
    }

    // --- Surfaces ---

    pub fn add_surface(&mut self) -> usize {
        self.stage.add_surface()
    }

    pub fn delete_selected(&mut self, now: Instant) -> MapperResult<()> {
        let index = self.stage.surfaces().require_selected()?;
        self.stage.remove_surface(index)?;
        self.scheduler.on_surface_removed(index, &mut self.stage, now);
        self.drag = None;
        Ok(())
    }

    pub fn cycle_selection(&mut self, delta: isize) {
        self.stage.surfaces_mut().cycle_selection(delta);
    }

    pub fn rotate_selected(&mut self, clockwise: bool) -> MapperResult<()> {
        let surface = self.stage.surfaces_mut().selected_mut()?;
        if clockwise {
            surface.rotate_cw();
        } else {
            surface.rotate_ccw();
        }
        Ok(())
    }

    pub fn adjust_opacity(&mut self, delta: f32) -> MapperResult<f32> {
        let surface = self.stage.surfaces_mut().selected_mut()?;
        surface.set_opacity(surface.opacity() + delta);
        Ok(surface.opacity())
    }

    /// Put `path` on the selected surface. Playback restarts either way, since
    /// a failed open also removes the previous media.
    pub fn assign_media(&mut self, path: &Path, now: Instant) -> MapperResult<()> {
        let index = self.stage.surfaces().require_selected()?;
        let kind = MediaKind::from_path(path)
            .ok_or_else(|| MapperError::media_open(path, "unsupported file type"))?;
        let result = self.stage.assign(index, path, kind, true);
        self.scheduler.reset(&mut self.stage, now);
        result
    }

    pub fn clear_selected_media(&mut self, now: Instant) -> MapperResult<()> {
        let index = self.stage.surfaces().require_selected()?;
        self.stage.clear_media(index)?;
        self.scheduler.reset(&mut self.stage, now);
        Ok(())
    }

    // --- Pointer editing ---

    /// Start dragging a corner. The preview only grabs corners of the
    /// selected surface; the fullscreen output grabs any corner in edit mode
    /// and selects its surface.
    pub fn pointer_pressed(&mut self, output: OutputKind, p: Point) -> bool {
        let surfaces = self.stage.surfaces();
        self.drag = match output {
            OutputKind::Preview => surfaces.require_selected().ok().and_then(|surface| {
                surfaces
                    .get(surface)
                    .and_then(|s| s.closest_corner(p, self.settings.preview_hit_threshold))
                    .map(|corner| CornerDrag {
                        output,
                        surface,
                        corner,
                    })
            }),
            OutputKind::Fullscreen if self.edit_mode => surfaces
                .hit_any_corner(p, self.settings.fullscreen_hit_threshold)
                .map(|(surface, corner)| CornerDrag {
                    output,
                    surface,
                    corner,
                }),
            OutputKind::Fullscreen => None,
        };
        if let Some(drag) = self.drag {
            let _ = self.stage.surfaces_mut().select(Some(drag.surface));
        }
        self.drag.is_some()
    }

    /// Move the dragged corner. Motion on the other output is ignored.
    pub fn pointer_moved(&mut self, output: OutputKind, p: Point) {
        let Some(drag) = self.drag.filter(|d| d.output == output) else {
            return;
        };
        if let Some(surface) = self.stage.surfaces_mut().get_mut(drag.surface) {
            let _ = surface.set_corner(drag.corner, p);
        }
    }

    pub fn pointer_released(&mut self) {
        self.drag = None;
    }

    pub fn toggle_edit_mode(&mut self) -> bool {
        self.edit_mode = !self.edit_mode;
        self.drag = None;
        log::info!("Fullscreen edit mode {}", if self.edit_mode { "on" } else { "off" });
        self.edit_mode
    }

    pub fn toggle_controls(&mut self) -> bool {
        self.show_controls = !self.show_controls;
        self.show_controls
    }

    // --- Playback ---

    pub fn toggle_mode(&mut self, now: Instant) -> PlaybackMode {
        let mode = self.scheduler.mode().toggled();
        self.scheduler.set_mode(mode, &mut self.stage, now);
        mode
    }

    pub fn restart(&mut self, now: Instant) {
        self.scheduler.restart(&mut self.stage, now);
    }

    /// Append the selected surface's current media as a playlist step.
    pub fn append_selected_step(&mut self, now: Instant) -> MapperResult<()> {
        let index = self.stage.surfaces().require_selected()?;
        let step = self
            .stage
            .surfaces()
            .get(index)
            .and_then(|s| Some(PlaylistStep::new(index, s.media_path.clone()?, s.media_kind()?)))
            .ok_or(MapperError::InvalidOperation("selected surface has no media"))?;
        self.scheduler.append_step(step, &mut self.stage, now)
    }

    pub fn remove_last_step(&mut self, now: Instant) -> MapperResult<()> {
        let last = self
            .scheduler
            .playlist()
            .len()
            .checked_sub(1)
            .ok_or(MapperError::InvalidOperation("playlist is empty"))?;
        self.scheduler.remove_step(last, &mut self.stage, now)
    }

    pub fn move_step(&mut self, index: usize, up: bool, now: Instant) -> MapperResult<()> {
        self.scheduler.move_step(index, up, &mut self.stage, now)
    }

    pub fn toggle_selected_continuous(&mut self, now: Instant) -> MapperResult<()> {
        let index = self.stage.surfaces().require_selected()?;
        self.scheduler.toggle_continuous(index, &mut self.stage, now)
    }

    // --- Projects ---

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot::capture(&self.stage, &self.scheduler)
    }

    pub fn save_project_to(&self, path: &Path) -> Result<()> {
        save_to(path, &self.snapshot())
    }

    /// Save into the project directory under `name`.
    pub fn save_project(&mut self, name: &str) -> Result<()> {
        let snapshot = self.snapshot();
        self.projects.save(name, &snapshot)?;
        Ok(())
    }

    /// Remove the most recently loaded or saved project from the project
    /// directory. The running show is left untouched.
    pub fn delete_current_project(&mut self) -> Result<()> {
        let index = self
            .projects
            .current
            .ok_or_else(|| anyhow::anyhow!("No stored project is loaded"))?;
        self.projects.delete(index)
    }

    /// Replace the current show with the project at `path`. Entries that
    /// cannot be applied are listed in the report; the caller decides
    /// whether to surface them.
    pub fn restore_from(&mut self, path: &Path, now: Instant) -> Result<RestoreReport> {
        let (snapshot, rejected) = load_from(path)?;
        Ok(self.apply(snapshot, rejected, now))
    }

    /// Restore the stored project at `index`.
    pub fn restore_index(&mut self, index: usize, now: Instant) -> Result<RestoreReport> {
        let (snapshot, rejected) = self.projects.load(index)?;
        Ok(self.apply(snapshot, rejected, now))
    }

    fn apply(
        &mut self,
        snapshot: ProjectSnapshot,
        rejected: Vec<String>,
        now: Instant,
    ) -> RestoreReport {
        self.drag = None;
        let mut report = snapshot.restore(&mut self.stage, &mut self.scheduler, now);
        for line in &rejected {
            log::warn!("Restore skipped {line}");
        }
        report.skipped.splice(0..0, rejected);
        report
    }

    // --- Live control ---

    /// Restore slot `slot` silently: problems are logged, never shown.
    pub fn trigger_slot(&mut self, slot: usize, now: Instant) -> Result<()> {
        let path = self.control.trigger(slot)?;
        let report = self.restore_from(&path, now)?;
        if !report.is_clean() {
            log::info!(
                "Slot {} restored with {} skipped entries",
                slot + 1,
                report.skipped.len()
            );
        }
        Ok(())
    }

    /// Point `slot` at a project file and remember it in the settings.
    pub fn assign_slot(&mut self, slot: usize, path: &Path) -> MapperResult<()> {
        self.control.assign_slot(slot, path)?;
        if let Some(entry) = self.settings.slots.get_mut(slot) {
            *entry = Some(path.to_path_buf());
        }
        Ok(())
    }

    pub fn clear_slot(&mut self, slot: usize) -> MapperResult<()> {
        self.control.clear_slot(slot)?;
        if let Some(entry) = self.settings.slots.get_mut(slot) {
            *entry = None;
        }
        Ok(())
    }

    pub fn toggle_slot_in_loop(&mut self, slot: usize) -> MapperResult<bool> {
        self.control.toggle_in_loop(slot)
    }

    pub fn toggle_slot_loop(&mut self, now: Instant) -> Result<()> {
        if let Some(path) = self.control.toggle_loop(now)? {
            self.restore_from(&path, now)?;
        }
        Ok(())
    }

    pub fn toggle_show(&mut self) -> bool {
        self.control.toggle_show()
    }

    pub fn slot_count(&self) -> usize {
        SLOT_COUNT
    }

    /// Stop decoding, then release every source.
    pub fn shutdown(&mut self) {
        if let Some(mut decode) = self.decode.take() {
            decode.stop();
        }
        self.stage.clear();
        log::info!("Shut down");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if self.decode.is_some() {
            self.shutdown();
        }
    }
}
