//! What each output draws for each surface.
//!
//! Both outputs read the same stage and scheduler but disagree on how to show
//! a surface without a frame: the preview marks it with a gray placeholder,
//! the projector must leave it dark.

use crate::media::SharedFrame;
use crate::playback::PlaybackScheduler;
use crate::stage::Stage;
use crate::surface::{Point, SurfaceId};

use super::quad::Rgba;

pub const PLACEHOLDER: Rgba = [0.5, 0.5, 0.5, 0.5];
pub const SELECTED: Rgba = [0.0, 1.0, 0.0, 1.0];
pub const UNSELECTED: Rgba = [0.0, 1.0, 1.0, 1.0];
pub const HANDLE: Rgba = [1.0, 1.0, 0.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Preview,
    Fullscreen,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayFlags {
    /// Fullscreen corner editing.
    pub edit_mode: bool,
    /// Outlines and handles on the fullscreen output while editing.
    pub show_controls: bool,
    pub blackout: bool,
}

#[derive(Debug, Clone)]
pub enum Fill {
    Textured { frame: SharedFrame, opacity: f32 },
    Placeholder,
    Nothing,
}

#[derive(Debug, Clone)]
pub struct DrawItem {
    pub surface_index: usize,
    pub id: SurfaceId,
    pub corners: [Point; 4],
    pub fill: Fill,
    /// Color and pixel width.
    pub outline: Option<(Rgba, f32)>,
    /// Color and pixel size.
    pub handles: Option<(Rgba, f32)>,
}

/// Draw list for one output, in surface order (later surfaces on top).
pub fn plan(
    kind: OutputKind,
    stage: &Stage,
    scheduler: &PlaybackScheduler,
    flags: OverlayFlags,
) -> Vec<DrawItem> {
    if kind == OutputKind::Fullscreen && flags.blackout {
        return Vec::new();
    }
    let surfaces = stage.surfaces();
    let selected = surfaces.selected_index();
    surfaces
        .iter()
        .enumerate()
        .map(|(i, surface)| {
            let is_selected = selected == Some(i);
            let fill = match scheduler.frame_for(i, stage) {
                Some(frame) => Fill::Textured {
                    frame,
                    opacity: surface.opacity(),
                },
                None if kind == OutputKind::Preview => Fill::Placeholder,
                None => Fill::Nothing,
            };
            let (outline, handles) = match kind {
                OutputKind::Preview if is_selected => {
                    (Some((SELECTED, 2.0)), Some((HANDLE, 8.0)))
                }
                OutputKind::Preview => (None, None),
                OutputKind::Fullscreen if flags.edit_mode && flags.show_controls => {
                    if is_selected {
                        (Some((SELECTED, 3.0)), Some((HANDLE, 10.0)))
                    } else {
                        (Some((UNSELECTED, 2.0)), Some((HANDLE, 7.0)))
                    }
                }
                OutputKind::Fullscreen => (None, None),
            };
            DrawItem {
                surface_index: i,
                id: surface.id,
                corners: surface.corners,
                fill,
                outline,
                handles,
            }
        })
        .collect()
}
