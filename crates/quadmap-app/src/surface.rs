use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MapperError, MapperResult};
use crate::media::{MediaId, MediaKind, SharedFrame};

/// A point in canvas space: origin top-left, y down.
pub type Point = [f32; 2];

/// Fixed virtual resolution all geometry is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: f32,
    pub height: f32,
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

/// Process-unique surface identity, stable across index shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

/// What a surface currently holds.
#[derive(Debug, Clone, Default)]
pub enum MediaRef {
    #[default]
    None,
    Video(MediaId),
    Image(SharedFrame),
}

impl MediaRef {
    pub fn kind(&self) -> Option<MediaKind> {
        match self {
            MediaRef::None => None,
            MediaRef::Video(_) => Some(MediaKind::Video),
            MediaRef::Image(_) => Some(MediaKind::Image),
        }
    }

    pub fn video_id(&self) -> Option<MediaId> {
        match self {
            MediaRef::Video(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, MediaRef::None)
    }
}

/// A warped quad on the canvas.
///
/// Corners are stored in perimeter order. Slot `i` receives texture corner
/// `i` of (0,0) (1,0) (1,1) (0,1), so a fresh surface maps the image upright:
/// top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone)]
pub struct Surface {
    pub id: SurfaceId,
    pub name: String,
    pub corners: [Point; 4],
    opacity: f32,
    pub media: MediaRef,
    /// Path of the assigned media. A restored surface whose file could not be
    /// opened keeps its path with `media` left at `None`.
    pub media_path: Option<PathBuf>,
}

impl Surface {
    pub fn new(id: SurfaceId, name: impl Into<String>, corners: [Point; 4]) -> Self {
        Self {
            id,
            name: name.into(),
            corners,
            opacity: 1.0,
            media: MediaRef::None,
            media_path: None,
        }
    }

    /// Default quad inset from the canvas edges by a quarter of the short side.
    pub fn centered(id: SurfaceId, name: impl Into<String>, canvas: CanvasSize) -> Self {
        let (w, h) = (canvas.width, canvas.height);
        let m = (w.min(h) / 4.0).floor();
        Self::new(id, name, [[m, m], [w - m, m], [w - m, h - m], [m, h - m]])
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_nan() {
            1.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        self.media.kind()
    }

    /// Rotate the mapped image 90 degrees clockwise by shifting which stored
    /// point plays which corner role. Positions are untouched.
    pub fn rotate_cw(&mut self) {
        self.corners.rotate_right(1);
    }

    pub fn rotate_ccw(&mut self) {
        self.corners.rotate_left(1);
    }

    /// Nearest corner strictly within `threshold` of `p`.
    pub fn closest_corner(&self, p: Point, threshold: f32) -> Option<usize> {
        self.corners
            .iter()
            .enumerate()
            .map(|(i, c)| (i, distance(*c, p)))
            .filter(|(_, d)| *d < threshold)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    pub fn set_corner(&mut self, corner: usize, p: Point) -> MapperResult<()> {
        let slot = self
            .corners
            .get_mut(corner)
            .ok_or(MapperError::InvalidOperation("corner index out of range"))?;
        *slot = p;
        Ok(())
    }
}

fn distance(a: Point, b: Point) -> f32 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}

/// Ordered surfaces plus the editor's selection.
#[derive(Debug, Default)]
pub struct SurfaceSet {
    surfaces: Vec<Surface>,
    selected: Option<usize>,
    next_id: u64,
}

impl SurfaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> SurfaceId {
        self.next_id += 1;
        SurfaceId(self.next_id)
    }

    /// Add a default centered surface and select it.
    pub fn add(&mut self, canvas: CanvasSize) -> usize {
        let id = self.allocate_id();
        let name = format!("Surface {}", self.surfaces.len() + 1);
        self.surfaces.push(Surface::centered(id, name, canvas));
        let index = self.surfaces.len() - 1;
        self.selected = Some(index);
        index
    }

    /// Add a surface with explicit geometry. Does not change the selection.
    pub fn push(&mut self, name: impl Into<String>, corners: [Point; 4], opacity: f32) -> usize {
        let id = self.allocate_id();
        let mut surface = Surface::new(id, name, corners);
        surface.set_opacity(opacity);
        self.surfaces.push(surface);
        self.surfaces.len() - 1
    }

    /// Remove the surface at `index`. Selection is cleared.
    /// The caller owns releasing its media.
    pub fn remove(&mut self, index: usize) -> MapperResult<Surface> {
        if index >= self.surfaces.len() {
            return Err(MapperError::InvalidOperation("no such surface"));
        }
        self.selected = None;
        Ok(self.surfaces.remove(index))
    }

    pub fn drain(&mut self) -> Vec<Surface> {
        self.selected = None;
        self.surfaces.drain(..).collect()
    }

    pub fn select(&mut self, index: Option<usize>) -> MapperResult<()> {
        match index {
            Some(i) if i >= self.surfaces.len() => {
                Err(MapperError::InvalidOperation("no such surface"))
            }
            _ => {
                self.selected = index;
                Ok(())
            }
        }
    }

    /// Move the selection by `delta`, wrapping. Selects the first surface
    /// when nothing is selected.
    pub fn cycle_selection(&mut self, delta: isize) {
        let n = self.surfaces.len();
        if n == 0 {
            self.selected = None;
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) => (i as isize + delta).rem_euclid(n as isize) as usize,
            None => 0,
        });
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    /// The selected index, or `InvalidOperation` when nothing is selected.
    pub fn require_selected(&self) -> MapperResult<usize> {
        self.selected
            .filter(|i| *i < self.surfaces.len())
            .ok_or(MapperError::InvalidOperation("no surface selected"))
    }

    pub fn selected_mut(&mut self) -> MapperResult<&mut Surface> {
        let i = self.require_selected()?;
        Ok(&mut self.surfaces[i])
    }

    /// Corner under `p` across every surface: the nearest one wins.
    pub fn hit_any_corner(&self, p: Point, threshold: f32) -> Option<(usize, usize)> {
        self.surfaces
            .iter()
            .enumerate()
            .filter_map(|(si, s)| {
                s.closest_corner(p, threshold)
                    .map(|ci| (si, ci, distance(s.corners[ci], p)))
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(si, ci, _)| (si, ci))
    }

    pub fn get(&self, index: usize) -> Option<&Surface> {
        self.surfaces.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Surface> {
        self.surfaces.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Surface> {
        self.surfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
