//! Surfaces together with the media they own.
//!
//! Every video assignment creates its own `VideoSource`, even for a file that
//! is already playing elsewhere, and every replacement or deletion releases
//! the previous one before returning.

use std::path::Path;
use std::sync::Arc;

use crate::error::{MapperError, MapperResult};
use crate::media::{MediaKind, MediaOpener, MediaRegistry, SharedFrame, VideoSource};
use crate::surface::{CanvasSize, MediaRef, Surface, SurfaceSet};

pub struct Stage {
    surfaces: SurfaceSet,
    registry: MediaRegistry,
    opener: Box<dyn MediaOpener>,
    canvas: CanvasSize,
}

impl Stage {
    pub fn new(canvas: CanvasSize, opener: Box<dyn MediaOpener>) -> Self {
        Self {
            surfaces: SurfaceSet::new(),
            registry: MediaRegistry::new(),
            opener,
            canvas,
        }
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn surfaces(&self) -> &SurfaceSet {
        &self.surfaces
    }

    /// Geometry and selection edits. Media changes go through `assign_*`.
    pub fn surfaces_mut(&mut self) -> &mut SurfaceSet {
        &mut self.surfaces
    }

    /// Shared with the decode thread.
    pub fn registry(&self) -> &MediaRegistry {
        &self.registry
    }

    pub fn add_surface(&mut self) -> usize {
        let index = self.surfaces.add(self.canvas);
        log::info!("Added surface {} at index {index}", self.surfaces.len());
        index
    }

    /// Delete a surface and release whatever it was showing.
    pub fn remove_surface(&mut self, index: usize) -> MapperResult<Surface> {
        let mut surface = self.surfaces.remove(index)?;
        self.release(&mut surface);
        log::info!("Deleted surface '{}' (index {index})", surface.name);
        Ok(surface)
    }

    /// Delete every surface and release all media.
    pub fn clear(&mut self) {
        for mut surface in self.surfaces.drain() {
            self.release(&mut surface);
        }
        self.registry.clear();
    }

    pub fn assign(
        &mut self,
        index: usize,
        path: &Path,
        kind: MediaKind,
        looping: bool,
    ) -> MapperResult<()> {
        match kind {
            MediaKind::Video => self.assign_video(index, path, looping),
            MediaKind::Image => self.assign_image(index, path),
        }
    }

    /// Replace the surface's media with a fresh video source.
    ///
    /// On failure the surface is left with no media.
    pub fn assign_video(&mut self, index: usize, path: &Path, looping: bool) -> MapperResult<()> {
        self.ensure_surface(index)?;
        let media = self.opener.open_video(path).map(|decoder| {
            let id = self.registry.insert(VideoSource::new(path, decoder, looping));
            log::info!("Surface {index}: video {} ({id})", path.display());
            MediaRef::Video(id)
        });
        self.install(index, path, media)
    }

    /// Replace the surface's media with a still image.
    pub fn assign_image(&mut self, index: usize, path: &Path) -> MapperResult<()> {
        self.ensure_surface(index)?;
        let media = self.opener.open_image(path).map(|frame| {
            log::info!("Surface {index}: image {}", path.display());
            MediaRef::Image(Arc::new(frame))
        });
        self.install(index, path, media)
    }

    pub fn clear_media(&mut self, index: usize) -> MapperResult<()> {
        self.ensure_surface(index)?;
        self.install_none(index);
        Ok(())
    }

    fn ensure_surface(&self, index: usize) -> MapperResult<()> {
        if index < self.surfaces.len() {
            Ok(())
        } else {
            Err(MapperError::InvalidOperation("no such surface"))
        }
    }

    fn install(
        &mut self,
        index: usize,
        path: &Path,
        media: MapperResult<MediaRef>,
    ) -> MapperResult<()> {
        match media {
            Ok(media) => {
                if let Some(surface) = self.surfaces.get_mut(index) {
                    let mut old = std::mem::replace(&mut surface.media, media);
                    surface.media_path = Some(path.to_path_buf());
                    release_ref(&self.registry, &mut old);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Surface {index}: {e}");
                self.install_none(index);
                Err(e)
            }
        }
    }

    fn install_none(&mut self, index: usize) {
        if let Some(surface) = self.surfaces.get_mut(index) {
            let mut old = std::mem::take(&mut surface.media);
            surface.media_path = None;
            release_ref(&self.registry, &mut old);
        }
    }

    fn release(&self, surface: &mut Surface) {
        release_ref(&self.registry, &mut surface.media);
        surface.media_path = None;
    }

    pub fn video(&self, index: usize) -> Option<Arc<VideoSource>> {
        let id = self.surfaces.get(index)?.media.video_id()?;
        self.registry.get(id)
    }

    /// The surface's current frame, ignoring any playback gating.
    pub fn frame_of(&self, index: usize) -> Option<SharedFrame> {
        match &self.surfaces.get(index)?.media {
            MediaRef::None => None,
            MediaRef::Video(id) => self.registry.get(*id)?.current_frame(),
            MediaRef::Image(frame) => Some(frame.clone()),
        }
    }

    /// Whether the surface currently shows the file at `path`.
    pub fn shows_path(&self, index: usize, path: &Path) -> bool {
        self.surfaces
            .get(index)
            .is_some_and(|s| !s.media.is_none() && s.media_path.as_deref() == Some(path))
    }
}

fn release_ref(registry: &MediaRegistry, media: &mut MediaRef) {
    if let MediaRef::Video(id) = std::mem::take(media) {
        registry.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::testing::FakeOpener;

    fn stage() -> Stage {
        let opener = FakeOpener::new()
            .with_video("a.mp4", 3)
            .with_video("b.mp4", 3)
            .with_image("img.png", [9, 9, 9, 255]);
        Stage::new(CanvasSize::default(), Box::new(opener))
    }

    #[test]
    fn assign_video_creates_own_source_per_surface() {
        let mut st = stage();
        st.add_surface();
        st.add_surface();
        st.assign_video(0, Path::new("a.mp4"), true).unwrap();
        st.assign_video(1, Path::new("a.mp4"), true).unwrap();
        assert_eq!(st.registry().len(), 2);
        let a = st.video(0).unwrap();
        let b = st.video(1).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(st.surfaces().get(0).unwrap().media_kind(), Some(MediaKind::Video));
    }

    #[test]
    fn swap_releases_previous_source() {
        let mut st = stage();
        st.add_surface();
        st.assign_video(0, Path::new("a.mp4"), true).unwrap();
        let old = st.video(0).unwrap();
        st.assign_image(0, Path::new("img.png")).unwrap();
        assert!(old.is_released());
        assert!(st.registry().is_empty());
        assert!(st.frame_of(0).is_some());
        assert!(st.shows_path(0, Path::new("img.png")));
    }

    #[test]
    fn failed_open_reverts_to_no_media() {
        let mut st = stage();
        st.add_surface();
        st.assign_video(0, Path::new("a.mp4"), true).unwrap();
        let old = st.video(0).unwrap();
        let err = st.assign_video(0, Path::new("missing.mp4"), true).unwrap_err();
        assert!(matches!(err, MapperError::MediaOpen { .. }));
        let s = st.surfaces().get(0).unwrap();
        assert!(s.media.is_none());
        assert!(s.media_path.is_none());
        assert!(old.is_released());
    }

    #[test]
    fn remove_surface_releases_media() {
        let mut st = stage();
        st.add_surface();
        st.add_surface();
        st.assign_video(1, Path::new("b.mp4"), true).unwrap();
        let src = st.video(1).unwrap();
        st.remove_surface(1).unwrap();
        assert!(src.is_released());
        assert!(st.registry().is_empty());
        assert_eq!(st.surfaces().len(), 1);
        assert!(st.remove_surface(4).is_err());
    }

    #[test]
    fn frame_of_video_waits_for_decode() {
        let mut st = stage();
        st.add_surface();
        st.assign_video(0, Path::new("a.mp4"), true).unwrap();
        assert!(st.frame_of(0).is_none());
        st.video(0).unwrap().advance();
        assert!(st.frame_of(0).is_some());
    }

    #[test]
    fn clear_releases_everything() {
        let mut st = stage();
        st.add_surface();
        st.assign_video(0, Path::new("a.mp4"), true).unwrap();
        let src = st.video(0).unwrap();
        st.clear();
        assert!(st.surfaces().is_empty());
        assert!(src.is_released());
    }

    #[test]
    fn assign_to_missing_surface_is_invalid() {
        let mut st = stage();
        assert!(matches!(
            st.assign_image(0, Path::new("img.png")),
            Err(MapperError::InvalidOperation(_))
        ));
    }
}
