use std::path::Path;

use image::imageops::FilterType;

use super::types::{Frame, fit_within};
use super::video::{FfmpegDecoder, FfmpegTools};
use crate::error::{MapperError, MapperResult};

/// A sequential frame producer behind a video source.
///
/// Only the decode thread (and release/swap paths on the render thread) ever
/// touch a decoder, always through the owning source's decoder lock.
pub trait FrameDecoder: Send {
    /// Decode the next frame. `Ok(None)` means end-of-stream; an error means
    /// this read failed but the stream may still recover.
    fn next_frame(&mut self) -> MapperResult<Option<Frame>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> MapperResult<()>;
}

/// Opens media files into decoders or still frames.
pub trait MediaOpener {
    fn open_video(&self, path: &Path) -> MapperResult<Box<dyn FrameDecoder>>;
    fn open_image(&self, path: &Path) -> MapperResult<Frame>;
}

/// Opens real files: videos through ffmpeg, images through the `image` crate.
pub struct FsMediaOpener {
    pub max_dimension: u32,
    pub tools: FfmpegTools,
}

impl FsMediaOpener {
    pub fn new(max_dimension: u32, tools: FfmpegTools) -> Self {
        Self {
            max_dimension,
            tools,
        }
    }
}

impl MediaOpener for FsMediaOpener {
    fn open_video(&self, path: &Path) -> MapperResult<Box<dyn FrameDecoder>> {
        if !path.exists() {
            return Err(MapperError::media_open(path, "file not found"));
        }
        if !self.tools.available() {
            return Err(MapperError::media_open(
                path,
                format!("'{}' not found on PATH", self.tools.ffprobe),
            ));
        }
        let decoder = FfmpegDecoder::open(&self.tools, path, self.max_dimension)?;
        Ok(Box::new(decoder))
    }

    fn open_image(&self, path: &Path) -> MapperResult<Frame> {
        load_image(path, self.max_dimension)
    }
}

/// Load a still image as RGBA8, downscaled to fit `max_dimension`.
pub fn load_image(path: &Path, max_dimension: u32) -> MapperResult<Frame> {
    let img = image::open(path).map_err(|e| MapperError::media_open(path, e))?;
    let (src_w, src_h) = (img.width(), img.height());
    let (w, h) = fit_within(src_w, src_h, max_dimension);
    let img = if (w, h) != (src_w, src_h) {
        img.resize_exact(w, h, FilterType::Triangle)
    } else {
        img
    };
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    log::info!(
        "Loaded image {}: {}x{} (source {}x{})",
        path.display(),
        w,
        h,
        src_w,
        src_h
    );

    Ok(Frame::new(rgba.into_raw(), w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_image_missing_file_is_media_open_error() {
        let err = load_image(Path::new("/definitely/not/here.png"), 1280).unwrap_err();
        assert!(matches!(err, MapperError::MediaOpen { .. }));
    }

    #[test]
    fn load_image_downscales_large_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        image::RgbaImage::from_pixel(400, 100, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let frame = load_image(&path, 200).unwrap();
        assert_eq!((frame.width, frame.height), (200, 50));
        assert_eq!(frame.data.len(), 200 * 50 * 4);
        assert_eq!(&frame.data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn load_image_keeps_small_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        image::RgbaImage::from_pixel(8, 4, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();

        let frame = load_image(&path, 1280).unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
    }

    #[test]
    fn fs_opener_rejects_missing_video() {
        let opener = FsMediaOpener::new(1280, FfmpegTools::default());
        let err = opener.open_video(Path::new("/nope/clip.mp4")).err().unwrap();
        assert!(matches!(err, MapperError::MediaOpen { .. }));
    }
}
