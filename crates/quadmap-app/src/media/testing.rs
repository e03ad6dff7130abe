//! In-memory decoders and openers for tests.

use std::collections::HashMap;
use std::path::Path;

use super::decoder::{FrameDecoder, MediaOpener};
use super::types::Frame;
use crate::error::{MapperError, MapperResult};

/// Frame `i` is a 2x2 frame whose first byte is `i`.
pub fn frame_index(frame: &Frame) -> u8 {
    frame.data[0]
}

/// Decoder producing `frames` tiny frames and then end-of-stream.
pub struct ScriptedDecoder {
    frames: u8,
    pos: u8,
    fail_at: Option<u8>,
    broken_rewind: bool,
}

impl ScriptedDecoder {
    pub fn new(frames: u8) -> Self {
        Self {
            frames,
            pos: 0,
            fail_at: None,
            broken_rewind: false,
        }
    }

    /// Fail once when about to produce frame `index`.
    pub fn failing_at(mut self, index: u8) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn broken_rewind(mut self) -> Self {
        self.broken_rewind = true;
        self
    }
}

impl FrameDecoder for ScriptedDecoder {
    fn next_frame(&mut self) -> MapperResult<Option<Frame>> {
        if self.fail_at == Some(self.pos) {
            self.fail_at = None;
            return Err(MapperError::DecodeStall("scripted stall".into()));
        }
        if self.pos >= self.frames {
            return Ok(None);
        }
        let frame = Frame::solid(2, 2, [self.pos, 0, 0, 255]);
        self.pos += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> MapperResult<()> {
        if self.broken_rewind {
            return Err(MapperError::DecodeStall("scripted rewind failure".into()));
        }
        self.pos = 0;
        Ok(())
    }
}

/// Opener backed by a table of known paths. Unknown paths fail to open.
#[derive(Default)]
pub struct FakeOpener {
    videos: HashMap<String, u8>,
    images: HashMap<String, [u8; 4]>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, path: &str, frames: u8) -> Self {
        self.videos.insert(path.to_string(), frames);
        self
    }

    pub fn with_image(mut self, path: &str, rgba: [u8; 4]) -> Self {
        self.images.insert(path.to_string(), rgba);
        self
    }
}

impl MediaOpener for FakeOpener {
    fn open_video(&self, path: &Path) -> MapperResult<Box<dyn FrameDecoder>> {
        let key = path.to_string_lossy();
        match self.videos.get(key.as_ref()) {
            Some(&frames) => Ok(Box::new(ScriptedDecoder::new(frames))),
            None => Err(MapperError::media_open(path, "file not found")),
        }
    }

    fn open_image(&self, path: &Path) -> MapperResult<Frame> {
        let key = path.to_string_lossy();
        match self.images.get(key.as_ref()) {
            Some(&rgba) => Ok(Frame::solid(4, 4, rgba)),
            None => Err(MapperError::media_open(path, "file not found")),
        }
    }
}
