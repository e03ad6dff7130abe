use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::decoder::FrameDecoder;
use super::types::{SharedFrame, TransportState};
use crate::error::MapperError;

/// Log the first stall and then every Nth one per source.
const STALL_LOG_EVERY: u32 = 30;

/// State shared between the decode thread and the render thread.
///
/// Held only for the duration of a read or write, never across a decode.
struct SourceState {
    transport: TransportState,
    current_frame: Option<SharedFrame>,
    /// Seek to frame 0 before the next decode.
    rewind_pending: bool,
    /// Bumped by every control call so a decode that raced with one is discarded.
    epoch: u64,
    released: bool,
    disabled: bool,
    stalls: u32,
}

enum DecodeOutcome {
    Frame(SharedFrame),
    Looped(Option<SharedFrame>),
    Finished,
    Stalled(MapperError),
    Broken(MapperError),
}

/// A decoded video stream bound to exactly one surface.
///
/// `advance()` runs on the decode thread; everything else may be called from
/// the render thread concurrently.
pub struct VideoSource {
    path: PathBuf,
    state: Mutex<SourceState>,
    decoder: Mutex<Option<Box<dyn FrameDecoder>>>,
}

impl VideoSource {
    pub fn new(path: impl Into<PathBuf>, decoder: Box<dyn FrameDecoder>, looping: bool) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(SourceState {
                transport: TransportState {
                    playing: true,
                    looping,
                    finished: false,
                },
                current_frame: None,
                rewind_pending: false,
                epoch: 0,
                released: false,
                disabled: false,
                stalls: 0,
            }),
            decoder: Mutex::new(Some(decoder)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decoder(&self) -> MutexGuard<'_, Option<Box<dyn FrameDecoder>>> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the next frame. Called from the decode thread only.
    pub fn advance(&self) {
        let (epoch, rewind, looping) = {
            let s = self.state();
            if s.released || s.disabled || !s.transport.playing || s.transport.finished {
                return;
            }
            (s.epoch, s.rewind_pending, s.transport.looping)
        };

        let outcome = {
            let mut guard = self.decoder();
            let Some(decoder) = guard.as_mut() else {
                return;
            };
            decode_step(decoder.as_mut(), rewind, looping)
        };

        let mut s = self.state();
        if s.released || s.epoch != epoch {
            return;
        }
        if rewind {
            s.rewind_pending = false;
        }
        match outcome {
            DecodeOutcome::Frame(frame) => {
                s.current_frame = Some(frame);
                s.stalls = 0;
            }
            DecodeOutcome::Looped(frame) => {
                log::debug!("Loop seam: {}", self.path.display());
                if let Some(frame) = frame {
                    s.current_frame = Some(frame);
                }
            }
            DecodeOutcome::Finished => {
                log::info!("Finished: {}", self.path.display());
                s.transport.finished = true;
                s.transport.playing = false;
            }
            DecodeOutcome::Stalled(e) => {
                if s.stalls % STALL_LOG_EVERY == 0 {
                    log::warn!("{e} (stall #{})", s.stalls + 1);
                }
                s.stalls = s.stalls.saturating_add(1);
            }
            DecodeOutcome::Broken(e) => {
                log::error!("Disabling source {}: {e}", self.path.display());
                s.disabled = true;
                s.transport.playing = false;
            }
        }
    }

    /// Most recently decoded frame, if any. Never blocks on decoding.
    pub fn current_frame(&self) -> Option<SharedFrame> {
        self.state().current_frame.clone()
    }

    /// Resume playback. A finished stream restarts from the beginning.
    pub fn play(&self) {
        let mut s = self.state();
        s.epoch += 1;
        s.transport.playing = true;
        if s.transport.finished {
            s.transport.finished = false;
            s.rewind_pending = true;
        }
    }

    pub fn pause(&self) {
        let mut s = self.state();
        s.epoch += 1;
        s.transport.playing = false;
    }

    /// Pause and seek to the start, keeping the last frame on screen.
    pub fn stop(&self) {
        let mut s = self.state();
        s.epoch += 1;
        s.transport.playing = false;
        s.transport.finished = false;
        s.rewind_pending = true;
    }

    pub fn set_looping(&self, looping: bool) {
        self.state().transport.looping = looping;
    }

    /// True only when end-of-stream was reached with looping disabled.
    pub fn is_finished(&self) -> bool {
        self.state().transport.finished
    }

    pub fn transport(&self) -> TransportState {
        self.state().transport
    }

    /// Whether the next decode will start from frame 0.
    pub fn rewind_pending(&self) -> bool {
        self.state().rewind_pending
    }

    /// Stop advancing permanently after an unrecoverable error.
    pub fn disable(&self) {
        let mut s = self.state();
        s.disabled = true;
        s.transport.playing = false;
    }

    pub fn is_disabled(&self) -> bool {
        self.state().disabled
    }

    /// Drop the decoder. Synchronous and idempotent: waits for an in-flight
    /// `advance()` to finish, after which no decode can touch the handle.
    pub fn release(&self) {
        let decoder = self.decoder().take();
        {
            let mut s = self.state();
            s.released = true;
            s.transport.playing = false;
        }
        if decoder.is_some() {
            log::debug!("Released source {}", self.path.display());
        }
        drop(decoder);
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }
}

fn decode_step(decoder: &mut dyn FrameDecoder, rewind: bool, looping: bool) -> DecodeOutcome {
    if rewind {
        if let Err(e) = decoder.rewind() {
            return DecodeOutcome::Broken(e);
        }
    }
    match decoder.next_frame() {
        Ok(Some(frame)) => DecodeOutcome::Frame(Arc::new(frame)),
        Ok(None) if looping => {
            // Decode the first frame right away so the seam never shows a stale or blank frame.
            if let Err(e) = decoder.rewind() {
                return DecodeOutcome::Broken(e);
            }
            match decoder.next_frame() {
                Ok(frame) => DecodeOutcome::Looped(frame.map(Arc::new)),
                Err(e) => DecodeOutcome::Stalled(e),
            }
        }
        Ok(None) => DecodeOutcome::Finished,
        Err(e) => DecodeOutcome::Stalled(e),
    }
}
