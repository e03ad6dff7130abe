//! Streaming video decode via an ffmpeg subprocess.
//!
//! - `ffprobe` probes dimensions, fps and duration synchronously at open time
//! - `ffmpeg -f rawvideo -pix_fmt rgba` streams frames over a pipe, one
//!   `read_exact` per frame, already scaled to the frame size cap
//! - rewinding kills the child and spawns a fresh one at position 0

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::decoder::FrameDecoder;
use super::types::{Frame, fit_within};
use crate::error::{MapperError, MapperResult};

/// Names (or paths) of the ffmpeg binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegTools {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl FfmpegTools {
    /// Whether ffprobe runs. Cached per process for the default tool names.
    pub fn available(&self) -> bool {
        static DEFAULT_AVAILABLE: OnceLock<bool> = OnceLock::new();
        if *self == Self::default() {
            *DEFAULT_AVAILABLE.get_or_init(|| probe_binary(&self.ffprobe))
        } else {
            probe_binary(&self.ffprobe)
        }
    }
}

fn probe_binary(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Video metadata from ffprobe.
#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_secs: f64,
}

/// Probe video metadata using ffprobe.
pub fn probe_video(tools: &FfmpegTools, path: &Path) -> MapperResult<VideoMeta> {
    let output = Command::new(&tools.ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| MapperError::media_open(path, format!("ffprobe failed to execute: {e}")))?;

    if !output.status.success() {
        return Err(MapperError::media_open(
            path,
            "ffprobe returned non-zero exit code",
        ));
    }

    parse_probe_json(&output.stdout).map_err(|reason| MapperError::media_open(path, reason))
}

fn parse_probe_json(bytes: &[u8]) -> Result<VideoMeta, String> {
    let json: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("Failed to parse ffprobe JSON: {e}"))?;

    let streams = json["streams"]
        .as_array()
        .ok_or("No streams in ffprobe output")?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or("No video stream found")?;

    let width = video_stream["width"].as_u64().ok_or("Missing width")? as u32;
    let height = video_stream["height"].as_u64().ok_or("Missing height")? as u32;
    if width == 0 || height == 0 {
        return Err("Zero-sized video stream".to_string());
    }

    let fps = parse_frame_rate(video_stream["r_frame_rate"].as_str().unwrap_or("30/1"));

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            video_stream["duration"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    Ok(VideoMeta {
        width,
        height,
        fps,
        duration_secs,
    })
}

fn parse_frame_rate(rate: &str) -> f64 {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().unwrap_or(30.0);
        let d: f64 = den.parse().unwrap_or(1.0);
        if d > 0.0 { n / d } else { 30.0 }
    } else {
        rate.parse().unwrap_or(30.0)
    }
}

/// One ffmpeg child streaming raw RGBA frames.
pub struct FfmpegDecoder {
    path: PathBuf,
    ffmpeg: String,
    pub meta: VideoMeta,
    pub width: u32,
    pub height: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    frames_read: u64,
}

impl FfmpegDecoder {
    pub fn open(tools: &FfmpegTools, path: &Path, max_dimension: u32) -> MapperResult<Self> {
        let meta = probe_video(tools, path)?;
        let (width, height) = fit_within(meta.width, meta.height, max_dimension);

        let mut decoder = Self {
            path: path.to_path_buf(),
            ffmpeg: tools.ffmpeg.clone(),
            meta,
            width,
            height,
            child: None,
            stdout: None,
            frames_read: 0,
        };
        decoder.spawn()?;

        log::info!(
            "Opened video {}: {}x{} -> {}x{} @ {:.2} fps, {:.1}s",
            path.display(),
            decoder.meta.width,
            decoder.meta.height,
            width,
            height,
            decoder.meta.fps,
            decoder.meta.duration_secs,
        );
        Ok(decoder)
    }

    fn frame_size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }

    fn spawn(&mut self) -> MapperResult<()> {
        self.kill();
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "quiet", "-i"])
            .arg(&self.path)
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-s",
                &format!("{}x{}", self.width, self.height),
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MapperError::media_open(&self.path, format!("Failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MapperError::media_open(&self.path, "ffmpeg: no stdout pipe"))?;
        self.child = Some(child);
        self.stdout = Some(stdout);
        self.frames_read = 0;
        Ok(())
    }

    fn kill(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn next_frame(&mut self) -> MapperResult<Option<Frame>> {
        let frame_size = self.frame_size();
        let Some(stdout) = self.stdout.as_mut() else {
            // Child already reaped at end-of-stream.
            return Ok(None);
        };

        let mut buf = vec![0u8; frame_size];
        match stdout.read_exact(&mut buf) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(Some(Frame::new(buf, self.width, self.height)))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                log::debug!(
                    "End of stream after {} frames: {}",
                    self.frames_read,
                    self.path.display()
                );
                self.kill();
                Ok(None)
            }
            Err(e) => Err(MapperError::DecodeStall(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn rewind(&mut self) -> MapperResult<()> {
        self.spawn()
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("25/1") - 25.0).abs() < 1e-9);
    }

    #[test]
    fn parse_frame_rate_fallbacks() {
        assert!((parse_frame_rate("24") - 24.0).abs() < 1e-9);
        assert!((parse_frame_rate("30/0") - 30.0).abs() < 1e-9);
        assert!((parse_frame_rate("junk") - 30.0).abs() < 1e-9);
    }

    #[test]
    fn parse_probe_picks_video_stream() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "30/1"}
            ],
            "format": {"duration": "12.5"}
        }"#;
        let meta = parse_probe_json(json).unwrap();
        assert_eq!((meta.width, meta.height), (1920, 1080));
        assert!((meta.fps - 30.0).abs() < 1e-9);
        assert!((meta.duration_secs - 12.5).abs() < 1e-9);
    }

    #[test]
    fn parse_probe_without_video_fails() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(parse_probe_json(json).is_err());
    }

    #[test]
    fn tools_default_names() {
        let t = FfmpegTools::default();
        assert_eq!(t.ffmpeg, "ffmpeg");
        assert_eq!(t.ffprobe, "ffprobe");
    }

    #[test]
    fn missing_tool_is_unavailable() {
        let t = FfmpegTools {
            ffmpeg: "quadmap-no-such-ffmpeg".into(),
            ffprobe: "quadmap-no-such-ffprobe".into(),
        };
        assert!(!t.available());
    }
}
