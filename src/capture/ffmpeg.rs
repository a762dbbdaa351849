//! Stream access through an `ffmpeg` child process
//!
//! ffmpeg decodes whatever the URL points at (RTSP, HTTP, files, devices)
//! and re-encodes it as MJPEG on stdout, which is split into frames and
//! decoded here.

use image::ImageFormat;
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

use super::mjpeg::MjpegSplitter;
use super::{CapturedFrame, FrameSource, StreamError, StreamOpener};

/// Network read timeout handed to ffmpeg, in microseconds
const IO_TIMEOUT_MICROS: &str = "10000000";

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Build the ffmpeg argument list for a stream URL
pub fn ffmpeg_args(url: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let lower = url.to_ascii_lowercase();
    if lower.starts_with("rtsp://") || lower.starts_with("rtsps://") {
        args.extend(["-rtsp_transport", "tcp", "-timeout", IO_TIMEOUT_MICROS].map(String::from));
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        args.extend(["-rw_timeout", IO_TIMEOUT_MICROS].map(String::from));
    }

    args.extend(["-i", url].map(String::from));
    args.extend(
        ["-an", "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "3", "pipe:1"].map(String::from),
    );
    args
}

/// Opens streams by spawning ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    binary: String,
}

impl FfmpegOpener {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    /// Use a specific ffmpeg executable
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamOpener for FfmpegOpener {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, StreamError> {
        let open_error = |reason: String| StreamError::Open {
            url: url.to_string(),
            reason,
        };

        let child = Command::new(&self.binary)
            .args(ffmpeg_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| open_error(format!("failed to spawn {}: {e}", self.binary)))?;

        let mut source = FfmpegSource::from_child(child)?;

        // The stream only counts as open once it delivers data
        match source.read_frame() {
            Ok(first) => {
                source.buffered = first;
                Ok(Box::new(source))
            }
            Err(e) => Err(open_error(e.to_string())),
        }
    }
}

/// Frames read from a running ffmpeg process
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    chunk: Vec<u8>,
    buffered: Option<CapturedFrame>,
}

impl FfmpegSource {
    /// Wrap a child process whose stdout carries concatenated JPEG images
    pub fn from_child(mut child: Child) -> Result<Self, StreamError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamError::Read("child process has no stdout pipe".to_string()))?;
        Ok(Self {
            child,
            stdout,
            splitter: MjpegSplitter::new(),
            chunk: vec![0; READ_CHUNK_BYTES],
            buffered: None,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Option<CapturedFrame>, StreamError> {
        if let Some(frame) = self.buffered.take() {
            return Ok(Some(frame));
        }

        loop {
            let n = self.stdout.read(&mut self.chunk)?;
            if n == 0 {
                return Err(StreamError::Ended);
            }
            if let Some(jpeg) = self.splitter.push(&self.chunk[..n]) {
                return Ok(decode_jpeg(&jpeg));
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("ffmpeg already exited: {}", e);
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap ffmpeg process: {}", e);
        }
    }
}

fn decode_jpeg(bytes: &[u8]) -> Option<CapturedFrame> {
    match image::load_from_memory_with_format(bytes, ImageFormat::Jpeg) {
        Ok(image) => Some(CapturedFrame::new(image.to_rgb8())),
        Err(e) => {
            debug!(len = bytes.len(), "Dropping undecodable frame: {}", e);
            None
        }
    }
}
