//! Camera Capture Layer
//!
//! Opens video streams and delivers decoded frames. The worker only sees
//! the [`StreamOpener`] and [`FrameSource`] traits; the production
//! implementation runs `ffmpeg` as a child process and splits its MJPEG
//! output into frames.

pub mod ffmpeg;
pub mod frame;
pub mod mjpeg;

pub use ffmpeg::{FfmpegOpener, FfmpegSource};
pub use frame::CapturedFrame;

use thiserror::Error;

/// Stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open stream {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("stream ended")]
    Ended,
    #[error("read failed: {0}")]
    Read(String),
    #[error("{0} consecutive frame reads failed")]
    TooManyFailures(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A connected stream delivering frames.
///
/// Dropping the source releases the underlying stream.
pub trait FrameSource: Send {
    /// Block until the next frame.
    ///
    /// `Ok(None)` is a transient failure (undecodable frame); errors mean
    /// the read failed. Both count towards the consecutive failure limit.
    fn read_frame(&mut self) -> Result<Option<CapturedFrame>, StreamError>;
}

/// Opens streams by URL
pub trait StreamOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, StreamError>;
}
