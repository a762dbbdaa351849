//! Frame data structures for decoded camera frames

use chrono::{DateTime, Utc};
use image::RgbImage;

/// A decoded frame from a camera stream
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Wall-clock time the frame was received
    pub timestamp: DateTime<Utc>,
}

impl CapturedFrame {
    /// Create a new frame stamped with the current time
    pub fn new(image: RgbImage) -> Self {
        Self::with_timestamp(image, Utc::now())
    }

    pub fn with_timestamp(image: RgbImage, timestamp: DateTime<Utc>) -> Self {
        Self { image, timestamp }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
