//! Vision Layer
//!
//! Turns camera frames into readings:
//! - Perspective extraction of a display or light region from a frame
//! - 7-segment digit recognition on the extracted region
//! - Indicator light ON/OFF detection
//! - Debug visualizations of both

pub mod debug;
pub mod indicator;
pub mod perspective;
pub mod preprocess;
pub mod seven_segment;

#[cfg(test)]
pub(crate) mod test_support;

pub use indicator::{IndicatorDetection, IndicatorDetector, IndicatorSettings};
pub use perspective::extract_region;
pub use seven_segment::{DigitRecognition, DigitRecognizer, RecognizerSettings};

use serde::{Deserialize, Serialize};

/// Polarity of a 7-segment display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Lit segments on a dark background (LED displays)
    #[default]
    LightOnDark,
    /// Dark segments on a light background (LCD displays)
    DarkOnLight,
}

/// Channel a display region is reduced to before thresholding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChannel {
    #[default]
    Red,
    Green,
    Blue,
    /// Luminance (0.299 R + 0.587 G + 0.114 B)
    Gray,
}

/// How an indicator light is judged ON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Mean luminance above a threshold
    #[default]
    Brightness,
    /// Share of pixels within a hue range above a threshold
    Color,
}

/// Lamp color matched in color detection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    #[default]
    Red,
    Green,
    Blue,
    Yellow,
    Orange,
}
