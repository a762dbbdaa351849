//! Reading records produced by the recognition pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single meter reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Camera that produced the frame
    pub camera_id: String,
    /// Meter within the camera
    pub meter_id: String,
    /// Parsed numeric value, absent when recognition failed
    pub value: Option<f64>,
    /// Assembled text, kept even when recognition failed
    pub raw_text: String,
    /// Capture time of the processed frame
    pub timestamp: DateTime<Utc>,
    /// 1.0 when a value was parsed, otherwise 0.0
    pub confidence: f32,
}

impl Reading {
    /// Build a reading from recognizer output.
    ///
    /// `accepted` is the recognizer's verdict; the text is only parsed
    /// into a value when the recognizer accepted it.
    pub fn new(
        camera_id: impl Into<String>,
        meter_id: impl Into<String>,
        raw_text: impl Into<String>,
        accepted: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let raw_text = raw_text.into();
        let value = if accepted { parse_value(&raw_text) } else { None };
        Self {
            camera_id: camera_id.into(),
            meter_id: meter_id.into(),
            value,
            confidence: if value.is_some() { 1.0 } else { 0.0 },
            raw_text,
            timestamp,
        }
    }

    /// Whether this reading carries a numeric value
    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }
}

/// A single indicator light reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    pub camera_id: String,
    pub indicator_id: String,
    /// ON/OFF verdict
    pub state: bool,
    /// Mean luminance (brightness mode) or matching pixel percentage (color mode)
    pub brightness: f64,
    pub timestamp: DateTime<Utc>,
}

/// Parse recognized text as a decimal number.
///
/// Empty text, a lone decimal point, or text with more than one
/// decimal point yields `None`.
pub fn parse_value(text: &str) -> Option<f64> {
    if text.is_empty() || !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !text.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}
