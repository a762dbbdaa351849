//! Runtime status snapshots published by camera workers
//!
//! A worker owns its mutable state privately and publishes an immutable
//! [`CameraRuntimeStatus`] after every change. Readers get a point-in-time
//! copy and never observe a half-updated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::readings::{IndicatorReading, Reading};

/// Connection state of a camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected (initial state, and after the worker stopped)
    Disconnected,
    /// Stream open and delivering frames
    Connected,
    /// Waiting out a backoff delay or reopening after a failure
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest state of one meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterStatus {
    pub meter_id: String,
    pub name: String,
    pub unit: String,
    pub decimal_places: u32,
    pub last_reading: Option<Reading>,
    /// Last value with implied decimal places applied
    pub normalized_value: Option<f64>,
}

/// Latest state of one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorStatus {
    pub indicator_id: String,
    pub name: String,
    pub last_reading: Option<IndicatorReading>,
}

/// Point-in-time runtime status of a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRuntimeStatus {
    pub camera_id: String,
    pub name: String,
    pub state: ConnectionState,
    /// Capture time of the most recent frame
    pub last_frame_time: Option<DateTime<Utc>>,
    /// Trailing average over the last 30 frame intervals
    pub fps: f32,
    pub meters: Vec<MeterStatus>,
    pub indicators: Vec<IndicatorStatus>,
    /// Last stream error, empty once connected again
    pub error_message: String,
    /// Consecutive failed connection attempts
    pub reconnect_attempts: u32,
    /// Readings dropped because the reading queue was full
    pub dropped_readings: u64,
}

impl CameraRuntimeStatus {
    /// Initial status for a camera that has not connected yet
    pub fn new(camera_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            name: name.into(),
            state: ConnectionState::Disconnected,
            last_frame_time: None,
            fps: 0.0,
            meters: Vec::new(),
            indicators: Vec::new(),
            error_message: String::new(),
            reconnect_attempts: 0,
            dropped_readings: 0,
        }
    }

    /// Meter status by id
    pub fn meter(&self, meter_id: &str) -> Option<&MeterStatus> {
        self.meters.iter().find(|m| m.meter_id == meter_id)
    }

    /// Indicator status by id
    pub fn indicator(&self, indicator_id: &str) -> Option<&IndicatorStatus> {
        self.indicators.iter().find(|i| i.indicator_id == indicator_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_status_is_disconnected() {
        let status = CameraRuntimeStatus::new("cam1", "Boiler room");
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_frame_time.is_none());
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.meter("m1").is_none());
    }

    #[test]
    fn test_connection_state_serializes_lowercase() {
        let json = serde_json::to_string(&ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
