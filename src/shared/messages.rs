//! Message types flowing from camera workers to reading consumers

use super::readings::{IndicatorReading, Reading};

/// A reading event carried on the camera manager's queue
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingEvent {
    /// A meter reading
    Meter(Reading),
    /// An indicator light reading
    Indicator(IndicatorReading),
}

impl ReadingEvent {
    /// Camera that produced this event
    pub fn camera_id(&self) -> &str {
        match self {
            ReadingEvent::Meter(r) => &r.camera_id,
            ReadingEvent::Indicator(r) => &r.camera_id,
        }
    }

    /// Meter or indicator id within the camera
    pub fn source_id(&self) -> &str {
        match self {
            ReadingEvent::Meter(r) => &r.meter_id,
            ReadingEvent::Indicator(r) => &r.indicator_id,
        }
    }
}

impl From<Reading> for ReadingEvent {
    fn from(reading: Reading) -> Self {
        ReadingEvent::Meter(reading)
    }
}

impl From<IndicatorReading> for ReadingEvent {
    fn from(reading: IndicatorReading) -> Self {
        ReadingEvent::Indicator(reading)
    }
}
