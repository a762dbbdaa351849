//! Per-camera recognition pipelines for meters and indicators
//!
//! Owned by a single worker thread. Configuration can be replaced while
//! the camera runs; recognizers whose settings did not change are reused
//! and the last reading of every surviving id is kept.

use chrono::{DateTime, Utc};
use image::RgbImage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::capture::CapturedFrame;
use crate::config::{IndicatorConfig, MeterConfig};
use crate::shared::{IndicatorReading, IndicatorStatus, MeterStatus, Reading, ReadingEvent};
use crate::vision::{extract_region, DigitRecognizer, IndicatorDetector};

struct MeterPipeline {
    config: MeterConfig,
    recognizer: Arc<DigitRecognizer>,
    last_reading: Option<Reading>,
    debug_image: Option<Arc<RgbImage>>,
}

struct IndicatorPipeline {
    config: IndicatorConfig,
    detector: Arc<IndicatorDetector>,
    last_reading: Option<IndicatorReading>,
    debug_image: Option<Arc<RgbImage>>,
}

/// Meter and indicator pipelines of one camera
#[derive(Default)]
pub struct RegionPipelines {
    meters: Vec<MeterPipeline>,
    indicators: Vec<IndicatorPipeline>,
}

impl RegionPipelines {
    pub fn new(meters: Vec<MeterConfig>, indicators: Vec<IndicatorConfig>) -> Self {
        let mut pipelines = Self::default();
        pipelines.replace_meters(meters);
        pipelines.replace_indicators(indicators);
        pipelines
    }

    /// Replace the meter set
    pub fn replace_meters(&mut self, meters: Vec<MeterConfig>) {
        let mut previous: HashMap<String, MeterPipeline> = self
            .meters
            .drain(..)
            .map(|p| (p.config.id.clone(), p))
            .collect();

        self.meters = meters
            .into_iter()
            .map(|config| {
                let settings = config.recognizer_settings();
                match previous.remove(&config.id) {
                    Some(old) => {
                        let recognizer = if *old.recognizer.settings() == settings {
                            old.recognizer
                        } else {
                            debug!(meter = %config.id, "Recognizer settings changed, rebuilding");
                            Arc::new(DigitRecognizer::new(settings))
                        };
                        MeterPipeline {
                            config,
                            recognizer,
                            last_reading: old.last_reading,
                            debug_image: old.debug_image,
                        }
                    }
                    None => MeterPipeline {
                        config,
                        recognizer: Arc::new(DigitRecognizer::new(settings)),
                        last_reading: None,
                        debug_image: None,
                    },
                }
            })
            .collect();
    }

    /// Replace the indicator set
    pub fn replace_indicators(&mut self, indicators: Vec<IndicatorConfig>) {
        let mut previous: HashMap<String, IndicatorPipeline> = self
            .indicators
            .drain(..)
            .map(|p| (p.config.id.clone(), p))
            .collect();

        self.indicators = indicators
            .into_iter()
            .map(|config| {
                let settings = config.detector_settings();
                match previous.remove(&config.id) {
                    Some(old) => IndicatorPipeline {
                        detector: if *old.detector.settings() == settings {
                            old.detector
                        } else {
                            Arc::new(IndicatorDetector::new(settings))
                        },
                        config,
                        last_reading: old.last_reading,
                        debug_image: old.debug_image,
                    },
                    None => IndicatorPipeline {
                        config,
                        detector: Arc::new(IndicatorDetector::new(settings)),
                        last_reading: None,
                        debug_image: None,
                    },
                }
            })
            .collect();
    }

    /// Run every pipeline on a frame, returning the readings produced in configuration order
    pub fn process(&mut self, camera_id: &str, frame: &CapturedFrame, with_debug: bool) -> Vec<ReadingEvent> {
        let timestamp = frame.timestamp;
        let mut events = Vec::with_capacity(self.meters.len() + self.indicators.len());

        for meter in &mut self.meters {
            if let Some(reading) = meter.run(camera_id, &frame.image, timestamp, with_debug) {
                events.push(ReadingEvent::Meter(reading));
            }
        }
        for indicator in &mut self.indicators {
            if let Some(reading) = indicator.run(camera_id, &frame.image, timestamp, with_debug) {
                events.push(ReadingEvent::Indicator(reading));
            }
        }
        events
    }

    pub fn meter_statuses(&self) -> Vec<MeterStatus> {
        self.meters
            .iter()
            .map(|m| MeterStatus {
                meter_id: m.config.id.clone(),
                name: m.config.name.clone(),
                unit: m.config.unit.clone(),
                decimal_places: m.config.decimal_places,
                normalized_value: m
                    .last_reading
                    .as_ref()
                    .and_then(|r| r.value)
                    .map(|v| m.config.normalize(v)),
                last_reading: m.last_reading.clone(),
            })
            .collect()
    }

    pub fn indicator_statuses(&self) -> Vec<IndicatorStatus> {
        self.indicators
            .iter()
            .map(|i| IndicatorStatus {
                indicator_id: i.config.id.clone(),
                name: i.config.name.clone(),
                last_reading: i.last_reading.clone(),
            })
            .collect()
    }

    /// Latest debug images of meters
    pub fn meter_debug_images(&self) -> HashMap<String, Arc<RgbImage>> {
        self.meters
            .iter()
            .filter_map(|m| Some((m.config.id.clone(), m.debug_image.clone()?)))
            .collect()
    }

    /// Latest debug images of indicators
    pub fn indicator_debug_images(&self) -> HashMap<String, Arc<RgbImage>> {
        self.indicators
            .iter()
            .filter_map(|i| Some((i.config.id.clone(), i.debug_image.clone()?)))
            .collect()
    }

    #[cfg(test)]
    fn recognizer(&self, meter_id: &str) -> Option<Arc<DigitRecognizer>> {
        self.meters
            .iter()
            .find(|m| m.config.id == meter_id)
            .map(|m| m.recognizer.clone())
    }
}

impl MeterPipeline {
    fn run(&mut self, camera_id: &str, image: &RgbImage, timestamp: DateTime<Utc>, with_debug: bool) -> Option<Reading> {
        let region = extract_region(image, &self.config.perspective)?;

        let recognition = if with_debug {
            let (recognition, visual) = self.recognizer.recognize_with_debug(&region);
            self.debug_image = Some(Arc::new(visual));
            recognition
        } else {
            self.recognizer.recognize(&region)
        };

        let reading = Reading::new(
            camera_id,
            &self.config.id,
            recognition.text.clone(),
            recognition.is_accepted(),
            timestamp,
        );
        if reading.value.is_none() {
            debug!(
                camera = camera_id,
                meter = %self.config.id,
                text = %recognition.text,
                verdict = ?recognition.verdict,
                "Meter not recognized"
            );
        }
        self.last_reading = Some(reading.clone());
        Some(reading)
    }
}

impl IndicatorPipeline {
    fn run(
        &mut self,
        camera_id: &str,
        image: &RgbImage,
        timestamp: DateTime<Utc>,
        with_debug: bool,
    ) -> Option<IndicatorReading> {
        let region = extract_region(image, &self.config.perspective)?;

        let detection = if with_debug {
            let (detection, visual) = self.detector.detect_with_debug(&region);
            self.debug_image = Some(Arc::new(visual));
            detection
        } else {
            self.detector.detect(&region)
        };

        let reading = IndicatorReading {
            camera_id: camera_id.to_string(),
            indicator_id: self.config.id.clone(),
            state: detection.state,
            brightness: detection.value,
            timestamp,
        };
        self.last_reading = Some(reading.clone());
        Some(reading)
    }
}
