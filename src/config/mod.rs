//! Application Configuration
//!
//! Cameras, meters, indicators and export sinks, stored in TOML.
//! String values may reference environment variables as `${NAME}` or
//! `${NAME:-default}`; references are resolved after parsing and before
//! the document is mapped onto [`AppConfig`].

pub mod env;

pub use env::{substitute_env_vars, substitute_with};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::vision::{
    ColorChannel, DetectionMode, DisplayMode, IndicatorColor, IndicatorSettings,
    RecognizerSettings,
};
use crate::vision::seven_segment::DEFAULT_SEGMENT_SENSITIVITY;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("environment variable {0} is not set and has no default")]
    MissingVariable(String),
    #[error("{owner}: perspective needs exactly 4 points, got {count}")]
    InvalidPerspective { owner: String, count: usize },
    #[error("{owner}: perspective output size must be non-zero")]
    InvalidOutputSize { owner: String },
    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },
}

fn default_true() -> bool {
    true
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Export sinks
    #[serde(default)]
    pub export: ExportConfig,
    /// Cameras to monitor
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

/// General runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Capacity of the camera manager's reading queue
    pub reading_queue_size: usize,
    /// Capacity of each exporter queue
    pub export_queue_size: usize,
    /// Maximum readings per export batch
    pub export_batch_size: usize,
    /// Longest wait for a batch to fill, in milliseconds
    pub export_batch_timeout_ms: u64,
    /// Keep the latest debug visualization per meter and indicator
    pub debug_images: bool,
    /// Interval between statistics log lines, in seconds
    pub stats_interval_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            reading_queue_size: 1000,
            export_queue_size: 10_000,
            export_batch_size: 10,
            export_batch_timeout_ms: 1000,
            debug_images: false,
            stats_interval_seconds: 60,
        }
    }
}

/// One camera stream and the regions read from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    /// Display name; defaults to the id
    #[serde(default)]
    pub name: String,
    /// Stream URL (RTSP, HTTP MJPEG, file, ...)
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between recognition passes; values below 0.1 are raised to 0.1
    #[serde(default = "default_processing_interval", alias = "processing_interval_seconds")]
    pub processing_interval: f64,
    #[serde(default)]
    pub meters: Vec<MeterConfig>,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
}

fn default_processing_interval() -> f64 {
    1.0
}

impl CameraConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            enabled: true,
            processing_interval: default_processing_interval(),
            meters: Vec::new(),
            indicators: Vec::new(),
        }
    }

    /// Check ids and perspective geometry of this camera
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::EmptyId { kind: "camera" });
        }
        validate_regions(&self.meters, &self.indicators)
    }
}

/// Quadrilateral region mapped onto an upright rectangle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveConfig {
    /// Corners in order top-left, top-right, bottom-right, bottom-left
    #[serde(default)]
    pub points: Vec<[i32; 2]>,
    /// Output width and height in pixels
    #[serde(default = "default_output_size")]
    pub output_size: [u32; 2],
}

fn default_output_size() -> [u32; 2] {
    [400, 100]
}

impl Default for PerspectiveConfig {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            output_size: default_output_size(),
        }
    }
}

impl PerspectiveConfig {
    pub fn is_valid(&self) -> bool {
        self.points.len() == 4 && self.output_size[0] > 0 && self.output_size[1] > 0
    }

    fn validate(&self, owner: &str) -> Result<(), ConfigError> {
        if self.points.len() != 4 {
            return Err(ConfigError::InvalidPerspective {
                owner: owner.to_string(),
                count: self.points.len(),
            });
        }
        if self.output_size[0] == 0 || self.output_size[1] == 0 {
            return Err(ConfigError::InvalidOutputSize {
                owner: owner.to_string(),
            });
        }
        Ok(())
    }
}

/// Binarization settings of a meter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub display_mode: DisplayMode,
    pub color_channel: ColorChannel,
    /// 0 selects Otsu's method
    pub threshold: u8,
}

/// A 7-segment meter display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub perspective: PerspectiveConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    /// Fixed number of digit slots; 0 detects slots automatically
    #[serde(default)]
    pub expected_digits: u32,
    /// Implied decimal places applied by [`MeterConfig::normalize`]
    #[serde(default)]
    pub decimal_places: u32,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_true")]
    pub show_on_dashboard: bool,
}

impl MeterConfig {
    pub fn new(id: impl Into<String>, perspective: PerspectiveConfig) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            perspective,
            recognition: RecognitionConfig::default(),
            expected_digits: 0,
            decimal_places: 0,
            unit: String::new(),
            show_on_dashboard: true,
        }
    }

    /// Apply implied decimal places: `value / 10^decimal_places`
    pub fn normalize(&self, value: f64) -> f64 {
        value / 10f64.powi(self.decimal_places as i32)
    }

    /// Recognizer parameters for this meter
    pub fn recognizer_settings(&self) -> RecognizerSettings {
        RecognizerSettings {
            display_mode: self.recognition.display_mode,
            color_channel: self.recognition.color_channel,
            threshold: self.recognition.threshold,
            expected_digits: self.expected_digits,
            segment_sensitivity: DEFAULT_SEGMENT_SENSITIVITY,
        }
    }
}

/// Indicator detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub mode: DetectionMode,
    /// Brightness threshold, or color percentage scaled to 0-255; 0 means automatic
    pub threshold: u8,
    pub on_color: IndicatorColor,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Brightness,
            threshold: 128,
            on_color: IndicatorColor::Red,
        }
    }
}

/// An indicator light
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub perspective: PerspectiveConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default = "default_true")]
    pub show_on_dashboard: bool,
}

impl IndicatorConfig {
    pub fn new(id: impl Into<String>, perspective: PerspectiveConfig) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            perspective,
            detection: DetectionConfig::default(),
            show_on_dashboard: true,
        }
    }

    /// Detector parameters for this indicator
    pub fn detector_settings(&self) -> IndicatorSettings {
        IndicatorSettings {
            mode: self.detection.mode,
            threshold: self.detection.threshold,
            on_color: self.detection.on_color,
        }
    }
}

/// Export sink sections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub http: HttpExportConfig,
    pub database: DatabaseExportConfig,
    pub pubsub: PubSubExportConfig,
}

/// HTTP POST sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpExportConfig {
    pub enabled: bool,
    pub url: String,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    pub timeout_seconds: f64,
}

impl Default for HttpExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            headers: BTreeMap::new(),
            timeout_seconds: 10.0,
        }
    }
}

/// SQLite sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseExportConfig {
    pub enabled: bool,
    /// Database file; defaults to `readings.db` in the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Rows older than this many days are deleted; 0 keeps everything
    pub retention_days: u32,
}

impl Default for DatabaseExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            retention_days: 30,
        }
    }
}

/// Publish/subscribe broker sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubExportConfig {
    pub enabled: bool,
    /// Broker URL, e.g. `redis://localhost:6379`
    pub url: String,
    /// Topic template with `{camera_id}` and `{meter_id}` placeholders
    pub topic: String,
}

impl Default for PubSubExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
            topic: "metereye/{camera_id}/{meter_id}".to_string(),
        }
    }
}

impl AppConfig {
    /// Check camera ids and every camera's meters and indicators
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !seen.insert(camera.id.as_str()) {
                return Err(ConfigError::DuplicateId {
                    kind: "camera",
                    id: camera.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Give unnamed cameras, meters and indicators their id as name
    fn fill_names(&mut self) {
        for camera in &mut self.cameras {
            if camera.name.is_empty() {
                camera.name = camera.id.clone();
            }
            for meter in &mut camera.meters {
                if meter.name.is_empty() {
                    meter.name = meter.id.clone();
                }
            }
            for indicator in &mut camera.indicators {
                if indicator.name.is_empty() {
                    indicator.name = indicator.id.clone();
                }
            }
        }
    }
}

/// Check that meter ids are unique and every perspective is usable
pub fn validate_meters(meters: &[MeterConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for meter in meters {
        if meter.id.is_empty() {
            return Err(ConfigError::EmptyId { kind: "meter" });
        }
        if !seen.insert(meter.id.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "meter",
                id: meter.id.clone(),
            });
        }
        meter.perspective.validate(&format!("meter '{}'", meter.id))?;
    }
    Ok(())
}

/// Check that indicator ids are unique and every perspective is usable
pub fn validate_indicators(indicators: &[IndicatorConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for indicator in indicators {
        if indicator.id.is_empty() {
            return Err(ConfigError::EmptyId { kind: "indicator" });
        }
        if !seen.insert(indicator.id.as_str()) {
            return Err(ConfigError::DuplicateId {
                kind: "indicator",
                id: indicator.id.clone(),
            });
        }
        indicator
            .perspective
            .validate(&format!("indicator '{}'", indicator.id))?;
    }
    Ok(())
}

/// Check both region lists of one camera; meters and indicators share an id space
pub fn validate_regions(meters: &[MeterConfig], indicators: &[IndicatorConfig]) -> Result<(), ConfigError> {
    validate_meters(meters)?;
    validate_indicators(indicators)?;
    match indicators
        .iter()
        .find(|indicator| meters.iter().any(|meter| meter.id == indicator.id))
    {
        Some(indicator) => Err(ConfigError::DuplicateId {
            kind: "meter/indicator",
            id: indicator.id.clone(),
        }),
        None => Ok(()),
    }
}

fn substitute_value<F>(value: &mut toml::Value, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        toml::Value::String(s) => *s = substitute_with(s, lookup)?,
        toml::Value::Array(items) => {
            for item in items {
                substitute_value(item, lookup)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_value(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Parse and validate configuration text, resolving variables through `lookup`
pub fn parse_config_with<F>(content: &str, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut document: toml::Value = toml::from_str(content)?;
    substitute_value(&mut document, &lookup)?;

    let mut config: AppConfig = document.try_into()?;
    config.fill_names();
    config.validate()?;
    Ok(config)
}

/// Parse and validate configuration text against the process environment
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    parse_config_with(content, |name| std::env::var(name).ok())
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
