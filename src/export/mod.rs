//! Reading export
//!
//! Sinks receive batches of readings from the [`ExporterManager`]. Every
//! sink implements the same [`Sink`] contract; the manager never looks at
//! concrete sink types and only checks whether a sink is enabled.

pub mod database;
pub mod http;
pub mod manager;
pub mod pubsub;
pub mod retry;

pub use database::{DatabaseSink, HistoryQuery};
pub use http::HttpSink;
pub use manager::{BatchSettings, ExporterManager};
pub use pubsub::PubSubSink;
pub use retry::RetryPolicy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ExportConfig;
use crate::shared::{IndicatorReading, Reading};

/// Sink failures
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("database location unavailable: {0}")]
    Location(String),
    #[error("sink not connected")]
    NotConnected,
    #[error("sink disabled: {0}")]
    Disabled(String),
}

/// Contract between the exporter manager and a sink.
///
/// Implementations are called from the exporter threads and must tolerate
/// repeated calls, including after `stop`.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn export(&self, reading: &Reading) -> Result<(), SinkError>;

    fn export_batch(&self, readings: &[Reading]) -> Result<(), SinkError>;

    fn export_indicator(&self, _reading: &IndicatorReading) -> Result<(), SinkError> {
        Ok(())
    }

    /// Export indicator readings one by one, reporting the first failure
    fn export_indicator_batch(&self, readings: &[IndicatorReading]) -> Result<(), SinkError> {
        let mut first_error = None;
        for reading in readings {
            if let Err(e) = self.export_indicator(reading) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn start(&self) -> Result<(), SinkError> {
        info!(sink = self.name(), "Sink started");
        Ok(())
    }

    fn stop(&self) {
        info!(sink = self.name(), "Sink stopped");
    }
}

/// Stand-in for a sink that could not be constructed
pub struct DisabledSink {
    name: String,
    reason: String,
}

impl DisabledSink {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Sink for DisabledSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn set_enabled(&self, enabled: bool) {
        if enabled {
            warn!(sink = %self.name, reason = %self.reason, "Cannot enable sink");
        }
    }

    fn export(&self, _reading: &Reading) -> Result<(), SinkError> {
        Err(SinkError::Disabled(self.reason.clone()))
    }

    fn export_batch(&self, _readings: &[Reading]) -> Result<(), SinkError> {
        Err(SinkError::Disabled(self.reason.clone()))
    }

    fn export_indicator(&self, _reading: &IndicatorReading) -> Result<(), SinkError> {
        Err(SinkError::Disabled(self.reason.clone()))
    }
}

/// Enabled flag shared by the concrete sinks
#[derive(Debug)]
pub(crate) struct EnabledFlag(AtomicBool);

impl EnabledFlag {
    pub(crate) fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }
}

/// Build a sink for every enabled export section.
///
/// A section whose sink cannot be constructed yields a [`DisabledSink`].
pub fn build_sinks(config: &ExportConfig) -> Vec<Arc<dyn Sink>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

    if config.http.enabled {
        match HttpSink::new(config.http.clone()) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => {
                warn!("HTTP sink unavailable: {}", e);
                sinks.push(Arc::new(DisabledSink::new("http", e.to_string())));
            }
        }
    }

    if config.database.enabled {
        match DatabaseSink::from_config(&config.database) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => {
                warn!("Database sink unavailable: {}", e);
                sinks.push(Arc::new(DisabledSink::new("database", e.to_string())));
            }
        }
    }

    if config.pubsub.enabled {
        match PubSubSink::new(config.pubsub.clone()) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => {
                warn!("Pub/sub sink unavailable: {}", e);
                sinks.push(Arc::new(DisabledSink::new("pubsub", e.to_string())));
            }
        }
    }

    sinks
}
