//! HTTP POST sink

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use super::retry::RetryPolicy;
use super::{EnabledFlag, Sink, SinkError};
use crate::config::HttpExportConfig;
use crate::shared::{IndicatorReading, Reading};

/// Consecutive failed posts after which failures are logged as errors
const FAILURE_ALERT_THRESHOLD: u32 = 10;

/// Posts readings as JSON to a configured endpoint
pub struct HttpSink {
    url: String,
    client: Client,
    retry: RetryPolicy,
    enabled: EnabledFlag,
    consecutive_failures: AtomicU32,
}

impl HttpSink {
    pub fn new(config: HttpExportConfig) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        let agent = format!("MeterEye/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&agent).map_err(|e| SinkError::Transport(e.to_string()))?,
        );
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SinkError::Transport(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SinkError::Transport(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        let timeout = if config.timeout_seconds.is_finite() && config.timeout_seconds > 0.0 {
            Duration::from_secs_f64(config.timeout_seconds)
        } else {
            Duration::from_secs(10)
        };
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        Ok(Self {
            url: config.url,
            client,
            retry: RetryPolicy::http(),
            enabled: EnabledFlag::new(true),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    /// Replace the retry schedule
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn post<T: Serialize>(&self, body: &T) -> Result<(), SinkError> {
        if self.url.is_empty() {
            return Err(SinkError::Transport("no URL configured".to_string()));
        }

        let result = self.retry.run(|_| {
            let response = self
                .client
                .post(&self.url)
                .json(body)
                .send()
                .map_err(|e| SinkError::Transport(e.to_string()))?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(SinkError::Status(status.as_u16()))
            }
        });

        match &result {
            Ok(()) => self.consecutive_failures.store(0, Ordering::Relaxed),
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= FAILURE_ALERT_THRESHOLD {
                    error!(url = %self.url, failures, "HTTP export failing: {}", e);
                } else {
                    warn!(url = %self.url, failures, "HTTP export failed: {}", e);
                }
            }
        }
        result
    }
}

impl Sink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn export(&self, reading: &Reading) -> Result<(), SinkError> {
        self.export_batch(std::slice::from_ref(reading))
    }

    fn export_batch(&self, readings: &[Reading]) -> Result<(), SinkError> {
        if readings.is_empty() {
            return Ok(());
        }
        self.post(&json!({ "readings": readings, "count": readings.len() }))
    }

    fn export_indicator(&self, reading: &IndicatorReading) -> Result<(), SinkError> {
        self.export_indicator_batch(std::slice::from_ref(reading))
    }

    fn export_indicator_batch(&self, readings: &[IndicatorReading]) -> Result<(), SinkError> {
        if readings.is_empty() {
            return Ok(());
        }
        self.post(&json!({ "indicators": readings, "count": readings.len() }))
    }

    fn start(&self) -> Result<(), SinkError> {
        if self.url.is_empty() {
            warn!("HTTP sink has no URL configured");
        } else {
            info!(url = %self.url, "HTTP sink started");
        }
        Ok(())
    }
}
