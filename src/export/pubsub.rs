//! Redis PUBLISH sink
//!
//! Each reading is published as JSON on a topic built from a template
//! with `{camera_id}`, `{meter_id}` and `{indicator_id}` placeholders.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{EnabledFlag, Sink, SinkError};
use crate::config::PubSubExportConfig;
use crate::shared::{IndicatorReading, Reading};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Expand a topic template for one reading source
pub fn topic_for(template: &str, camera_id: &str, source_id: &str) -> String {
    template
        .replace("{camera_id}", camera_id)
        .replace("{meter_id}", source_id)
        .replace("{indicator_id}", source_id)
}

/// Publishes readings to a Redis server
pub struct PubSubSink {
    url: String,
    topic: String,
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
    enabled: EnabledFlag,
}

impl PubSubSink {
    /// Validate the broker URL; the connection is made in `start`
    pub fn new(config: PubSubExportConfig) -> Result<Self, SinkError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            url: config.url,
            topic: config.topic,
            client,
            conn: Mutex::new(None),
            enabled: EnabledFlag::new(true),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn publish<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), SinkError> {
        let message = serde_json::to_string(payload)?;

        let mut guard = self.conn.lock();
        if guard.is_none() {
            // Reconnect lazily after a dropped connection
            match self.client.get_connection_with_timeout(CONNECT_TIMEOUT) {
                Ok(conn) => {
                    info!(url = %self.url, "Reconnected to broker");
                    *guard = Some(conn);
                }
                Err(e) => {
                    debug!(url = %self.url, "Broker reconnect failed: {}", e);
                    return Err(SinkError::NotConnected);
                }
            }
        }
        let Some(conn) = guard.as_mut() else {
            return Err(SinkError::NotConnected);
        };

        match redis::cmd("PUBLISH").arg(topic).arg(&message).query::<i64>(conn) {
            Ok(receivers) => {
                debug!(topic, receivers, "Published reading");
                Ok(())
            }
            Err(e) => {
                warn!(topic, "Publish failed: {}", e);
                if e.is_connection_dropped() || e.is_io_error() {
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }
}

impl Sink for PubSubSink {
    fn name(&self) -> &str {
        "pubsub"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn export(&self, reading: &Reading) -> Result<(), SinkError> {
        let topic = topic_for(&self.topic, &reading.camera_id, &reading.meter_id);
        self.publish(&topic, reading)
    }

    /// Publishes each reading on its own topic
    fn export_batch(&self, readings: &[Reading]) -> Result<(), SinkError> {
        let mut first_error = None;
        for reading in readings {
            if let Err(e) = self.export(reading) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn export_indicator(&self, reading: &IndicatorReading) -> Result<(), SinkError> {
        let topic = topic_for(&self.topic, &reading.camera_id, &reading.indicator_id);
        self.publish(&topic, reading)
    }

    fn start(&self) -> Result<(), SinkError> {
        match self.client.get_connection_with_timeout(CONNECT_TIMEOUT) {
            Ok(conn) => {
                *self.conn.lock() = Some(conn);
                info!(url = %self.url, topic = %self.topic, "Pub/sub sink connected");
                Ok(())
            }
            Err(e) => {
                error!(url = %self.url, "Pub/sub sink connection failed, disabling: {}", e);
                self.set_enabled(false);
                Err(e.into())
            }
        }
    }

    fn stop(&self) {
        if self.conn.lock().take().is_some() {
            info!(url = %self.url, "Pub/sub sink disconnected");
        }
    }
}
