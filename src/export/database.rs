//! SQLite reading history sink

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::{EnabledFlag, Sink, SinkError};
use crate::config::DatabaseExportConfig;
use crate::shared::{IndicatorReading, Reading};

/// Minimum time between retention cleanups
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id TEXT NOT NULL,
        meter_id TEXT NOT NULL,
        value REAL,
        raw_text TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 1.0
    );
    CREATE INDEX IF NOT EXISTS idx_readings_camera_meter_time
        ON readings (camera_id, meter_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_readings_time ON readings (timestamp);

    CREATE TABLE IF NOT EXISTS indicator_readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id TEXT NOT NULL,
        indicator_id TEXT NOT NULL,
        state INTEGER NOT NULL,
        brightness REAL NOT NULL,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_indicator_camera_indicator_time
        ON indicator_readings (camera_id, indicator_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_indicator_time ON indicator_readings (timestamp);
";

/// Filter for history queries; results are newest first
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub camera_id: Option<String>,
    /// Meter or indicator id
    pub source_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            camera_id: None,
            source_id: None,
            start: None,
            end: None,
            limit: 100,
        }
    }
}

/// Stores readings in a local SQLite database
pub struct DatabaseSink {
    path: PathBuf,
    conn: Mutex<Connection>,
    retention_days: u32,
    last_cleanup: Mutex<Option<Instant>>,
    enabled: EnabledFlag,
}

impl DatabaseSink {
    /// Open the configured database, or `readings.db` in the data directory
    pub fn from_config(config: &DatabaseExportConfig) -> Result<Self, SinkError> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => crate::storage::default_database_path().map_err(|e| SinkError::Location(e.to_string()))?,
        };
        Self::open(&path, config.retention_days)
    }

    /// Open or create a database and its schema
    pub fn open(path: &Path, retention_days: u32) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SinkError::Location(format!("{}: {e}", parent.display())))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            retention_days,
            last_cleanup: Mutex::new(None),
            enabled: EnabledFlag::new(true),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn insert_readings(&self, readings: &[Reading]) -> Result<(), SinkError> {
        if readings.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO readings (camera_id, meter_id, value, raw_text, timestamp, confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for r in readings {
                    stmt.execute(params![
                        r.camera_id,
                        r.meter_id,
                        r.value,
                        r.raw_text,
                        format_timestamp(&r.timestamp),
                        f64::from(r.confidence),
                    ])?;
                }
            }
            tx.commit()?;
        }
        self.maybe_cleanup();
        Ok(())
    }

    fn insert_indicators(&self, readings: &[IndicatorReading]) -> Result<(), SinkError> {
        if readings.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO indicator_readings (camera_id, indicator_id, state, brightness, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in readings {
                    stmt.execute(params![
                        r.camera_id,
                        r.indicator_id,
                        r.state,
                        r.brightness,
                        format_timestamp(&r.timestamp),
                    ])?;
                }
            }
            tx.commit()?;
        }
        self.maybe_cleanup();
        Ok(())
    }

    /// Run retention cleanup if the last run is more than an hour ago
    fn maybe_cleanup(&self) {
        if self.retention_days == 0 {
            return;
        }
        {
            let mut last = self.last_cleanup.lock();
            if last.is_some_and(|t| t.elapsed() < CLEANUP_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        if let Err(e) = self.cleanup_old_data(Utc::now()) {
            error!(path = %self.path.display(), "Retention cleanup failed: {}", e);
        }
    }

    /// Delete rows older than the retention period; returns the number removed
    pub fn cleanup_old_data(&self, now: DateTime<Utc>) -> Result<usize, SinkError> {
        if self.retention_days == 0 {
            return Ok(0);
        }
        let cutoff = format_timestamp(&(now - ChronoDuration::days(i64::from(self.retention_days))));

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let readings = tx.execute("DELETE FROM readings WHERE timestamp < ?1", params![cutoff])?;
        let indicators = tx.execute("DELETE FROM indicator_readings WHERE timestamp < ?1", params![cutoff])?;
        tx.commit()?;

        let total = readings + indicators;
        if total > 0 {
            info!(readings, indicators, "Removed readings past retention");
        }
        Ok(total)
    }

    /// Stored meter readings matching `query`
    pub fn query_history(&self, query: &HistoryQuery) -> Result<Vec<Reading>, SinkError> {
        let (clause, values) = filter_clause(query, "meter_id");
        let sql = format!(
            "SELECT camera_id, meter_id, value, raw_text, timestamp, confidence FROM readings{clause}
             ORDER BY timestamp DESC, id DESC LIMIT {}",
            query.limit
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(Reading {
                camera_id: row.get(0)?,
                meter_id: row.get(1)?,
                value: row.get(2)?,
                raw_text: row.get(3)?,
                timestamp: parse_timestamp(row, 4)?,
                confidence: row.get::<_, f64>(5)? as f32,
            })
        })?;
        let found = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }

    /// Stored indicator readings matching `query`
    pub fn query_indicator_history(&self, query: &HistoryQuery) -> Result<Vec<IndicatorReading>, SinkError> {
        let (clause, values) = filter_clause(query, "indicator_id");
        let sql = format!(
            "SELECT camera_id, indicator_id, state, brightness, timestamp FROM indicator_readings{clause}
             ORDER BY timestamp DESC, id DESC LIMIT {}",
            query.limit
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(IndicatorReading {
                camera_id: row.get(0)?,
                indicator_id: row.get(1)?,
                state: row.get(2)?,
                brightness: row.get(3)?,
                timestamp: parse_timestamp(row, 4)?,
            })
        })?;
        let found = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }
}

impl Sink for DatabaseSink {
    fn name(&self) -> &str {
        "database"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn export(&self, reading: &Reading) -> Result<(), SinkError> {
        self.insert_readings(std::slice::from_ref(reading))
    }

    fn export_batch(&self, readings: &[Reading]) -> Result<(), SinkError> {
        self.insert_readings(readings)
    }

    fn export_indicator(&self, reading: &IndicatorReading) -> Result<(), SinkError> {
        self.insert_indicators(std::slice::from_ref(reading))
    }

    fn export_indicator_batch(&self, readings: &[IndicatorReading]) -> Result<(), SinkError> {
        self.insert_indicators(readings)
    }

    fn start(&self) -> Result<(), SinkError> {
        info!(path = %self.path.display(), retention_days = self.retention_days, "Database sink started");
        Ok(())
    }
}

/// Sortable UTC timestamp text
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

/// WHERE clause and bound values for a history query
fn filter_clause(query: &HistoryQuery, id_column: &str) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(camera_id) = &query.camera_id {
        conditions.push("camera_id = ?".to_string());
        values.push(Value::Text(camera_id.clone()));
    }
    if let Some(source_id) = &query.source_id {
        conditions.push(format!("{id_column} = ?"));
        values.push(Value::Text(source_id.clone()));
    }
    if let Some(start) = &query.start {
        conditions.push("timestamp >= ?".to_string());
        values.push(Value::Text(format_timestamp(start)));
    }
    if let Some(end) = &query.end {
        conditions.push("timestamp <= ?".to_string());
        values.push(Value::Text(format_timestamp(end)));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}
