//! Exporter manager
//!
//! Two bounded queues, one for meter readings and one for indicator
//! readings, each drained by its own thread. A thread collects a batch
//! and hands it to every enabled sink in turn; a failing sink is logged
//! and skipped without affecting the others.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{Sink, SinkError};
use crate::config::GeneralConfig;
use crate::shared::{IndicatorReading, Reading};

/// Time allowed for each export thread to exit on stop
pub const EXPORT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single wait on a queue, so a stop is noticed promptly
const POLL_STEP: Duration = Duration::from_millis(100);

/// Batch collection limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&GeneralConfig> for BatchSettings {
    fn from(general: &GeneralConfig) -> Self {
        Self {
            batch_size: general.export_batch_size.max(1),
            batch_timeout: Duration::from_millis(general.export_batch_timeout_ms),
        }
    }
}

type SinkList = RwLock<Vec<Arc<dyn Sink>>>;

/// Items that travel through an export queue
trait Exportable: Sized + Send + 'static {
    const KIND: &'static str;

    fn export_one(sink: &dyn Sink, item: &Self) -> Result<(), SinkError>;

    fn export_many(sink: &dyn Sink, items: &[Self]) -> Result<(), SinkError>;
}

impl Exportable for Reading {
    const KIND: &'static str = "reading";

    fn export_one(sink: &dyn Sink, item: &Self) -> Result<(), SinkError> {
        sink.export(item)
    }

    fn export_many(sink: &dyn Sink, items: &[Self]) -> Result<(), SinkError> {
        sink.export_batch(items)
    }
}

impl Exportable for IndicatorReading {
    const KIND: &'static str = "indicator";

    fn export_one(sink: &dyn Sink, item: &Self) -> Result<(), SinkError> {
        sink.export_indicator(item)
    }

    fn export_many(sink: &dyn Sink, items: &[Self]) -> Result<(), SinkError> {
        sink.export_indicator_batch(items)
    }
}

/// Batches readings and drives the configured sinks
pub struct ExporterManager {
    sinks: Arc<SinkList>,
    settings: BatchSettings,
    readings: (Sender<Reading>, Receiver<Reading>),
    indicators: (Sender<IndicatorReading>, Receiver<IndicatorReading>),
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl ExporterManager {
    /// Create a manager whose queues each hold `queue_size` items
    pub fn new(queue_size: usize, settings: BatchSettings) -> Self {
        Self {
            sinks: Arc::new(RwLock::new(Vec::new())),
            settings,
            readings: bounded(queue_size.max(1)),
            indicators: bounded(queue_size.max(1)),
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        info!(sink = sink.name(), "Added sink");
        self.sinks.write().push(sink);
    }

    /// Remove every sink called `name`; returns whether any was removed
    pub fn remove_sink(&self, name: &str) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|s| s.name() != name);
        let removed = sinks.len() != before;
        if removed {
            info!(sink = name, "Removed sink");
        }
        removed
    }

    pub fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.read().clone()
    }

    /// Queue a meter reading; false when the queue is full and it was dropped
    pub fn push(&self, reading: Reading) -> bool {
        self.enqueue(&self.readings.0, reading)
    }

    /// Queue an indicator reading; false when the queue is full and it was dropped
    pub fn push_indicator(&self, reading: IndicatorReading) -> bool {
        self.enqueue(&self.indicators.0, reading)
    }

    /// Readings waiting in both queues
    pub fn queued(&self) -> usize {
        self.readings.0.len() + self.indicators.0.len()
    }

    /// Readings dropped because a queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start every sink, then the export threads
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        for sink in self.sinks() {
            if let Err(e) = sink.start() {
                error!(sink = sink.name(), "Failed to start sink: {}", e);
            }
        }

        let mut threads = self.threads.lock();
        threads.extend(self.spawn_loop("export-readings", self.readings.1.clone()));
        threads.extend(self.spawn_loop("export-indicators", self.indicators.1.clone()));
        info!(sinks = self.sinks.read().len(), "Exporter manager started");
    }

    /// Stop the export threads, flushing partial batches, then stop every sink
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("export").to_string();
            let deadline = Instant::now() + EXPORT_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                warn!(thread = %name, "Export thread did not stop in time, abandoning");
                continue;
            }
            if handle.join().is_err() {
                error!(thread = %name, "Export thread panicked");
            }
        }

        for sink in self.sinks() {
            let result = catch_unwind(AssertUnwindSafe(|| sink.stop()));
            if result.is_err() {
                error!(sink = sink.name(), "Sink panicked while stopping");
            }
        }
        info!("Exporter manager stopped");
    }

    fn enqueue<T: Exportable>(&self, queue: &Sender<T>, item: T) -> bool {
        match queue.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = T::KIND, "Export queue full, dropping reading");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn spawn_loop<T: Exportable>(&self, name: &str, queue: Receiver<T>) -> Option<JoinHandle<()>> {
        let sinks = self.sinks.clone();
        let running = self.running.clone();
        let settings = self.settings;
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || batch_loop(queue, &sinks, &running, settings));
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(thread = name, "Failed to start export thread: {}", e);
                None
            }
        }
    }
}

impl Drop for ExporterManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn batch_loop<T: Exportable>(queue: Receiver<T>, sinks: &SinkList, running: &AtomicBool, settings: BatchSettings) {
    debug!(kind = T::KIND, "Export loop started");
    let batch_size = settings.batch_size.max(1);
    let mut batch: Vec<T> = Vec::with_capacity(batch_size);

    'outer: while running.load(Ordering::SeqCst) {
        let deadline = Instant::now() + settings.batch_timeout;
        while batch.len() < batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match queue.recv_timeout(remaining.min(POLL_STEP)) {
                Ok(item) => batch.push(item),
                Err(RecvTimeoutError::Timeout) => {
                    if !running.load(Ordering::SeqCst) {
                        break 'outer;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break 'outer,
            }
        }

        if !batch.is_empty() {
            dispatch(sinks, &batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        debug!(kind = T::KIND, count = batch.len(), "Flushing partial batch");
        dispatch(sinks, &batch);
    }
    debug!(kind = T::KIND, "Export loop stopped");
}

/// Hand a batch to every enabled sink
fn dispatch<T: Exportable>(sinks: &SinkList, batch: &[T]) {
    let snapshot: Vec<Arc<dyn Sink>> = sinks.read().clone();
    for sink in snapshot.iter().filter(|s| s.is_enabled()) {
        let result = catch_unwind(AssertUnwindSafe(|| match batch {
            [single] => T::export_one(sink.as_ref(), single),
            items => T::export_many(sink.as_ref(), items),
        }));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(sink = sink.name(), kind = T::KIND, count = batch.len(), "Export failed: {}", e),
            Err(_) => error!(sink = sink.name(), kind = T::KIND, "Sink panicked during export"),
        }
    }
}
