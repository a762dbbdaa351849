//! Camera worker thread
//!
//! Each camera runs on its own thread which owns the stream, the
//! recognition pipelines and all mutable state. Other threads talk to it
//! through a command channel and read published snapshots: the runtime
//! status, the latest frame and the latest debug images.
//!
//! The stream is reopened after failures with a growing backoff. Waits
//! are interruptible by a stop command.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::pipeline::RegionPipelines;
use super::CameraError;
use crate::capture::{CapturedFrame, FrameSource, StreamError, StreamOpener};
use crate::config::{validate_regions, CameraConfig, ConfigError, IndicatorConfig, MeterConfig};
use crate::shared::{CameraRuntimeStatus, ConnectionState, ReadingEvent};

/// Delays between reconnection attempts; the last entry repeats
pub const RECONNECT_DELAYS: [Duration; 6] = [
    Duration::from_secs(3),
    Duration::from_secs(6),
    Duration::from_secs(12),
    Duration::from_secs(24),
    Duration::from_secs(48),
    Duration::from_secs(60),
];

/// Unbroken connection time after which the attempt counter resets
pub const STABLE_CONNECTION: Duration = Duration::from_secs(300);

/// Consecutive failed reads that count as a lost stream
pub const MAX_READ_FAILURES: u32 = 30;

/// Shortest allowed time between recognition passes, in seconds
pub const MIN_PROCESSING_INTERVAL: f64 = 0.1;

/// Number of frame intervals averaged for the FPS figure
const FPS_WINDOW: usize = 30;

/// Minimum time between status snapshots caused by frames alone
const STATUS_REFRESH: Duration = Duration::from_millis(500);

/// Reconnection escalates to error-level logs from this attempt on
const ERROR_LOG_ATTEMPT: u32 = 3;

/// Callback invoked on connection state changes
pub type StatusCallback = Arc<dyn Fn(&str, ConnectionState) + Send + Sync>;

/// Tunables of a worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub reconnect_delays: Vec<Duration>,
    pub stable_after: Duration,
    pub max_read_failures: u32,
    /// Render and keep debug visualizations
    pub debug_images: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            reconnect_delays: RECONNECT_DELAYS.to_vec(),
            stable_after: STABLE_CONNECTION,
            max_read_failures: MAX_READ_FAILURES,
            debug_images: false,
        }
    }
}

/// Clamp a processing interval to the supported minimum
pub fn clamp_interval(seconds: f64) -> Duration {
    let seconds = if seconds.is_finite() {
        seconds.max(MIN_PROCESSING_INTERVAL)
    } else {
        MIN_PROCESSING_INTERVAL
    };
    Duration::from_secs_f64(seconds)
}

/// Reconnection backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    delays: Vec<Duration>,
    stable_after: Duration,
    attempts: u32,
    connected_since: Option<Instant>,
}

impl Backoff {
    pub fn new(delays: Vec<Duration>, stable_after: Duration) -> Self {
        Self {
            delays,
            stable_after,
            attempts: 0,
            connected_since: None,
        }
    }

    /// Consecutive failures since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failure and return how long to wait before the next attempt
    pub fn record_failure(&mut self) -> Duration {
        let index = (self.attempts as usize).min(self.delays.len().saturating_sub(1));
        self.attempts = self.attempts.saturating_add(1);
        self.connected_since = None;
        self.delays.get(index).copied().unwrap_or_default()
    }

    /// Record a successful connection
    pub fn record_connected(&mut self, now: Instant) {
        self.attempts = 0;
        self.connected_since = Some(now);
    }

    /// Record a received frame; a long enough connection clears the counter
    pub fn record_frame(&mut self, now: Instant) {
        if let Some(since) = self.connected_since {
            if now.saturating_duration_since(since) >= self.stable_after {
                self.attempts = 0;
                self.connected_since = Some(now);
            }
        }
    }
}

/// Trailing frame rate over the last few frame intervals
#[derive(Debug, Default)]
pub struct FpsMeter {
    intervals: VecDeque<Duration>,
    last: Option<Instant>,
}

impl FpsMeter {
    /// Record a frame arrival and return the current rate
    pub fn tick(&mut self, now: Instant) -> f32 {
        if let Some(last) = self.last.replace(now) {
            self.intervals.push_back(now.saturating_duration_since(last));
            if self.intervals.len() > FPS_WINDOW {
                self.intervals.pop_front();
            }
        }
        self.fps()
    }

    pub fn fps(&self) -> f32 {
        if self.intervals.is_empty() {
            return 0.0;
        }
        let total: Duration = self.intervals.iter().sum();
        if total.is_zero() {
            return 0.0;
        }
        self.intervals.len() as f32 / total.as_secs_f32()
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last = None;
    }
}

/// Commands accepted by a running worker
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Stop,
    ReplaceMeters(Vec<MeterConfig>),
    ReplaceIndicators(Vec<IndicatorConfig>),
    SetProcessingInterval(f64),
}

/// Snapshots published by the worker thread
pub(crate) struct WorkerShared {
    status: RwLock<Arc<CameraRuntimeStatus>>,
    latest_frame: RwLock<Option<Arc<CapturedFrame>>>,
    meter_debug: RwLock<HashMap<String, Arc<RgbImage>>>,
    indicator_debug: RwLock<HashMap<String, Arc<RgbImage>>>,
}

/// Region configuration last handed to the worker thread
struct RegionConfigs {
    meters: Vec<MeterConfig>,
    indicators: Vec<IndicatorConfig>,
}

/// Handle to a running camera worker
pub struct CameraWorker {
    camera_id: String,
    shared: Arc<WorkerShared>,
    regions: Mutex<RegionConfigs>,
    commands: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl CameraWorker {
    /// Spawn a worker thread for `config`
    pub fn spawn(
        config: CameraConfig,
        opener: Arc<dyn StreamOpener>,
        readings: Sender<ReadingEvent>,
        on_status_change: Option<StatusCallback>,
        options: WorkerOptions,
    ) -> Result<Self, CameraError> {
        let camera_id = config.id.clone();
        let regions = Mutex::new(RegionConfigs {
            meters: config.meters.clone(),
            indicators: config.indicators.clone(),
        });
        let pipelines = RegionPipelines::new(config.meters.clone(), config.indicators.clone());

        let mut status = CameraRuntimeStatus::new(&config.id, &config.name);
        status.meters = pipelines.meter_statuses();
        status.indicators = pipelines.indicator_statuses();

        let shared = Arc::new(WorkerShared {
            status: RwLock::new(Arc::new(status.clone())),
            latest_frame: RwLock::new(None),
            meter_debug: RwLock::new(HashMap::new()),
            indicator_debug: RwLock::new(HashMap::new()),
        });
        let (commands, command_rx) = unbounded();

        let backoff = Backoff::new(options.reconnect_delays.clone(), options.stable_after);
        let mut run = WorkerLoop {
            interval: clamp_interval(config.processing_interval),
            config,
            opener,
            readings,
            on_status_change,
            options,
            commands: command_rx,
            shared: shared.clone(),
            pipelines,
            status,
            backoff,
            fps: FpsMeter::default(),
            last_processed: None,
            last_published: Instant::now(),
        };

        let handle = std::thread::Builder::new()
            .name(format!("camera-{camera_id}"))
            .spawn(move || run.run())
            .map_err(|source| CameraError::Spawn {
                camera_id: camera_id.clone(),
                source,
            })?;

        Ok(Self {
            camera_id,
            shared,
            regions,
            commands,
            handle: Some(handle),
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Current status snapshot
    pub fn status(&self) -> Arc<CameraRuntimeStatus> {
        self.shared.status.read().clone()
    }

    /// Most recent decoded frame
    pub fn latest_frame(&self) -> Option<Arc<CapturedFrame>> {
        self.shared.latest_frame.read().clone()
    }

    /// Latest debug image of a meter or indicator
    pub fn debug_image(&self, id: &str) -> Option<Arc<RgbImage>> {
        if let Some(image) = self.shared.meter_debug.read().get(id) {
            return Some(image.clone());
        }
        self.shared.indicator_debug.read().get(id).cloned()
    }

    /// Replace the meters; rejected if an id is invalid or already used by an indicator
    pub fn replace_meters(&self, meters: Vec<MeterConfig>) -> Result<(), ConfigError> {
        let mut regions = self.regions.lock();
        validate_regions(&meters, &regions.indicators)?;
        regions.meters = meters.clone();
        self.send(WorkerCommand::ReplaceMeters(meters));
        Ok(())
    }

    /// Replace the indicators; rejected if an id is invalid or already used by a meter
    pub fn replace_indicators(&self, indicators: Vec<IndicatorConfig>) -> Result<(), ConfigError> {
        let mut regions = self.regions.lock();
        validate_regions(&regions.meters, &indicators)?;
        regions.indicators = indicators.clone();
        self.send(WorkerCommand::ReplaceIndicators(indicators));
        Ok(())
    }

    pub fn set_processing_interval(&self, seconds: f64) {
        self.send(WorkerCommand::SetProcessingInterval(seconds));
    }

    /// Ask the worker to stop; returns immediately
    pub fn request_stop(&self) {
        self.send(WorkerCommand::Stop);
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns false if it is still running; the thread is then detached.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(camera = %self.camera_id, "Worker did not stop within {:?}, abandoning", timeout);
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.join().is_err() {
            error!(camera = %self.camera_id, "Worker thread panicked");
        }
        true
    }

    /// Stop the worker and wait for it
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        self.join(timeout)
    }

    fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            debug!(camera = %self.camera_id, "Worker already exited");
        }
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        // Detach rather than block; the thread exits at its next check
        self.request_stop();
    }
}

/// How a connected session ended
enum SessionEnd {
    Stopped,
    Failed(StreamError),
}

/// State owned by the worker thread
struct WorkerLoop {
    config: CameraConfig,
    opener: Arc<dyn StreamOpener>,
    readings: Sender<ReadingEvent>,
    on_status_change: Option<StatusCallback>,
    options: WorkerOptions,
    commands: Receiver<WorkerCommand>,
    shared: Arc<WorkerShared>,
    pipelines: RegionPipelines,
    status: CameraRuntimeStatus,
    backoff: Backoff,
    fps: FpsMeter,
    interval: Duration,
    last_processed: Option<Instant>,
    last_published: Instant,
}

impl WorkerLoop {
    fn run(&mut self) {
        info!(camera = %self.config.id, name = %self.config.name, "Starting camera worker");

        loop {
            let state = if self.backoff.attempts() > 0 {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            self.set_state(state);

            let failure = match self.opener.open(&self.config.url) {
                Ok(source) => match self.session(source) {
                    SessionEnd::Stopped => break,
                    SessionEnd::Failed(e) => e,
                },
                Err(e) => e,
            };

            let delay = self.on_failure(&failure);
            if !self.wait(delay) {
                break;
            }
        }

        self.fps.reset();
        self.status.fps = 0.0;
        self.set_state(ConnectionState::Disconnected);
        info!(camera = %self.config.id, "Camera worker stopped");
    }

    /// Read frames until the stream fails or a stop is requested.
    ///
    /// The source is dropped, and the stream released, when this returns.
    fn session(&mut self, mut source: Box<dyn FrameSource>) -> SessionEnd {
        let now = Instant::now();
        self.backoff.record_connected(now);
        self.status.error_message.clear();
        self.status.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connected);
        info!(camera = %self.config.id, "Camera connected");

        let mut failures = 0u32;
        loop {
            if self.drain_commands() {
                return SessionEnd::Stopped;
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    failures += 1;
                    if failures >= self.options.max_read_failures {
                        return SessionEnd::Failed(StreamError::TooManyFailures(failures));
                    }
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    debug!(camera = %self.config.id, failures, "Frame read failed: {}", e);
                    if failures >= self.options.max_read_failures {
                        return SessionEnd::Failed(StreamError::TooManyFailures(failures));
                    }
                    continue;
                }
            };
            failures = 0;
            self.on_frame(frame);
        }
    }

    fn on_frame(&mut self, frame: CapturedFrame) {
        let now = Instant::now();
        self.backoff.record_frame(now);
        self.status.fps = self.fps.tick(now);
        self.status.last_frame_time = Some(frame.timestamp);

        let frame = Arc::new(frame);
        *self.shared.latest_frame.write() = Some(frame.clone());

        let due = self
            .last_processed
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_processed = Some(now);
            self.process(&frame);
            self.publish();
        } else if now.saturating_duration_since(self.last_published) >= STATUS_REFRESH {
            self.publish();
        }
    }

    fn process(&mut self, frame: &CapturedFrame) {
        let with_debug = self.options.debug_images;
        let events = self.pipelines.process(&self.config.id, frame, with_debug);

        for event in events {
            match self.readings.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.status.dropped_readings += 1;
                    warn!(
                        camera = %self.config.id,
                        source = event.source_id(),
                        "Reading queue full, dropping reading"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(camera = %self.config.id, "Reading queue closed");
                }
            }
        }

        self.status.meters = self.pipelines.meter_statuses();
        self.status.indicators = self.pipelines.indicator_statuses();
        if with_debug {
            *self.shared.meter_debug.write() = self.pipelines.meter_debug_images();
            *self.shared.indicator_debug.write() = self.pipelines.indicator_debug_images();
        }
    }

    /// Record a stream failure and return the backoff delay
    fn on_failure(&mut self, failure: &StreamError) -> Duration {
        let delay = self.backoff.record_failure();
        let attempts = self.backoff.attempts();

        if attempts >= ERROR_LOG_ATTEMPT {
            error!(camera = %self.config.id, attempts, ?delay, "Camera stream error: {}", failure);
        } else {
            warn!(camera = %self.config.id, attempts, ?delay, "Camera stream error: {}", failure);
        }

        self.fps.reset();
        self.status.fps = 0.0;
        self.status.error_message = failure.to_string();
        self.status.reconnect_attempts = attempts;
        self.set_state(ConnectionState::Reconnecting);
        delay
    }

    /// Wait out a backoff delay while serving commands; false when stopped
    fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            match self.commands.recv_deadline(deadline) {
                Ok(WorkerCommand::Stop) => return false,
                Ok(command) => {
                    self.apply(command);
                    self.publish();
                }
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Apply pending commands; true when a stop was requested
    fn drain_commands(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.commands.try_recv() {
                Ok(WorkerCommand::Stop) => return true,
                Ok(command) => {
                    self.apply(command);
                    changed = true;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => return true,
            }
        }
        if changed {
            self.publish();
        }
        false
    }

    fn apply(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Stop => {}
            WorkerCommand::ReplaceMeters(meters) => {
                info!(camera = %self.config.id, count = meters.len(), "Updating meters");
                self.pipelines.replace_meters(meters.clone());
                self.config.meters = meters;
                self.status.meters = self.pipelines.meter_statuses();
                *self.shared.meter_debug.write() = self.pipelines.meter_debug_images();
            }
            WorkerCommand::ReplaceIndicators(indicators) => {
                info!(camera = %self.config.id, count = indicators.len(), "Updating indicators");
                self.pipelines.replace_indicators(indicators.clone());
                self.config.indicators = indicators;
                self.status.indicators = self.pipelines.indicator_statuses();
                *self.shared.indicator_debug.write() = self.pipelines.indicator_debug_images();
            }
            WorkerCommand::SetProcessingInterval(seconds) => {
                self.interval = clamp_interval(seconds);
                self.config.processing_interval = self.interval.as_secs_f64();
                info!(camera = %self.config.id, interval = ?self.interval, "Updating processing interval");
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        let changed = self.status.state != state;
        self.status.state = state;
        self.publish();

        if changed {
            if let Some(callback) = &self.on_status_change {
                let id = self.config.id.as_str();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(id, state)));
                if result.is_err() {
                    error!(camera = %self.config.id, "Status callback panicked");
                }
            }
        }
    }

    fn publish(&mut self) {
        *self.shared.status.write() = Arc::new(self.status.clone());
        self.last_published = Instant::now();
    }
}

/// Bounded reading channel used between workers and the camera manager
pub(crate) fn reading_channel(capacity: usize) -> (Sender<ReadingEvent>, Receiver<ReadingEvent>) {
    bounded(capacity.max(1))
}
