//! Camera manager
//!
//! Owns the worker registry and the shared reading queue. A dispatch
//! thread drains the queue and hands every reading to the registered
//! callbacks.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::worker::{reading_channel, CameraWorker, StatusCallback, WorkerOptions};
use super::CameraError;
use crate::capture::{CapturedFrame, StreamOpener};
use crate::config::{CameraConfig, IndicatorConfig, MeterConfig};
use crate::shared::{CameraRuntimeStatus, ReadingEvent};

/// Time allowed for each worker to exit on stop
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of the dispatch loop
const DISPATCH_POLL: Duration = Duration::from_millis(500);

/// Result of a reading callback; errors are logged by the dispatcher
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Consumer of readings from every camera
pub type ReadingCallback = Arc<dyn Fn(ReadingEvent) -> CallbackResult + Send + Sync>;

/// Handle returned by [`CameraManager::add_reading_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadingCallbackId(u64);

type CallbackList = RwLock<Vec<(ReadingCallbackId, ReadingCallback)>>;

/// Coordinates camera workers and distributes their readings
pub struct CameraManager {
    opener: Arc<dyn StreamOpener>,
    options: WorkerOptions,
    workers: Mutex<HashMap<String, CameraWorker>>,
    readings_tx: Sender<ReadingEvent>,
    callbacks: Arc<CallbackList>,
    next_callback_id: AtomicU64,
    status_callback: RwLock<Option<StatusCallback>>,
    running: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl CameraManager {
    /// Create a manager with a reading queue of `queue_size` entries
    pub fn new(opener: Arc<dyn StreamOpener>, queue_size: usize, options: WorkerOptions) -> Self {
        let (readings_tx, readings_rx) = reading_channel(queue_size);
        let callbacks: Arc<CallbackList> = Arc::new(RwLock::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let dispatcher = {
            let callbacks = callbacks.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("reading-dispatch".to_string())
                .spawn(move || dispatch_loop(readings_rx, callbacks, running))
        };
        let dispatcher = match dispatcher {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to start reading dispatcher: {}", e);
                None
            }
        };

        Self {
            opener,
            options,
            workers: Mutex::new(HashMap::new()),
            readings_tx,
            callbacks,
            next_callback_id: AtomicU64::new(1),
            status_callback: RwLock::new(None),
            running,
            dispatcher: Mutex::new(dispatcher),
        }
    }

    /// Set the callback invoked on connection state changes of cameras added afterwards
    pub fn set_status_callback(&self, callback: StatusCallback) {
        *self.status_callback.write() = Some(callback);
    }

    /// Start a worker for `config`.
    ///
    /// Returns `Ok(false)` when the camera is disabled and was skipped.
    pub fn add_camera(&self, config: CameraConfig) -> Result<bool, CameraError> {
        config.validate()?;
        if !config.enabled {
            info!(camera = %config.id, "Camera disabled, skipping");
            return Ok(false);
        }

        let mut workers = self.workers.lock();
        if workers.contains_key(&config.id) {
            return Err(CameraError::AlreadyExists(config.id));
        }

        let id = config.id.clone();
        let worker = CameraWorker::spawn(
            config,
            self.opener.clone(),
            self.readings_tx.clone(),
            self.status_callback.read().clone(),
            self.options.clone(),
        )?;
        workers.insert(id.clone(), worker);
        info!(camera = %id, "Added camera");
        Ok(true)
    }

    /// Stop a worker and wait for it to exit
    pub fn remove_camera(&self, camera_id: &str) -> Result<(), CameraError> {
        let mut worker = self
            .workers
            .lock()
            .remove(camera_id)
            .ok_or_else(|| CameraError::NotFound(camera_id.to_string()))?;

        // Joined outside the registry lock
        worker.stop(WORKER_JOIN_TIMEOUT);
        info!(camera = %camera_id, "Removed camera");
        Ok(())
    }

    /// Replace the meters of a running camera
    pub fn update_camera_meters(&self, camera_id: &str, meters: Vec<MeterConfig>) -> Result<(), CameraError> {
        self.with_worker(camera_id, |worker| Ok(worker.replace_meters(meters)?))
    }

    /// Replace the indicators of a running camera
    pub fn update_camera_indicators(
        &self,
        camera_id: &str,
        indicators: Vec<IndicatorConfig>,
    ) -> Result<(), CameraError> {
        self.with_worker(camera_id, |worker| Ok(worker.replace_indicators(indicators)?))
    }

    /// Change how often a running camera runs recognition
    pub fn update_camera_processing_interval(&self, camera_id: &str, seconds: f64) -> Result<(), CameraError> {
        self.with_worker(camera_id, |worker| {
            worker.set_processing_interval(seconds);
            Ok(())
        })
    }

    pub fn get_camera_status(&self, camera_id: &str) -> Option<Arc<CameraRuntimeStatus>> {
        self.workers.lock().get(camera_id).map(CameraWorker::status)
    }

    /// Status of every camera, sorted by id
    pub fn get_all_camera_status(&self) -> Vec<Arc<CameraRuntimeStatus>> {
        let mut statuses: Vec<_> = self.workers.lock().values().map(CameraWorker::status).collect();
        statuses.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        statuses
    }

    pub fn get_latest_frame(&self, camera_id: &str) -> Option<Arc<CapturedFrame>> {
        self.workers.lock().get(camera_id)?.latest_frame()
    }

    /// Latest debug visualization of a meter or indicator
    pub fn get_debug_image(&self, camera_id: &str, region_id: &str) -> Option<Arc<RgbImage>> {
        self.workers.lock().get(camera_id)?.debug_image(region_id)
    }

    pub fn camera_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register a reading consumer
    pub fn add_reading_callback<F>(&self, callback: F) -> ReadingCallbackId
    where
        F: Fn(ReadingEvent) -> CallbackResult + Send + Sync + 'static,
    {
        let id = ReadingCallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Unregister a reading consumer; returns false for unknown handles
    pub fn remove_reading_callback(&self, id: ReadingCallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Readings waiting for dispatch
    pub fn queue_len(&self) -> usize {
        self.readings_tx.len()
    }

    /// Stop every worker and the dispatcher
    pub fn stop(&self) {
        let workers: Vec<CameraWorker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        info!(count = workers.len(), "Stopping cameras");

        for worker in &workers {
            worker.request_stop();
        }
        for mut worker in workers {
            if !worker.join(WORKER_JOIN_TIMEOUT) {
                warn!(camera = %worker.camera_id(), "Camera worker abandoned");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                error!("Reading dispatcher panicked");
            }
        }
    }

    fn with_worker(
        &self,
        camera_id: &str,
        f: impl FnOnce(&CameraWorker) -> Result<(), CameraError>,
    ) -> Result<(), CameraError> {
        let workers = self.workers.lock();
        let worker = workers
            .get(camera_id)
            .ok_or_else(|| CameraError::NotFound(camera_id.to_string()))?;
        f(worker)
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn dispatch_loop(readings: Receiver<ReadingEvent>, callbacks: Arc<CallbackList>, running: Arc<AtomicBool>) {
    debug!("Reading dispatcher started");
    while running.load(Ordering::SeqCst) {
        let event = match readings.recv_timeout(DISPATCH_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Snapshot so callbacks can register or unregister without deadlock
        let snapshot: Vec<ReadingCallback> = callbacks.read().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in snapshot {
            let event = event.clone();
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Reading callback failed: {}", e),
                Err(_) => error!("Reading callback panicked"),
            }
        }
    }
    debug!("Reading dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::worker::tests::{camera_with_meter, display_image, fast_options, ScriptedOpener, Step};
    use crate::config::ConfigError;
    use crate::shared::ConnectionState;
    use std::time::Instant;

    fn manager_with_frames(queue_size: usize) -> CameraManager {
        let script = vec![Step::Frame(display_image()); 1000];
        CameraManager::new(Arc::new(ScriptedOpener::new(script)), queue_size, fast_options())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_add_and_remove_camera() {
        let manager = manager_with_frames(100);
        assert!(manager.add_camera(camera_with_meter("b", &["m1"])).unwrap());
        assert!(manager.add_camera(camera_with_meter("a", &[])).unwrap());
        assert_eq!(manager.camera_ids(), vec!["a", "b"]);

        let ids: Vec<String> = manager
            .get_all_camera_status()
            .iter()
            .map(|s| s.camera_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        manager.remove_camera("b").unwrap();
        assert!(manager.get_camera_status("b").is_none());
        assert!(matches!(manager.remove_camera("b"), Err(CameraError::NotFound(_))));
        manager.stop();
    }

    #[test]
    fn test_duplicate_and_disabled_cameras() {
        let manager = manager_with_frames(100);
        manager.add_camera(camera_with_meter("cam1", &[])).unwrap();
        assert!(matches!(
            manager.add_camera(camera_with_meter("cam1", &[])),
            Err(CameraError::AlreadyExists(_))
        ));

        let mut disabled = camera_with_meter("cam2", &[]);
        disabled.enabled = false;
        assert!(!manager.add_camera(disabled).unwrap());
        assert_eq!(manager.camera_ids(), vec!["cam1"]);
        manager.stop();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let manager = manager_with_frames(100);
        let mut camera = camera_with_meter("cam1", &["m1"]);
        camera.meters[0].perspective.points.pop();
        assert!(matches!(manager.add_camera(camera), Err(CameraError::InvalidConfig(_))));

        manager.add_camera(camera_with_meter("cam1", &[])).unwrap();
        let duplicate = camera_with_meter("cam1", &["m1", "m1"]).meters;
        assert!(matches!(
            manager.update_camera_meters("cam1", duplicate),
            Err(CameraError::InvalidConfig(_))
        ));
        assert!(matches!(
            manager.update_camera_processing_interval("missing", 1.0),
            Err(CameraError::NotFound(_))
        ));
        manager.stop();
    }

    #[test]
    fn test_callbacks_receive_readings() {
        let manager = manager_with_frames(100);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        manager.add_reading_callback(move |event| {
            sink.lock().push(event);
            Ok(())
        });

        manager.add_camera(camera_with_meter("cam1", &["m1"])).unwrap();
        assert!(wait_for(|| !received.lock().is_empty()));
        assert!(manager.get_latest_frame("cam1").is_some());

        match &received.lock()[0] {
            ReadingEvent::Meter(reading) => assert_eq!(reading.raw_text, "42"),
            other => panic!("unexpected event {other:?}"),
        }
        manager.stop();
    }

    #[test]
    fn test_failing_callbacks_do_not_stop_dispatch() {
        let manager = manager_with_frames(100);
        manager.add_reading_callback(|_| Err("sink unavailable".into()));
        manager.add_reading_callback(|_| panic!("callback bug"));

        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        manager.add_reading_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        manager.add_camera(camera_with_meter("cam1", &["m1"])).unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) >= 3));
        manager.stop();
    }

    #[test]
    fn test_remove_reading_callback() {
        let manager = manager_with_frames(100);
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = manager.add_reading_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(manager.remove_reading_callback(id));
        assert!(!manager.remove_reading_callback(id));

        manager.add_camera(camera_with_meter("cam1", &["m1"])).unwrap();
        assert!(wait_for(|| manager
            .get_camera_status("cam1")
            .is_some_and(|s| s.meter("m1").is_some_and(|m| m.last_reading.is_some()))));
        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        manager.stop();
    }

    #[test]
    fn test_status_callback_and_stop() {
        let manager = manager_with_frames(100);
        let states = Arc::new(Mutex::new(Vec::new()));
        let recorded = states.clone();
        manager.set_status_callback(Arc::new(move |id: &str, state| {
            recorded.lock().push((id.to_string(), state));
        }));

        manager.add_camera(camera_with_meter("cam1", &[])).unwrap();
        assert!(wait_for(|| states
            .lock()
            .iter()
            .any(|(_, s)| *s == ConnectionState::Connected)));

        manager.stop();
        assert!(manager.camera_ids().is_empty());
        assert_eq!(
            states.lock().last(),
            Some(&("cam1".to_string(), ConnectionState::Disconnected))
        );
    }

    #[test]
    fn test_hot_update_through_manager() {
        let manager = manager_with_frames(1000);
        manager.add_camera(camera_with_meter("cam1", &["m1"])).unwrap();
        manager
            .update_camera_meters("cam1", camera_with_meter("cam1", &["m2"]).meters)
            .unwrap();
        manager.update_camera_processing_interval("cam1", 0.2).unwrap();

        assert!(wait_for(|| manager
            .get_camera_status("cam1")
            .is_some_and(|s| s.meter("m2").is_some() && s.meter("m1").is_none())));

        let mut lamp = camera_with_meter("cam1", &["m2"]).meters.remove(0).perspective;
        lamp.output_size = [10, 10];
        assert!(matches!(
            manager.update_camera_indicators("cam1", vec![IndicatorConfig::new("m2", lamp)]),
            Err(CameraError::InvalidConfig(ConfigError::DuplicateId { .. }))
        ));
        assert!(matches!(
            manager.update_camera_meters("nope", Vec::new()),
            Err(CameraError::NotFound(_))
        ));
        manager.stop();
    }
}
