//! Camera acquisition
//!
//! One worker thread per camera stream, coordinated by [`CameraManager`].

pub mod manager;
pub mod pipeline;
pub mod worker;

pub use manager::{CallbackResult, CameraManager, ReadingCallback, ReadingCallbackId};
pub use pipeline::RegionPipelines;
pub use worker::{Backoff, CameraWorker, FpsMeter, StatusCallback, WorkerOptions};

use thiserror::Error;

use crate::config::ConfigError;

/// Camera management errors
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera '{0}' already exists")]
    AlreadyExists(String),
    #[error("camera '{0}' not found")]
    NotFound(String),
    #[error("invalid camera configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("failed to start worker for camera '{camera_id}': {source}")]
    Spawn {
        camera_id: String,
        #[source]
        source: std::io::Error,
    },
}
