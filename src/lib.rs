//! MeterEye - reads 7-segment meters and indicator lights from camera streams
//!
//! Each camera runs on its own worker thread that rectifies configured
//! regions of every frame, recognizes digits or lamp states, and publishes
//! readings to the camera manager. Readings are batched and forwarded to
//! export sinks (HTTP, SQLite, Redis pub/sub).

pub mod camera;
pub mod capture;
pub mod config;
pub mod export;
pub mod shared;
pub mod storage;
pub mod vision;
