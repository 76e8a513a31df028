// SPDX-License-Identifier: GPL-3.0-only

//! Camera Capture - capture sessions for a host UI
//!
//! This library drives a native capture engine on behalf of a caller that
//! issues asynchronous requests: create a camera, run and pause a preview,
//! take pictures and record video. Preview frames are converted to RGBA and
//! exposed through a texture registrar.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Capture sessions, engine traits and the GStreamer engine
//! - [`config`]: User configuration handling
//! - [`constants`]: Resolution ceilings, timeouts and pipeline tuning
//! - [`errors`]: Caller-facing error type
//! - [`storage`]: Output file naming
//!
//! # Example
//!
//! ```ignore
//! let platform = Arc::new(GstPlatform::new()?);
//! let manager = CameraManager::new(platform, Arc::new(HeadlessTextureRegistrar::new()));
//! let id = manager.create_camera(&device_id, SessionSettings::default()).await?;
//! let size = manager.initialize(id).await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::session::{SessionSettings, SessionStatus};
pub use backends::camera::{CameraManager, HeadlessTextureRegistrar, ResolutionPreset};
pub use config::Config;
pub use errors::{CaptureError, CaptureResult};
