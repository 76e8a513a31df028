// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture backend abstraction
//!
//! The session state machine talks to the native media-capture engine only
//! through the traits in this module, so any engine (GStreamer, a scripted
//! test double) can sit underneath it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   Caller (CLI/UI)   │
//! └──────────┬──────────┘
//!            │ async requests
//!            ▼
//! ┌─────────────────────┐
//! │    CameraManager    │  ← one session per device, timeouts
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐      ┌──────────────────┐
//! │   CaptureSession    │◄─────┤ dispatcher thread│◄── EngineCallback
//! │ (state + ledger)    │      └──────────────────┘        ▲
//! └──────────┬──────────┘                                  │ events/samples
//!            │ commands                                    │
//!            ▼                                             │
//! ┌─────────────────────┐                                  │
//! │ CaptureEngine Trait ├──────────────────────────────────┘
//! └─────────────────────┘
//! ```

pub mod callback;
pub mod format_converters;
pub mod gst_platform;
pub mod manager;
pub mod negotiation;
pub mod pending;
pub mod session;
pub mod sinks;
pub mod textures;
pub mod types;

pub use callback::EngineCallback;
pub use manager::CameraManager;
pub use session::{CaptureSession, Lifecycle};
pub use textures::HeadlessTextureRegistrar;
pub use types::*;

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

/// Entry point into a native capture platform
pub trait CameraPlatform: Send + Sync {
    /// Enumerate video capture devices
    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>>;

    /// Open the video source for a device
    fn create_video_source(&self, device_id: &str) -> BackendResult<Box<dyn MediaSource>>;

    /// Open the system's default audio capture device
    ///
    /// # Returns
    /// `Ok(None)` when the system has no audio capture device
    fn create_default_audio_source(&self) -> BackendResult<Option<Box<dyn MediaSource>>>;

    /// Create an uninitialized capture engine
    fn create_engine(&self) -> BackendResult<Box<dyn CaptureEngine>>;

    /// Audio output types the platform can encode, best first
    ///
    /// # Arguments
    /// * `subtype` - Requested encoding, e.g. [`Subtype::Aac`]
    /// * `low_latency` - Prefer configurations suited to live capture
    fn audio_output_types(&self, subtype: Subtype, low_latency: bool) -> BackendResult<Vec<MediaType>>;
}

/// Kind of a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSourceKind {
    Video,
    Audio,
}

/// An opened capture device
///
/// Released on [`MediaSource::shutdown`] or drop.
pub trait MediaSource: Send {
    fn kind(&self) -> MediaSourceKind;

    /// Identifier of the underlying device
    fn device_id(&self) -> &str;

    fn shutdown(&mut self);

    /// Access to the concrete type for the engine that created it
    fn as_any(&self) -> &dyn Any;
}

/// Native capture engine
///
/// Commands return once issued; their outcome arrives later through the
/// [`EngineCallback`] given to [`CaptureEngine::initialize`].
pub trait CaptureEngine: Send {
    /// Bind sources and the callback. Completion is reported as `Initialized`.
    fn initialize(
        &mut self,
        callback: Arc<EngineCallback>,
        audio: Option<&dyn MediaSource>,
        video: &dyn MediaSource,
    ) -> BackendResult<()>;

    /// Media types the device offers on a source stream
    fn available_device_media_types(&self, stream: SourceStream) -> BackendResult<Vec<MediaType>>;

    /// Handle to one of the engine's sinks
    fn sink(&mut self, kind: SinkKind) -> BackendResult<Box<dyn CaptureSink>>;

    fn start_preview(&mut self) -> BackendResult<()>;

    fn stop_preview(&mut self) -> BackendResult<()>;

    fn start_record(&mut self) -> BackendResult<()>;

    /// # Arguments
    /// * `finalize` - Write the container trailer so the file is playable
    /// * `flush` - Discard queued samples instead of encoding them
    fn stop_record(&mut self, finalize: bool, flush: bool) -> BackendResult<()>;

    fn take_photo(&mut self) -> BackendResult<()>;

    /// Stop everything and release native resources. Must be idempotent.
    fn shutdown(&mut self);
}

/// Configurable output of the engine
pub trait CaptureSink: Send {
    fn kind(&self) -> SinkKind;

    fn remove_all_streams(&mut self) -> BackendResult<()>;

    /// Connect a source stream with the given output type
    ///
    /// # Returns
    /// Index of the added sink stream
    fn add_stream(&mut self, source: SourceStream, media_type: &MediaType) -> BackendResult<u32>;

    /// Deliver samples of `stream_index` to the bridge
    fn set_sample_callback(&mut self, stream_index: u32, callback: Arc<EngineCallback>) -> BackendResult<()>;

    fn set_output_path(&mut self, path: &Path) -> BackendResult<()>;
}

/// A delivered sample whose bytes can be locked for reading
pub trait MediaSample {
    /// Lock the sample as one contiguous buffer for the duration of `f`
    fn with_contiguous_buffer(&self, f: &mut dyn FnMut(&[u8])) -> BackendResult<()>;
}

/// Display surface registration
pub trait TextureRegistrar: Send + Sync {
    /// Allocate a texture identifier; identifiers are never negative
    fn register_texture(&self) -> BackendResult<i64>;

    fn unregister_texture(&self, texture_id: i64);

    /// Signal that a new frame can be read for `texture_id`
    fn mark_texture_frame_available(&self, texture_id: i64);
}
