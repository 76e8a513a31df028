// SPDX-License-Identifier: GPL-3.0-only

//! Capture session state machine
//!
//! A session owns one native engine bound to one device and drives it
//! through its lifecycle:
//!
//! ```text
//!  Uninitialized ──create──► Initializing ──Initialized──► Ready
//!        ▲                        │                          │
//!        └────────── reset ◄──────┴────────── reset ◄────────┘
//! ```
//!
//! Within `Ready`, preview, recording and photo capture are independent.
//! Every caller request is registered in the [`PendingResults`] ledger and
//! resolved exactly once: synchronously when it is rejected or is a no-op,
//! otherwise when the engine reports the matching event.
//!
//! Engine events and preview samples reach the state through the
//! [`EngineCallback`] bridge and a dispatcher thread that applies them under
//! the session lock. Messages from an engine instance that was since reset
//! are dropped by generation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::callback::{EngineCallback, EngineMessage, SampleGate};
use super::format_converters::{bgrx_to_rgba_into, rgba_len};
use super::negotiation::{MediaTypeCache, resolve_base_media_types};
use super::pending::{Outcome, PendingResult, PendingResults, Reply, RequestKind, resolve};
use super::sinks::CaptureSinks;
use super::types::{
    BackendError, BackendResult, EngineEvent, EngineEventKind, FrameSize, ResolutionPreset, SourceStream,
};
use super::{CameraPlatform, CaptureEngine, MediaSource, TextureRegistrar};
use crate::errors::{CaptureError, CaptureResult};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
}

/// Options fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSettings {
    pub enable_audio: bool,
    pub resolution_preset: ResolutionPreset,
}

/// Snapshot of a session's observable state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub lifecycle: Lifecycle,
    pub previewing: bool,
    pub recording: bool,
    pub photo_pending: bool,
    pub camera_id: Option<i64>,
    pub preview_size: Option<FrameSize>,
    pub capture_size: Option<FrameSize>,
    pub max_record_duration: Option<Duration>,
}

/// Read-only view of the latest converted preview frame
#[derive(Debug, Clone, Copy)]
pub struct PreviewFrame<'a> {
    /// Tightly packed RGBA, `width * height * 4` bytes
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Native handles owned by an initialized or initializing session
struct NativeResources {
    engine: Box<dyn CaptureEngine>,
    video_source: Box<dyn MediaSource>,
    audio_source: Option<Box<dyn MediaSource>>,
}

/// Source and destination pixel buffers
#[derive(Debug, Default)]
struct FrameBuffers {
    source: Vec<u8>,
    dest: Vec<u8>,
    dest_size: Option<FrameSize>,
    has_frame: bool,
}

impl FrameBuffers {
    /// Copy a BGRX sample and convert it into the RGBA destination.
    ///
    /// The source buffer is reallocated only when the sample length changes,
    /// the destination only when the preview size changes.
    fn update(&mut self, sample: &[u8], size: FrameSize) {
        if self.source.len() != sample.len() {
            self.source = vec![0; sample.len()];
        }
        self.source.copy_from_slice(sample);

        if self.dest_size != Some(size) {
            self.dest = vec![0; rgba_len(size.width, size.height)];
            self.dest_size = Some(size);
        }
        bgrx_to_rgba_into(&self.source, &mut self.dest, size.width, size.height);
        self.has_frame = true;
    }
}

struct SessionState {
    device_id: String,
    platform: Arc<dyn CameraPlatform>,
    textures: Arc<dyn TextureRegistrar>,
    sender: UnboundedSender<EngineMessage>,
    gate: Arc<SampleGate>,
    generation: u64,

    lifecycle: Lifecycle,
    settings: SessionSettings,
    texture_id: Option<i64>,
    resources: Option<NativeResources>,
    callback: Option<Arc<EngineCallback>>,
    sinks: CaptureSinks,
    media_types: Option<MediaTypeCache>,

    previewing: bool,
    /// A preview start arrived while a pause was in flight
    restart_preview: bool,
    recording: bool,
    record_stop_in_flight: bool,
    record_path: Option<PathBuf>,
    /// Set from a successful `take_photo` until the engine reports `PhotoTaken`
    photo_in_flight: bool,
    picture_path: Option<PathBuf>,
    max_record_duration: Option<Duration>,

    frames: FrameBuffers,
    pending: PendingResults,
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            lifecycle: self.lifecycle,
            previewing: self.previewing,
            recording: self.recording,
            photo_pending: self.photo_in_flight || self.pending.has(RequestKind::TakePicture),
            camera_id: self.texture_id,
            preview_size: self.media_types.as_ref().map(|m| m.preview_size),
            capture_size: self.media_types.as_ref().map(|m| m.capture_size),
            max_record_duration: self.max_record_duration,
        }
    }

    fn sync_gate(&self) {
        self.gate
            .set_open(self.lifecycle == Lifecycle::Ready && self.previewing);
    }

    fn not_ready(action: RequestKind) -> CaptureError {
        CaptureError::InvalidState {
            action,
            reason: "camera is not initialized",
        }
    }

    fn preview_start_in_flight(&self) -> bool {
        self.pending.has(RequestKind::Initialize) || self.pending.has(RequestKind::ResumePreview)
    }

    /// Success payload of a start-preview request
    fn preview_reply(&self, kind: RequestKind) -> Reply {
        match (kind, &self.media_types) {
            (RequestKind::Initialize, Some(media_types)) => Reply::PreviewSize {
                width: f64::from(media_types.preview_size.width),
                height: f64::from(media_types.preview_size.height),
            },
            _ => Reply::Done,
        }
    }

    /// Negotiate base media types on first use
    fn ensure_media_types(&mut self, action: RequestKind) -> CaptureResult<MediaTypeCache> {
        if let Some(media_types) = &self.media_types {
            return Ok(media_types.clone());
        }

        let resources = self.resources.as_ref().ok_or_else(|| Self::not_ready(action))?;
        let candidates = resources
            .engine
            .available_device_media_types(SourceStream::VideoPreview)
            .map_err(|e| CaptureError::NegotiationFailure(e.to_string()))?;
        let media_types = resolve_base_media_types(&candidates, self.settings.resolution_preset)?;

        self.media_types = Some(media_types.clone());
        Ok(media_types)
    }

    // ===== Commands =====

    fn create(&mut self, settings: SessionSettings, result: PendingResult) {
        if self.lifecycle == Lifecycle::Ready {
            if let Some(camera_id) = self.texture_id {
                debug!(camera_id, "Camera already created");
                resolve(RequestKind::CreateCamera, result, Ok(Reply::CameraId(camera_id)));
                return;
            }
        }
        if !self.pending.add(RequestKind::CreateCamera, result) {
            return;
        }
        if self.resources.is_some() {
            // A previous creation was abandoned mid-way
            self.release_native();
        }

        self.settings = settings;
        if let Err(e) = self.start_engine() {
            error!(device_id = %self.device_id, error = %e, "Failed to create capture engine");
            let result = self.pending.take(RequestKind::CreateCamera);
            self.reset();
            if let Some(result) = result {
                resolve(RequestKind::CreateCamera, result, Err(e));
            }
        }
    }

    fn start_engine(&mut self) -> CaptureResult<()> {
        let action = RequestKind::CreateCamera;
        let command = |e: BackendError| CaptureError::command(action, e);

        let texture_id = self.textures.register_texture().map_err(command)?;
        self.texture_id = Some(texture_id);

        let video_source = self
            .platform
            .create_video_source(&self.device_id)
            .map_err(|e| match e {
                BackendError::DeviceNotFound(_) => CaptureError::DeviceNotFound(self.device_id.clone()),
                e => command(e),
            })?;

        let audio_source = if self.settings.enable_audio {
            let source = self.platform.create_default_audio_source().map_err(command)?;
            if source.is_none() {
                warn!("No audio capture device, continuing without audio source");
            }
            source
        } else {
            None
        };

        let mut engine = self.platform.create_engine().map_err(command)?;

        self.generation += 1;
        let callback = Arc::new(EngineCallback::new(
            self.generation,
            self.sender.clone(),
            Arc::clone(&self.gate),
        ));

        self.lifecycle = Lifecycle::Initializing;
        engine
            .initialize(Arc::clone(&callback), audio_source.as_deref(), &*video_source)
            .map_err(command)?;

        info!(
            device_id = %self.device_id,
            camera_id = texture_id,
            audio = audio_source.is_some(),
            preset = %self.settings.resolution_preset,
            "Capture engine initializing"
        );

        self.resources = Some(NativeResources {
            engine,
            video_source,
            audio_source,
        });
        self.callback = Some(callback);
        Ok(())
    }

    fn start_preview(&mut self, kind: RequestKind, result: PendingResult) {
        if self.lifecycle != Lifecycle::Ready {
            resolve(kind, result, Err(Self::not_ready(kind)));
            return;
        }
        let pausing = self.pending.has(RequestKind::PausePreview);
        if self.previewing && !pausing {
            resolve(kind, result, Ok(self.preview_reply(kind)));
            return;
        }

        let in_flight = self.preview_start_in_flight();
        if !self.pending.add(kind, result) {
            return;
        }
        if pausing {
            debug!(%kind, "Pause in flight, preview restarts once it stops");
            self.restart_preview = true;
            return;
        }
        if in_flight {
            debug!(%kind, "Preview start already in flight");
            return;
        }

        if let Err(e) = self.issue_start_preview(kind) {
            warn!(%kind, error = %e, "Failed to start preview");
            self.pending.complete(kind, Err(e));
        }
    }

    /// Resolve every waiting start-preview request
    fn complete_preview_starts(&mut self, outcome: impl Fn(&Self, RequestKind) -> Outcome) {
        for kind in [RequestKind::Initialize, RequestKind::ResumePreview] {
            if self.pending.has(kind) {
                let outcome = outcome(self, kind);
                self.pending.complete(kind, outcome);
            }
        }
    }

    /// Issue the preview start deferred behind a pause
    fn restart_preview_after_pause(&mut self) {
        self.restart_preview = false;
        let kind = if self.pending.has(RequestKind::Initialize) {
            RequestKind::Initialize
        } else if self.pending.has(RequestKind::ResumePreview) {
            RequestKind::ResumePreview
        } else {
            return;
        };

        if self.previewing {
            // The pause failed, preview never stopped
            self.complete_preview_starts(|state, kind| Ok(state.preview_reply(kind)));
            return;
        }
        if let Err(e) = self.issue_start_preview(kind) {
            warn!(%kind, error = %e, "Failed to restart preview");
            self.complete_preview_starts(|_, _| Err(e.clone()));
        }
    }

    fn issue_start_preview(&mut self, kind: RequestKind) -> CaptureResult<()> {
        let media_types = self.ensure_media_types(kind)?;
        let callback = self.callback.clone().ok_or_else(|| Self::not_ready(kind))?;
        let resources = self.resources.as_mut().ok_or_else(|| Self::not_ready(kind))?;

        self.sinks
            .init_preview(resources.engine.as_mut(), &media_types, &callback)?;
        resources
            .engine
            .start_preview()
            .map_err(|e| CaptureError::command(kind, e))
    }

    fn pause_preview(&mut self, result: PendingResult) {
        let kind = RequestKind::PausePreview;
        if self.lifecycle != Lifecycle::Ready {
            resolve(kind, result, Err(Self::not_ready(kind)));
            return;
        }
        if !self.previewing && !self.preview_start_in_flight() {
            debug!("Preview not running, nothing to pause");
            resolve(kind, result, Ok(Reply::Done));
            return;
        }
        if !self.pending.add(kind, result) {
            return;
        }

        let issued = match self.resources.as_mut() {
            Some(resources) => resources
                .engine
                .stop_preview()
                .map_err(|e| CaptureError::command(kind, e)),
            None => Err(Self::not_ready(kind)),
        };
        if let Err(e) = issued {
            self.pending.complete(kind, Err(e));
        }
    }

    fn start_record(&mut self, path: PathBuf, max_duration: Option<Duration>, result: PendingResult) {
        let kind = RequestKind::StartRecord;
        if self.lifecycle != Lifecycle::Ready {
            resolve(kind, result, Err(Self::not_ready(kind)));
            return;
        }
        if self.recording {
            resolve(
                kind,
                result,
                Err(CaptureError::InvalidState {
                    action: kind,
                    reason: "already recording",
                }),
            );
            return;
        }
        if !self.pending.add(kind, result) {
            return;
        }

        match self.issue_start_record(&path) {
            Ok(()) => {
                info!(path = %path.display(), ?max_duration, "Recording requested");
                self.record_path = Some(path);
                self.max_record_duration = max_duration;
            }
            Err(e) => {
                warn!(error = %e, "Failed to start recording");
                self.pending.complete(kind, Err(e));
            }
        }
    }

    fn issue_start_record(&mut self, path: &std::path::Path) -> CaptureResult<()> {
        let kind = RequestKind::StartRecord;
        let media_types = self.ensure_media_types(kind)?;
        let resources = self.resources.as_mut().ok_or_else(|| Self::not_ready(kind))?;

        self.sinks.init_record(
            resources.engine.as_mut(),
            self.platform.as_ref(),
            &media_types,
            path,
            self.settings.enable_audio,
        )?;
        resources
            .engine
            .start_record()
            .map_err(|e| CaptureError::command(kind, e))
    }

    fn stop_record(&mut self, result: PendingResult) {
        let kind = RequestKind::StopRecord;
        if !self.recording {
            debug!("Not recording, nothing to stop");
            resolve(kind, result, Ok(Reply::Path(PathBuf::new())));
            return;
        }
        if !self.pending.add(kind, result) {
            return;
        }
        if self.record_stop_in_flight {
            debug!("Recording stop already in flight");
            return;
        }

        let issued = match self.resources.as_mut() {
            Some(resources) => resources
                .engine
                .stop_record(true, false)
                .map_err(|e| CaptureError::command(kind, e)),
            None => Err(Self::not_ready(kind)),
        };
        match issued {
            Ok(()) => self.record_stop_in_flight = true,
            Err(e) => {
                self.pending.complete(kind, Err(e));
            }
        }
    }

    fn take_picture(&mut self, path: PathBuf, result: PendingResult) {
        let kind = RequestKind::TakePicture;
        if self.lifecycle != Lifecycle::Ready {
            resolve(kind, result, Err(Self::not_ready(kind)));
            return;
        }
        if !self.pending.add(kind, result) {
            return;
        }
        if self.photo_in_flight {
            // An abandoned capture has not reported back yet
            self.pending.complete(
                kind,
                Err(CaptureError::InvalidState {
                    action: kind,
                    reason: "previous picture still in progress",
                }),
            );
            return;
        }

        match self.issue_take_picture(&path) {
            Ok(()) => {
                self.photo_in_flight = true;
                self.picture_path = Some(path);
            }
            Err(e) => {
                warn!(error = %e, "Failed to take picture");
                self.pending.complete(kind, Err(e));
            }
        }
    }

    fn issue_take_picture(&mut self, path: &std::path::Path) -> CaptureResult<()> {
        let kind = RequestKind::TakePicture;
        let media_types = self.ensure_media_types(kind)?;
        let resources = self.resources.as_mut().ok_or_else(|| Self::not_ready(kind))?;

        self.sinks
            .init_photo(resources.engine.as_mut(), &media_types, path)?;
        resources
            .engine
            .take_photo()
            .map_err(|e| CaptureError::command(kind, e))
    }

    /// Withdraw a request whose caller stopped waiting
    fn abandon(&mut self, kind: RequestKind) {
        if self.pending.take(kind).is_none() {
            return;
        }
        warn!(%kind, device_id = %self.device_id, "Request abandoned");
        if kind == RequestKind::CreateCamera {
            self.reset();
        }
    }

    // ===== Engine events =====

    fn handle_event(&mut self, generation: u64, event: EngineEvent) {
        if generation != self.generation || self.resources.is_none() {
            debug!(generation, kind = ?event.kind, "Dropping event from released engine");
            return;
        }

        let EngineEvent { kind, status } = event;
        match kind {
            EngineEventKind::Initialized => self.on_initialized(status),
            EngineEventKind::Error => self.on_engine_error(status),
            EngineEventKind::PreviewStarted => self.on_preview_started(status),
            EngineEventKind::PreviewStopped => self.on_preview_stopped(status),
            EngineEventKind::RecordStarted => self.on_record_started(status),
            EngineEventKind::RecordStopped => self.on_record_stopped(status),
            EngineEventKind::PhotoTaken => self.on_photo_taken(status),
            EngineEventKind::Unhandled(name) => {
                debug!(event = %name, ok = status.is_ok(), "Unhandled engine event");
            }
        }
    }

    fn fail_creation(&mut self, error: BackendError) {
        error!(device_id = %self.device_id, error = %error, "Capture engine failed to initialize");
        let result = self.pending.take(RequestKind::CreateCamera);
        self.reset();
        if let Some(result) = result {
            resolve(
                RequestKind::CreateCamera,
                result,
                Err(CaptureError::reported(RequestKind::CreateCamera, error)),
            );
        }
    }

    fn on_initialized(&mut self, status: BackendResult<()>) {
        if self.lifecycle != Lifecycle::Initializing {
            debug!(lifecycle = ?self.lifecycle, "Ignoring initialized event");
            return;
        }
        match (status, self.texture_id) {
            (Ok(()), Some(camera_id)) => {
                self.lifecycle = Lifecycle::Ready;
                self.sync_gate();
                info!(device_id = %self.device_id, camera_id, "Camera initialized");
                self.pending
                    .complete(RequestKind::CreateCamera, Ok(Reply::CameraId(camera_id)));
            }
            (Ok(()), None) => {
                self.fail_creation(BackendError::InitializationFailed("no texture registered".into()));
            }
            (Err(e), _) => self.fail_creation(e),
        }
    }

    fn on_engine_error(&mut self, status: BackendResult<()>) {
        let error = match status {
            Err(e) => e,
            Ok(()) => BackendError::Other("unspecified engine error".into()),
        };
        if self.lifecycle == Lifecycle::Initializing {
            self.fail_creation(error);
        } else {
            error!(device_id = %self.device_id, error = %error, "Capture engine error");
        }
    }

    fn on_preview_started(&mut self, status: BackendResult<()>) {
        if status.is_ok() {
            self.previewing = true;
            self.sync_gate();
            info!(preview_size = ?self.media_types.as_ref().map(|m| m.preview_size), "Preview started");
        }
        if self.restart_preview && self.pending.has(RequestKind::PausePreview) {
            debug!("Preview started ahead of a pause, waiting for the restart");
            return;
        }

        self.complete_preview_starts(|state, kind| match &status {
            Ok(()) => Ok(state.preview_reply(kind)),
            Err(e) => Err(CaptureError::reported(kind, e.clone())),
        });
    }

    fn on_preview_stopped(&mut self, status: BackendResult<()>) {
        let outcome = match status {
            Ok(()) => {
                self.previewing = false;
                self.sync_gate();
                info!("Preview stopped");
                Ok(Reply::Done)
            }
            Err(e) => Err(CaptureError::reported(RequestKind::PausePreview, e)),
        };
        self.pending.complete(RequestKind::PausePreview, outcome);

        if self.restart_preview {
            self.restart_preview_after_pause();
        }
    }

    fn on_record_started(&mut self, status: BackendResult<()>) {
        let outcome = match status {
            Ok(()) => {
                self.recording = true;
                info!(path = ?self.record_path, "Recording started");
                Ok(Reply::Done)
            }
            Err(e) => {
                self.record_path = None;
                self.max_record_duration = None;
                Err(CaptureError::reported(RequestKind::StartRecord, e))
            }
        };
        self.pending.complete(RequestKind::StartRecord, outcome);
    }

    fn on_record_stopped(&mut self, status: BackendResult<()>) {
        self.record_stop_in_flight = false;
        let outcome = match status {
            Ok(()) => {
                self.recording = false;
                self.max_record_duration = None;
                let path = self.record_path.take().unwrap_or_default();
                info!(path = %path.display(), "Recording stopped");
                Ok(Reply::Path(path))
            }
            Err(e) => Err(CaptureError::reported(RequestKind::StopRecord, e)),
        };
        self.pending.complete(RequestKind::StopRecord, outcome);
    }

    fn on_photo_taken(&mut self, status: BackendResult<()>) {
        self.photo_in_flight = false;
        let path = self.picture_path.take();
        let outcome = match (status, path) {
            (Ok(()), Some(path)) => {
                info!(path = %path.display(), "Picture taken");
                Ok(Reply::Path(path))
            }
            (Ok(()), None) => Ok(Reply::Path(PathBuf::new())),
            (Err(e), _) => Err(CaptureError::reported(RequestKind::TakePicture, e)),
        };
        self.pending.complete(RequestKind::TakePicture, outcome);
    }

    /// Convert a sample into the display buffer.
    ///
    /// # Returns
    /// The texture to notify, or `None` if the sample was dropped
    fn handle_sample(&mut self, generation: u64, sample: &[u8]) -> Option<i64> {
        if generation != self.generation || self.lifecycle != Lifecycle::Ready || !self.previewing {
            return None;
        }
        let size = self.media_types.as_ref()?.preview_size;
        self.frames.update(sample, size);
        self.texture_id
    }

    // ===== Teardown =====

    /// Stop activity and release engine, sources and sinks
    fn release_native(&mut self) {
        self.gate.set_open(false);
        self.generation += 1;

        if let Some(mut resources) = self.resources.take() {
            if self.recording {
                if let Err(e) = resources.engine.stop_record(true, false) {
                    warn!(error = %e, "Failed to stop recording during reset");
                }
            }
            if self.previewing {
                if let Err(e) = resources.engine.stop_preview() {
                    warn!(error = %e, "Failed to stop preview during reset");
                }
            }
            self.sinks.release();
            resources.engine.shutdown();
            resources.video_source.shutdown();
            if let Some(audio) = resources.audio_source.as_mut() {
                audio.shutdown();
            }
        }
        self.sinks.release();
        self.callback = None;
    }

    /// Return to `Uninitialized`, releasing everything. Safe to repeat.
    fn reset(&mut self) {
        self.release_native();

        if let Some(texture_id) = self.texture_id.take() {
            self.textures.unregister_texture(texture_id);
        }
        self.media_types = None;
        self.frames = FrameBuffers::default();
        self.previewing = false;
        self.restart_preview = false;
        self.recording = false;
        self.record_stop_in_flight = false;
        self.record_path = None;
        self.photo_in_flight = false;
        self.picture_path = None;
        self.max_record_duration = None;
        self.lifecycle = Lifecycle::Uninitialized;
        self.pending.clear_all();
        debug!(device_id = %self.device_id, "Session reset");
    }
}

/// Receiver side of a registered request
#[derive(Debug)]
pub struct PendingReply {
    kind: RequestKind,
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingReply {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait for the outcome, withdrawing the request after `timeout`
    pub async fn wait(self, session: &CaptureSession, timeout: Duration) -> CaptureResult<Reply> {
        let PendingReply { kind, mut receiver } = self;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CaptureError::Disposed),
            Err(_) => {
                session.abandon(kind);
                // The outcome may have landed between the deadline and the withdrawal
                receiver.try_recv().unwrap_or(Err(CaptureError::Timeout {
                    action: kind,
                    after: timeout,
                }))
            }
        }
    }
}

/// A capture session bound to one device
pub struct CaptureSession {
    device_id: String,
    state: Arc<Mutex<SessionState>>,
    sender: UnboundedSender<EngineMessage>,
    dispatcher: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Create an uninitialized session and start its dispatcher thread
    pub fn new(
        device_id: impl Into<String>,
        platform: Arc<dyn CameraPlatform>,
        textures: Arc<dyn TextureRegistrar>,
    ) -> std::io::Result<Self> {
        let device_id = device_id.into();
        let (sender, receiver) = unbounded_channel();
        let gate = Arc::new(SampleGate::default());

        let state = Arc::new(Mutex::new(SessionState {
            device_id: device_id.clone(),
            platform,
            textures: Arc::clone(&textures),
            sender: sender.clone(),
            gate: Arc::clone(&gate),
            generation: 0,
            lifecycle: Lifecycle::Uninitialized,
            settings: SessionSettings::default(),
            texture_id: None,
            resources: None,
            callback: None,
            sinks: CaptureSinks::new(),
            media_types: None,
            previewing: false,
            restart_preview: false,
            recording: false,
            record_stop_in_flight: false,
            record_path: None,
            photo_in_flight: false,
            picture_path: None,
            max_record_duration: None,
            frames: FrameBuffers::default(),
            pending: PendingResults::new(),
        }));

        let dispatcher = spawn_dispatcher(Arc::downgrade(&state), receiver, gate, textures, &device_id)?;

        Ok(Self {
            device_id,
            state,
            sender,
            dispatcher: Some(dispatcher),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Session identifier, equal to the registered texture id
    pub fn camera_id(&self) -> Option<i64> {
        lock(&self.state).texture_id
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.state).status()
    }

    fn request(&self, kind: RequestKind, issue: impl FnOnce(&mut SessionState, PendingResult)) -> PendingReply {
        let (result, receiver) = oneshot::channel();
        issue(&mut lock(&self.state), result);
        PendingReply { kind, receiver }
    }

    /// Open the device and initialize the engine; resolves with the camera id
    pub fn create(&self, settings: SessionSettings) -> PendingReply {
        self.request(RequestKind::CreateCamera, |state, result| state.create(settings, result))
    }

    /// Start preview; resolves with the preview size
    pub fn start_preview(&self) -> PendingReply {
        self.request(RequestKind::Initialize, |state, result| {
            state.start_preview(RequestKind::Initialize, result)
        })
    }

    pub fn resume_preview(&self) -> PendingReply {
        self.request(RequestKind::ResumePreview, |state, result| {
            state.start_preview(RequestKind::ResumePreview, result)
        })
    }

    pub fn pause_preview(&self) -> PendingReply {
        self.request(RequestKind::PausePreview, |state, result| state.pause_preview(result))
    }

    /// Start recording to `path`
    ///
    /// `max_duration` is kept for the caller and not enforced here.
    pub fn start_record(&self, path: PathBuf, max_duration: Option<Duration>) -> PendingReply {
        self.request(RequestKind::StartRecord, |state, result| {
            state.start_record(path, max_duration, result)
        })
    }

    /// Stop recording; resolves with the file path, empty if nothing was recording
    pub fn stop_record(&self) -> PendingReply {
        self.request(RequestKind::StopRecord, |state, result| state.stop_record(result))
    }

    /// Capture a still to `path`; resolves with the path
    pub fn take_picture(&self, path: PathBuf) -> PendingReply {
        self.request(RequestKind::TakePicture, |state, result| state.take_picture(path, result))
    }

    /// Withdraw an outstanding request without resolving it
    pub fn abandon(&self, kind: RequestKind) {
        lock(&self.state).abandon(kind);
    }

    /// Release everything and fail outstanding requests with `Disposed`
    pub fn reset(&self) {
        lock(&self.state).reset();
    }

    /// Run `f` on the latest preview frame, if one has been converted
    pub fn with_preview_frame<R>(&self, f: impl FnOnce(PreviewFrame<'_>) -> R) -> Option<R> {
        let state = lock(&self.state);
        let frames = &state.frames;
        let size = frames.dest_size.filter(|_| frames.has_frame)?;
        Some(f(PreviewFrame {
            data: &frames.dest,
            width: size.width,
            height: size.height,
        }))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.reset();
        let _ = self.sender.send(EngineMessage::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                error!(device_id = %self.device_id, "Event dispatcher panicked");
            }
        }
    }
}

fn spawn_dispatcher(
    state: Weak<Mutex<SessionState>>,
    mut receiver: UnboundedReceiver<EngineMessage>,
    gate: Arc<SampleGate>,
    textures: Arc<dyn TextureRegistrar>,
    device_id: &str,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("capture-events-{}", device_id))
        .spawn(move || {
            while let Some(message) = receiver.blocking_recv() {
                let Some(state) = state.upgrade() else {
                    break;
                };
                match message {
                    EngineMessage::Shutdown => break,
                    EngineMessage::Event { generation, event } => {
                        lock(&state).handle_event(generation, event);
                    }
                    EngineMessage::Sample { generation, data } => {
                        let notify = lock(&state).handle_sample(generation, &data);
                        gate.release();
                        // Outside the lock: the display may read the frame right away
                        if let Some(texture_id) = notify {
                            textures.mark_texture_frame_available(texture_id);
                        }
                    }
                }
            }
            debug!("Event dispatcher stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_buffers_reallocate_only_on_change() {
        let mut frames = FrameBuffers::default();
        let size = FrameSize::new(2, 1);

        frames.update(&[1, 2, 3, 0, 4, 5, 6, 0], size);
        assert_eq!(frames.dest, vec![3, 2, 1, 255, 6, 5, 4, 255]);
        let dest_ptr = frames.dest.as_ptr();
        let source_ptr = frames.source.as_ptr();

        frames.update(&[9, 9, 9, 0, 8, 8, 8, 0], size);
        assert_eq!(frames.dest.as_ptr(), dest_ptr);
        assert_eq!(frames.source.as_ptr(), source_ptr);
        assert_eq!(frames.dest, vec![9, 9, 9, 255, 8, 8, 8, 255]);

        frames.update(&[1, 1, 1, 1], FrameSize::new(1, 1));
        assert_eq!(frames.dest.len(), 4);
        assert_eq!(frames.source.len(), 4);
    }
}
