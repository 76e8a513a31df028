// SPDX-License-Identifier: GPL-3.0-only

//! Caller-facing camera manager
//!
//! The manager provides:
//! - One capture session per device, addressed by camera id
//! - Async request/response over the session ledger with finite timeouts
//! - Read-only access to the latest preview frame
//!
//! Cloning is cheap; clones share the same sessions. Sessions are released
//! when disposed or when the last clone is dropped.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use super::pending::{Reply, RequestKind};
use super::session::{CaptureSession, PendingReply, PreviewFrame, SessionSettings, SessionStatus};
use super::types::{BackendError, BackendResult, CameraDevice, FrameSize};
use super::{CameraPlatform, TextureRegistrar};
use crate::config::TimeoutSettings;
use crate::errors::{CaptureError, CaptureResult};

/// Internal manager state
struct ManagerState {
    platform: Arc<dyn CameraPlatform>,
    textures: Arc<dyn TextureRegistrar>,
    timeouts: TimeoutSettings,
    sessions: Vec<Arc<CaptureSession>>,
}

/// Camera manager
#[derive(Clone)]
pub struct CameraManager {
    state: Arc<Mutex<ManagerState>>,
}

fn unexpected(kind: RequestKind, reply: Reply) -> CaptureError {
    CaptureError::EngineReportedFailure {
        action: kind,
        message: format!("unexpected reply {:?}", reply),
    }
}

impl CameraManager {
    /// Create a manager over a capture platform
    ///
    /// # Arguments
    /// * `platform` - Native capture platform
    /// * `textures` - Display surface registrar; camera ids are its texture ids
    pub fn new(platform: Arc<dyn CameraPlatform>, textures: Arc<dyn TextureRegistrar>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                platform,
                textures,
                timeouts: TimeoutSettings::default(),
                sessions: Vec::new(),
            })),
        }
    }

    pub fn with_timeouts(self, timeouts: TimeoutSettings) -> Self {
        self.lock().timeouts = timeouts;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeouts(&self) -> TimeoutSettings {
        self.lock().timeouts
    }

    fn session(&self, camera_id: i64) -> CaptureResult<Arc<CaptureSession>> {
        self.lock()
            .sessions
            .iter()
            .find(|session| session.camera_id() == Some(camera_id))
            .cloned()
            .ok_or(CaptureError::SessionMismatch { camera_id })
    }

    fn remove(&self, session: &Arc<CaptureSession>) {
        self.lock()
            .sessions
            .retain(|other| !Arc::ptr_eq(other, session));
    }

    async fn wait(session: &CaptureSession, reply: PendingReply, timeout: Duration) -> CaptureResult<Reply> {
        reply.wait(session, timeout).await
    }

    /// Enumerate video capture devices
    pub fn available_cameras(&self) -> BackendResult<Vec<CameraDevice>> {
        let platform = Arc::clone(&self.lock().platform);
        platform.enumerate_devices()
    }

    /// Create a camera for `device_id`
    ///
    /// # Returns
    /// The camera id, used to address every later request
    pub async fn create_camera(&self, device_id: &str, settings: SessionSettings) -> CaptureResult<i64> {
        let (session, timeout) = {
            let mut state = self.lock();
            if state.sessions.iter().any(|s| s.device_id() == device_id) {
                return Err(CaptureError::DeviceInUse(device_id.to_string()));
            }
            let session = CaptureSession::new(device_id, Arc::clone(&state.platform), Arc::clone(&state.textures))
                .map_err(|e| CaptureError::command(RequestKind::CreateCamera, BackendError::from(e)))?;
            let session = Arc::new(session);
            state.sessions.push(Arc::clone(&session));
            (session, state.timeouts.command())
        };

        info!(device_id, preset = %settings.resolution_preset, audio = settings.enable_audio, "Creating camera");
        let reply = session.create(settings);
        match Self::wait(&session, reply, timeout).await {
            Ok(Reply::CameraId(camera_id)) => Ok(camera_id),
            Ok(other) => {
                self.remove(&session);
                Err(unexpected(RequestKind::CreateCamera, other))
            }
            Err(e) => {
                warn!(device_id, error = %e, "Camera creation failed");
                self.remove(&session);
                Err(e)
            }
        }
    }

    /// Start preview
    ///
    /// # Returns
    /// The negotiated preview size
    pub async fn initialize(&self, camera_id: i64) -> CaptureResult<FrameSize> {
        let session = self.session(camera_id)?;
        let reply = session.start_preview();
        match Self::wait(&session, reply, self.timeouts().command()).await? {
            Reply::PreviewSize { width, height } => Ok(FrameSize::new(width as u32, height as u32)),
            other => Err(unexpected(RequestKind::Initialize, other)),
        }
    }

    pub async fn pause_preview(&self, camera_id: i64) -> CaptureResult<()> {
        let session = self.session(camera_id)?;
        let reply = session.pause_preview();
        Self::wait(&session, reply, self.timeouts().command()).await.map(|_| ())
    }

    pub async fn resume_preview(&self, camera_id: i64) -> CaptureResult<()> {
        let session = self.session(camera_id)?;
        let reply = session.resume_preview();
        Self::wait(&session, reply, self.timeouts().command()).await.map(|_| ())
    }

    /// Start recording to `path`
    ///
    /// `max_duration` is advisory; see [`SessionStatus::max_record_duration`].
    pub async fn start_video_recording(
        &self,
        camera_id: i64,
        path: PathBuf,
        max_duration: Option<Duration>,
    ) -> CaptureResult<()> {
        let session = self.session(camera_id)?;
        let reply = session.start_record(path, max_duration);
        Self::wait(&session, reply, self.timeouts().command()).await.map(|_| ())
    }

    /// Stop recording
    ///
    /// # Returns
    /// Path of the finished file, or an empty path if nothing was recording
    pub async fn stop_video_recording(&self, camera_id: i64) -> CaptureResult<PathBuf> {
        let session = self.session(camera_id)?;
        let reply = session.stop_record();
        match Self::wait(&session, reply, self.timeouts().record_stop()).await? {
            Reply::Path(path) => Ok(path),
            other => Err(unexpected(RequestKind::StopRecord, other)),
        }
    }

    /// Capture a still photo to `path`
    pub async fn take_picture(&self, camera_id: i64, path: PathBuf) -> CaptureResult<PathBuf> {
        let session = self.session(camera_id)?;
        let reply = session.take_picture(path);
        match Self::wait(&session, reply, self.timeouts().photo()).await? {
            Reply::Path(path) => Ok(path),
            other => Err(unexpected(RequestKind::TakePicture, other)),
        }
    }

    /// Tear down a camera. Outstanding requests resolve with `Disposed`.
    pub fn dispose(&self, camera_id: i64) {
        let session = {
            let mut state = self.lock();
            let index = state
                .sessions
                .iter()
                .position(|session| session.camera_id() == Some(camera_id));
            index.map(|index| state.sessions.remove(index))
        };

        match session {
            Some(session) => {
                info!(camera_id, device_id = session.device_id(), "Disposing camera");
                session.reset();
            }
            None => warn!(camera_id, "Dispose for unknown camera"),
        }
    }

    /// Tear down every camera
    pub fn dispose_all(&self) {
        let sessions = std::mem::take(&mut self.lock().sessions);
        for session in sessions {
            session.reset();
        }
    }

    pub fn status(&self, camera_id: i64) -> CaptureResult<SessionStatus> {
        Ok(self.session(camera_id)?.status())
    }

    /// Camera ids of every live session
    pub fn camera_ids(&self) -> Vec<i64> {
        self.lock()
            .sessions
            .iter()
            .filter_map(|session| session.camera_id())
            .collect()
    }

    /// Run `f` on the latest RGBA preview frame of a camera
    ///
    /// # Returns
    /// `Ok(None)` when no frame has been converted yet
    pub fn with_preview_frame<R>(
        &self,
        camera_id: i64,
        f: impl FnOnce(PreviewFrame<'_>) -> R,
    ) -> CaptureResult<Option<R>> {
        Ok(self.session(camera_id)?.with_preview_frame(f))
    }
}
