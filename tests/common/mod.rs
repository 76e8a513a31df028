// SPDX-License-Identifier: GPL-3.0-only

//! Scriptable capture platform for session tests

#![allow(dead_code)]

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camera_capture::backends::camera::{
    AudioParameters, BackendError, BackendResult, CameraDevice, CameraPlatform, CaptureEngine, CaptureSink,
    EngineCallback, EngineEvent, EngineEventKind, MediaSample, MediaSource, MediaSourceKind, MediaType, SinkKind,
    SourceStream, Subtype,
};
use camera_capture::config::TimeoutSettings;
use camera_capture::{CameraManager, HeadlessTextureRegistrar};

/// Engine command as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Initialize { audio: bool },
    StartPreview,
    StopPreview,
    StartRecord,
    StopRecord { finalize: bool, flush: bool },
    TakePhoto,
    Shutdown,
}

/// How the mock engine answers commands
#[derive(Debug, Clone)]
pub struct Script {
    /// Emit the completion event for every issued command
    pub auto_respond: bool,
    /// Status of the `Initialized` event
    pub initialize_status: BackendResult<()>,
    /// Synchronous failure of `initialize`
    pub reject_initialize: Option<BackendError>,
    /// Synchronous failure of `start_preview`
    pub reject_preview: Option<BackendError>,
    /// Status of the `PhotoTaken` event
    pub photo_status: BackendResult<()>,
    /// Commands that never get an event
    pub silent: Vec<Command>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            auto_respond: true,
            initialize_status: Ok(()),
            reject_initialize: None,
            reject_preview: None,
            photo_status: Ok(()),
            silent: Vec::new(),
        }
    }
}

/// Everything the mock engines record, shared with the test
#[derive(Default)]
pub struct MockLog {
    pub commands: Vec<Command>,
    pub callback: Option<Arc<EngineCallback>>,
    pub streams: Vec<(SinkKind, SourceStream, MediaType)>,
    pub output_paths: Vec<(SinkKind, PathBuf)>,
    pub sources_released: usize,
}

pub struct MockPlatform {
    pub script: Mutex<Script>,
    pub log: Arc<Mutex<MockLog>>,
    pub devices: Vec<CameraDevice>,
    pub media_types: Vec<MediaType>,
    pub has_microphone: bool,
    pub has_aac: bool,
    pub engines_created: AtomicUsize,
}

pub fn webcam_media_types() -> Vec<MediaType> {
    vec![
        MediaType::video(Subtype::Nv12, 640, 480),
        MediaType::video(Subtype::Nv12, 1280, 720),
        MediaType::video(Subtype::Mjpeg, 1920, 1080),
        MediaType::video(Subtype::Mjpeg, 3840, 2160),
    ]
}

impl MockPlatform {
    pub fn new(media_types: Vec<MediaType>) -> Self {
        Self {
            script: Mutex::new(Script::default()),
            log: Arc::new(Mutex::new(MockLog::default())),
            devices: vec![
                CameraDevice {
                    name: "Front Camera".into(),
                    device_id: "cam0".into(),
                },
                CameraDevice {
                    name: "Back Camera".into(),
                    device_id: "cam1".into(),
                },
            ],
            media_types,
            has_microphone: true,
            has_aac: true,
            engines_created: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }
}

impl CameraPlatform for MockPlatform {
    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        Ok(self.devices.clone())
    }

    fn create_video_source(&self, device_id: &str) -> BackendResult<Box<dyn MediaSource>> {
        if !self.devices.iter().any(|d| d.device_id == device_id) {
            return Err(BackendError::DeviceNotFound(device_id.to_string()));
        }
        Ok(Box::new(MockSource {
            kind: MediaSourceKind::Video,
            device_id: device_id.to_string(),
            log: Arc::clone(&self.log),
        }))
    }

    fn create_default_audio_source(&self) -> BackendResult<Option<Box<dyn MediaSource>>> {
        if !self.has_microphone {
            return Ok(None);
        }
        Ok(Some(Box::new(MockSource {
            kind: MediaSourceKind::Audio,
            device_id: "mic0".into(),
            log: Arc::clone(&self.log),
        })))
    }

    fn create_engine(&self) -> BackendResult<Box<dyn CaptureEngine>> {
        self.engines_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            script: self.script.lock().unwrap().clone(),
            log: Arc::clone(&self.log),
            media_types: self.media_types.clone(),
            callback: None,
        }))
    }

    fn audio_output_types(&self, subtype: Subtype, _low_latency: bool) -> BackendResult<Vec<MediaType>> {
        if !self.has_aac || subtype != Subtype::Aac {
            return Ok(Vec::new());
        }
        Ok(vec![MediaType::audio(
            Subtype::Aac,
            AudioParameters {
                sample_rate: 48_000,
                channels: 2,
                bitrate: 96_000,
            },
        )])
    }
}

pub struct MockSource {
    kind: MediaSourceKind,
    device_id: String,
    log: Arc<Mutex<MockLog>>,
}

impl MediaSource for MockSource {
    fn kind(&self) -> MediaSourceKind {
        self.kind
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn shutdown(&mut self) {
        self.log.lock().unwrap().sources_released += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockEngine {
    script: Script,
    log: Arc<Mutex<MockLog>>,
    media_types: Vec<MediaType>,
    callback: Option<Arc<EngineCallback>>,
}

impl MockEngine {
    fn record(&self, command: Command) -> bool {
        let respond = self.script.auto_respond && !self.script.silent.contains(&command);
        self.log.lock().unwrap().commands.push(command);
        respond
    }

    fn emit(&self, kind: EngineEventKind, status: BackendResult<()>) {
        if let Some(callback) = &self.callback {
            callback.on_event(EngineEvent { kind, status });
        }
    }
}

impl CaptureEngine for MockEngine {
    fn initialize(
        &mut self,
        callback: Arc<EngineCallback>,
        audio: Option<&dyn MediaSource>,
        _video: &dyn MediaSource,
    ) -> BackendResult<()> {
        let respond = self.record(Command::Initialize { audio: audio.is_some() });
        if let Some(e) = self.script.reject_initialize.clone() {
            return Err(e);
        }
        self.log.lock().unwrap().callback = Some(Arc::clone(&callback));
        self.callback = Some(callback);
        if respond {
            self.emit(EngineEventKind::Initialized, self.script.initialize_status.clone());
        }
        Ok(())
    }

    fn available_device_media_types(&self, _stream: SourceStream) -> BackendResult<Vec<MediaType>> {
        Ok(self.media_types.clone())
    }

    fn sink(&mut self, kind: SinkKind) -> BackendResult<Box<dyn CaptureSink>> {
        Ok(Box::new(MockSink {
            kind,
            log: Arc::clone(&self.log),
            streams: 0,
        }))
    }

    fn start_preview(&mut self) -> BackendResult<()> {
        let respond = self.record(Command::StartPreview);
        if let Some(e) = self.script.reject_preview.clone() {
            return Err(e);
        }
        if respond {
            self.emit(EngineEventKind::PreviewStarted, Ok(()));
        }
        Ok(())
    }

    fn stop_preview(&mut self) -> BackendResult<()> {
        if self.record(Command::StopPreview) {
            self.emit(EngineEventKind::PreviewStopped, Ok(()));
        }
        Ok(())
    }

    fn start_record(&mut self) -> BackendResult<()> {
        if self.record(Command::StartRecord) {
            self.emit(EngineEventKind::RecordStarted, Ok(()));
        }
        Ok(())
    }

    fn stop_record(&mut self, finalize: bool, flush: bool) -> BackendResult<()> {
        if self.record(Command::StopRecord { finalize, flush }) {
            self.emit(EngineEventKind::RecordStopped, Ok(()));
        }
        Ok(())
    }

    fn take_photo(&mut self) -> BackendResult<()> {
        if self.record(Command::TakePhoto) {
            self.emit(EngineEventKind::PhotoTaken, self.script.photo_status.clone());
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.record(Command::Shutdown);
        self.callback = None;
    }
}

pub struct MockSink {
    kind: SinkKind,
    log: Arc<Mutex<MockLog>>,
    streams: u32,
}

impl CaptureSink for MockSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn remove_all_streams(&mut self) -> BackendResult<()> {
        self.streams = 0;
        Ok(())
    }

    fn add_stream(&mut self, source: SourceStream, media_type: &MediaType) -> BackendResult<u32> {
        self.log
            .lock()
            .unwrap()
            .streams
            .push((self.kind, source, media_type.clone()));
        self.streams += 1;
        Ok(self.streams - 1)
    }

    fn set_sample_callback(&mut self, _stream_index: u32, _callback: Arc<EngineCallback>) -> BackendResult<()> {
        Ok(())
    }

    fn set_output_path(&mut self, path: &Path) -> BackendResult<()> {
        self.log
            .lock()
            .unwrap()
            .output_paths
            .push((self.kind, path.to_path_buf()));
        Ok(())
    }
}

/// A preview sample backed by a byte slice
pub struct MockSample<'a>(pub &'a [u8]);

impl MediaSample for MockSample<'_> {
    fn with_contiguous_buffer(&self, f: &mut dyn FnMut(&[u8])) -> BackendResult<()> {
        f(self.0);
        Ok(())
    }
}

/// Manager over a mock platform with short timeouts
pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub textures: Arc<HeadlessTextureRegistrar>,
    pub manager: CameraManager,
}

pub const TEST_TIMEOUT: Duration = Duration::from_millis(300);

impl Harness {
    pub fn new() -> Self {
        Self::with_platform(MockPlatform::new(webcam_media_types()))
    }

    pub fn with_platform(platform: MockPlatform) -> Self {
        let platform = Arc::new(platform);
        let textures = Arc::new(HeadlessTextureRegistrar::new());
        let millis = TEST_TIMEOUT.as_millis() as u64;
        let manager = CameraManager::new(platform.clone(), textures.clone()).with_timeouts(TimeoutSettings {
            command_ms: millis,
            photo_ms: millis,
            record_stop_ms: millis,
        });
        Self {
            platform,
            textures,
            manager,
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.platform.log.lock().unwrap().commands.clone()
    }

    pub fn count(&self, command: &Command) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Callback handed to the most recently initialized engine
    pub fn callback(&self) -> Arc<EngineCallback> {
        self.platform
            .log
            .lock()
            .unwrap()
            .callback
            .clone()
            .expect("engine was never initialized")
    }

    pub fn emit(&self, kind: EngineEventKind, status: BackendResult<()>) {
        self.callback().on_event(EngineEvent { kind, status });
    }

    pub fn push_frame(&self, bytes: &[u8]) {
        self.callback().on_sample(&MockSample(bytes)).unwrap();
    }

    /// Poll until `texture_id` has seen `count` frames
    pub async fn wait_for_frames(&self, texture_id: i64, count: u64) -> bool {
        for _ in 0..200 {
            if self.textures.frames_available(texture_id).unwrap_or(0) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}
