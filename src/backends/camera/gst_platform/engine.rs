// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer capture engine
//!
//! ```text
//!                                   ┌► queue ► videoscale ► videoconvert ► BGRx WxH ► appsink "preview"
//! source ► caps ► [jpegdec] ► tee ──┤
//!                                   └► queue ► videoconvert ► RGBA ► appsink "capture"
//! ```
//!
//! The preview appsink feeds the session bridge. The capture appsink serves
//! pending photo requests and the active [`Recorder`]. Command outcomes are
//! reported as engine events from watcher and worker threads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use tracing::{debug, error, info, warn};

use super::GstMediaSource;
use super::enumeration::{caps_for_source, device_media_types};
use super::photo::{RgbaFrame, save_jpeg};
use super::recorder::{RecordSettings, Recorder};
use crate::backends::camera::callback::EngineCallback;
use crate::backends::camera::negotiation::resolve_base_media_types;
use crate::backends::camera::types::*;
use crate::backends::camera::{CaptureEngine, CaptureSink, MediaSample, MediaSource};
use crate::constants::{pipeline, timing};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn make(factory: &str) -> BackendResult<gstreamer::Element> {
    gstreamer::ElementFactory::make(factory)
        .build()
        .map_err(|e| BackendError::NotAvailable(format!("{}: {}", factory, e)))
}

fn capsfilter(caps: gstreamer::Caps) -> BackendResult<gstreamer::Element> {
    gstreamer::ElementFactory::make("capsfilter")
        .property("caps", caps)
        .build()
        .map_err(|e| BackendError::NotAvailable(format!("capsfilter: {}", e)))
}

fn appsink(name: &str, caps: gstreamer::Caps) -> BackendResult<AppSink> {
    let sink = AppSink::builder().name(name).caps(&caps).build();
    sink.set_property("sync", false);
    sink.set_property("max-buffers", pipeline::APPSINK_MAX_BUFFERS);
    sink.set_property("drop", true);
    sink.set_property("enable-last-sample", false);
    Ok(sink)
}

fn leaky_queue() -> BackendResult<gstreamer::Element> {
    let queue = make("queue")?;
    queue.set_property_from_str("leaky", "downstream");
    queue.set_property("max-size-buffers", 2u32);
    Ok(queue)
}

/// Sink configuration written through [`GstSink`] handles
#[derive(Default)]
struct SinkConfig {
    preview_type: Option<MediaType>,
    preview_callback: Option<Arc<EngineCallback>>,
    photo_type: Option<MediaType>,
    photo_path: Option<PathBuf>,
    record_video: Option<MediaType>,
    record_audio: Option<MediaType>,
    record_path: Option<PathBuf>,
}

impl SinkConfig {
    fn clear(&mut self, kind: SinkKind) {
        match kind {
            SinkKind::Preview => {
                self.preview_type = None;
                self.preview_callback = None;
            }
            SinkKind::Photo => {
                self.photo_type = None;
                self.photo_path = None;
            }
            SinkKind::Record => {
                self.record_video = None;
                self.record_audio = None;
                self.record_path = None;
            }
        }
    }
}

/// A requested photo, served by the next capture-branch frame
struct PhotoJob {
    path: PathBuf,
    callback: Arc<EngineCallback>,
}

/// State shared with the capture appsink callback
#[derive(Default)]
struct CaptureShared {
    photo: Mutex<Option<PhotoJob>>,
    recorder: Mutex<Option<Arc<Recorder>>>,
}

/// Preview sample wrapper handed to the bridge
struct GstSample<'a>(&'a gstreamer::BufferRef);

impl MediaSample for GstSample<'_> {
    fn with_contiguous_buffer(&self, f: &mut dyn FnMut(&[u8])) -> BackendResult<()> {
        let map = self
            .0
            .map_readable()
            .map_err(|e| BackendError::Other(format!("Failed to map buffer: {}", e)))?;
        f(map.as_slice());
        Ok(())
    }
}

/// Sink handle; configuration lands in the engine's [`SinkConfig`]
pub struct GstSink {
    kind: SinkKind,
    config: Arc<Mutex<SinkConfig>>,
}

impl CaptureSink for GstSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn remove_all_streams(&mut self) -> BackendResult<()> {
        lock(&self.config).clear(self.kind);
        Ok(())
    }

    fn add_stream(&mut self, source: SourceStream, media_type: &MediaType) -> BackendResult<u32> {
        let mut config = lock(&self.config);
        let unsupported = || {
            BackendError::FormatNotSupported(format!(
                "{} on {:?} stream of {} sink",
                media_type, source, self.kind
            ))
        };

        match (self.kind, source, &media_type.subtype) {
            (SinkKind::Preview, SourceStream::VideoPreview, Subtype::Rgb32) => {
                config.preview_type = Some(media_type.clone());
                Ok(0)
            }
            (SinkKind::Photo, SourceStream::Photo, Subtype::Jpeg) => {
                config.photo_type = Some(media_type.clone());
                Ok(0)
            }
            (SinkKind::Record, SourceStream::VideoRecord, Subtype::H264) => {
                config.record_video = Some(media_type.clone());
                Ok(0)
            }
            (SinkKind::Record, SourceStream::Audio, Subtype::Aac) => {
                config.record_audio = Some(media_type.clone());
                Ok(1)
            }
            _ => Err(unsupported()),
        }
    }

    fn set_sample_callback(&mut self, stream_index: u32, callback: Arc<EngineCallback>) -> BackendResult<()> {
        if self.kind != SinkKind::Preview || stream_index != 0 {
            return Err(BackendError::InvalidState(format!(
                "no sample stream {} on {} sink",
                stream_index, self.kind
            )));
        }
        lock(&self.config).preview_callback = Some(callback);
        Ok(())
    }

    fn set_output_path(&mut self, path: &Path) -> BackendResult<()> {
        let mut config = lock(&self.config);
        match self.kind {
            SinkKind::Photo => config.photo_path = Some(path.to_path_buf()),
            SinkKind::Record => config.record_path = Some(path.to_path_buf()),
            SinkKind::Preview => {
                return Err(BackendError::InvalidState("preview sink has no output file".into()));
            }
        }
        Ok(())
    }
}

/// Running preview pipeline and its bus watcher
struct PreviewPipeline {
    pipeline: gstreamer::Pipeline,
    preview_sink: AppSink,
    capture_sink: AppSink,
    stop: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl PreviewPipeline {
    fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.preview_sink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        self.capture_sink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop preview pipeline");
        }
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                error!("Preview bus watcher panicked");
            }
        }
    }
}

impl Drop for PreviewPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Capture engine over a GStreamer camera device
pub struct GstCaptureEngine {
    callback: Option<Arc<EngineCallback>>,
    video_device: Option<gstreamer::Device>,
    audio_device: Option<gstreamer::Device>,
    device_types: Vec<MediaType>,
    config: Arc<Mutex<SinkConfig>>,
    shared: Arc<CaptureShared>,
    preview: Option<PreviewPipeline>,
}

impl Default for GstCaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GstCaptureEngine {
    pub fn new() -> Self {
        Self {
            callback: None,
            video_device: None,
            audio_device: None,
            device_types: Vec::new(),
            config: Arc::new(Mutex::new(SinkConfig::default())),
            shared: Arc::new(CaptureShared::default()),
            preview: None,
        }
    }

    fn callback(&self) -> BackendResult<Arc<EngineCallback>> {
        self.callback
            .clone()
            .ok_or_else(|| BackendError::InvalidState("engine not initialized".into()))
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(callback) = &self.callback {
            callback.on_event(event);
        }
    }

    /// Largest decodable device format; the preview and capture branches both derive from it
    fn source_type(&self) -> Option<MediaType> {
        let decodable: Vec<MediaType> = self
            .device_types
            .iter()
            .filter(|t| !matches!(t.subtype, Subtype::H264))
            .cloned()
            .collect();
        resolve_base_media_types(&decodable, ResolutionPreset::Max)
            .ok()
            .map(|m| m.base_capture)
    }

    fn build_preview(&self) -> BackendResult<PreviewPipeline> {
        let device = self
            .video_device
            .as_ref()
            .ok_or_else(|| BackendError::InvalidState("engine not initialized".into()))?;
        let callback = self.callback()?;
        let (preview_type, preview_callback) = {
            let config = lock(&self.config);
            match (&config.preview_type, &config.preview_callback) {
                (Some(t), Some(cb)) => (t.clone(), Arc::clone(cb)),
                _ => return Err(BackendError::InvalidState("preview sink not configured".into())),
            }
        };
        let preview_size = preview_type
            .frame_size
            .ok_or_else(|| BackendError::FormatNotSupported("preview type without frame size".into()))?;
        let source_type = self.source_type();

        info!(
            preview = %preview_type,
            source = ?source_type.as_ref().map(|t| t.to_string()),
            "Building preview pipeline"
        );

        let pipeline = gstreamer::Pipeline::new();
        let source = device
            .create_element(Some("source"))
            .map_err(|e| BackendError::InitializationFailed(format!("camera source: {}", e)))?;

        let mut head = vec![source];
        if let Some(source_type) = &source_type {
            head.push(capsfilter(caps_for_source(source_type))?);
            if source_type.subtype == Subtype::Mjpeg {
                head.push(make("jpegdec")?);
            }
        }
        head.push(make("videoconvert")?);
        let tee = make("tee")?;
        head.push(tee.clone());

        let preview_caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "BGRx")
            .field("width", preview_size.width as i32)
            .field("height", preview_size.height as i32)
            .build();
        let preview_branch = [
            leaky_queue()?,
            make("videoscale")?,
            make("videoconvert")?,
            capsfilter(preview_caps.clone())?,
        ];
        let preview_sink = appsink("preview", preview_caps)?;

        let capture_caps = gstreamer::Caps::builder("video/x-raw").field("format", "RGBA").build();
        let capture_branch = [leaky_queue()?, make("videoconvert")?];
        let capture_sink = appsink("capture", capture_caps)?;

        let elements: Vec<&gstreamer::Element> = head
            .iter()
            .chain(preview_branch.iter())
            .chain(capture_branch.iter())
            .chain([
                preview_sink.upcast_ref::<gstreamer::Element>(),
                capture_sink.upcast_ref::<gstreamer::Element>(),
            ])
            .collect();
        pipeline
            .add_many(elements)
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let link = |what: &str, result: Result<(), gstreamer::glib::BoolError>| {
            result.map_err(|e| BackendError::InitializationFailed(format!("Failed to link {}: {}", what, e)))
        };
        link("source chain", gstreamer::Element::link_many(&head))?;
        link("preview branch", gstreamer::Element::link_many(&preview_branch))?;
        link("capture branch", gstreamer::Element::link_many(&capture_branch))?;
        link("tee to preview", tee.link(&preview_branch[0]))?;
        link("tee to capture", tee.link(&capture_branch[0]))?;
        link("preview sink", preview_branch[3].link(&preview_sink))?;
        link("capture sink", capture_branch[1].link(&capture_sink))?;

        preview_sink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
                    if let Err(e) = preview_callback.on_sample(&GstSample(buffer)) {
                        debug!(error = %e, "Preview sample dropped");
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        let shared = Arc::clone(&self.shared);
        capture_sink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    if let Some(job) = lock(&shared.photo).take() {
                        spawn_photo_job(job, &sample);
                    }
                    let recorder = lock(&shared.recorder).clone();
                    if let Some(recorder) = recorder {
                        if let Err(e) = recorder.push_sample(&sample) {
                            debug!(error = %e, "Failed to push frame to recorder");
                        }
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            let _ = pipeline.set_state(gstreamer::State::Null);
            BackendError::InitializationFailed(format!("Failed to start preview: {}", e))
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let watcher = spawn_bus_watcher(pipeline.clone(), callback, Arc::clone(&stop))?;

        Ok(PreviewPipeline {
            pipeline,
            preview_sink,
            capture_sink,
            stop,
            watcher: Some(watcher),
        })
    }

    /// Stop the recorder, finalizing on a worker thread
    fn finish_recording(&self, finalize: bool, flush: bool) -> BackendResult<()> {
        let recorder = lock(&self.shared.recorder)
            .take()
            .ok_or_else(|| BackendError::InvalidState("not recording".into()))?;
        let callback = self.callback()?;

        std::thread::Builder::new()
            .name("record-finalize".into())
            .spawn(move || {
                let event = match recorder.finish(finalize && !flush) {
                    Ok(_) => EngineEvent::succeeded(EngineEventKind::RecordStopped),
                    Err(e) => EngineEvent::failed(EngineEventKind::RecordStopped, e),
                };
                callback.on_event(event);
            })?;
        Ok(())
    }
}

fn spawn_photo_job(job: PhotoJob, sample: &gstreamer::Sample) {
    let frame = sample
        .caps()
        .ok_or_else(|| BackendError::Other("sample without caps".into()))
        .and_then(|caps| VideoInfo::from_caps(caps).map_err(|e| BackendError::Other(e.to_string())))
        .and_then(|info| {
            let buffer = sample
                .buffer()
                .ok_or_else(|| BackendError::Other("sample without buffer".into()))?;
            let map = buffer
                .map_readable()
                .map_err(|e| BackendError::Other(format!("Failed to map buffer: {}", e)))?;
            Ok(RgbaFrame {
                data: map.as_slice().to_vec(),
                width: info.width(),
                height: info.height(),
                stride: info.stride()[0] as usize,
            })
        });

    let spawned = std::thread::Builder::new()
        .name("photo-encode".into())
        .spawn(move || {
            let event = match frame.and_then(|frame| save_jpeg(&frame, &job.path)) {
                Ok(()) => EngineEvent::succeeded(EngineEventKind::PhotoTaken),
                Err(e) => {
                    error!(path = %job.path.display(), error = %e, "Photo capture failed");
                    EngineEvent::failed(EngineEventKind::PhotoTaken, e)
                }
            };
            job.callback.on_event(event);
        });
    if let Err(e) = spawned {
        error!(error = %e, "Failed to spawn photo encoder");
    }
}

/// Report the preview start outcome, then forward bus errors until stopped
fn spawn_bus_watcher(
    pipeline: gstreamer::Pipeline,
    callback: Arc<EngineCallback>,
    stop: Arc<AtomicBool>,
) -> BackendResult<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("preview-bus".into())
        .spawn(move || {
            let timeout = gstreamer::ClockTime::from_mseconds(timing::PIPELINE_START_TIMEOUT.as_millis() as u64);
            let (result, state, _) = pipeline.state(timeout);
            if result.is_ok() && state == gstreamer::State::Playing {
                callback.on_event(EngineEvent::succeeded(EngineEventKind::PreviewStarted));
            } else {
                warn!(?result, ?state, "Preview pipeline did not reach PLAYING");
                callback.on_event(EngineEvent::failed(
                    EngineEventKind::PreviewStarted,
                    BackendError::InitializationFailed(format!("pipeline stuck in {:?}", state)),
                ));
                return;
            }

            let Some(bus) = pipeline.bus() else {
                return;
            };
            let poll = gstreamer::ClockTime::from_mseconds(timing::BUS_POLL_INTERVAL.as_millis() as u64);
            while !stop.load(Ordering::Acquire) {
                let Some(msg) = bus.timed_pop_filtered(
                    poll,
                    &[gstreamer::MessageType::Error, gstreamer::MessageType::Warning],
                ) else {
                    continue;
                };
                match msg.view() {
                    gstreamer::MessageView::Error(err) => {
                        error!(
                            error = %err.error(),
                            debug = ?err.debug(),
                            source = ?err.src().map(|s| s.name()),
                            "Preview pipeline error"
                        );
                        callback.on_event(EngineEvent::failed(
                            EngineEventKind::Error,
                            BackendError::Other(err.error().to_string()),
                        ));
                    }
                    gstreamer::MessageView::Warning(w) => {
                        warn!(warning = %w.error(), debug = ?w.debug(), "Preview pipeline warning");
                    }
                    _ => {}
                }
            }
        })?;
    Ok(handle)
}

impl CaptureEngine for GstCaptureEngine {
    fn initialize(
        &mut self,
        callback: Arc<EngineCallback>,
        audio: Option<&dyn MediaSource>,
        video: &dyn MediaSource,
    ) -> BackendResult<()> {
        let video_device = video
            .as_any()
            .downcast_ref::<GstMediaSource>()
            .and_then(GstMediaSource::device)
            .ok_or_else(|| BackendError::InitializationFailed("video source is not a GStreamer device".into()))?;
        self.audio_device = audio
            .and_then(|source| source.as_any().downcast_ref::<GstMediaSource>())
            .and_then(GstMediaSource::device);

        self.device_types = device_media_types(&video_device);
        info!(
            device_id = video.device_id(),
            media_types = self.device_types.len(),
            audio = self.audio_device.is_some(),
            "GStreamer engine initialized"
        );

        self.video_device = Some(video_device);
        self.callback = Some(Arc::clone(&callback));
        callback.on_event(EngineEvent::succeeded(EngineEventKind::Initialized));
        Ok(())
    }

    fn available_device_media_types(&self, stream: SourceStream) -> BackendResult<Vec<MediaType>> {
        match stream {
            SourceStream::Audio => Err(BackendError::NotAvailable("no audio media types on video device".into())),
            _ => Ok(self.device_types.clone()),
        }
    }

    fn sink(&mut self, kind: SinkKind) -> BackendResult<Box<dyn CaptureSink>> {
        Ok(Box::new(GstSink {
            kind,
            config: Arc::clone(&self.config),
        }))
    }

    fn start_preview(&mut self) -> BackendResult<()> {
        if let Some(old) = self.preview.take() {
            debug!("Replacing running preview pipeline");
            old.stop();
        }
        self.preview = Some(self.build_preview()?);
        Ok(())
    }

    fn stop_preview(&mut self) -> BackendResult<()> {
        if lock(&self.shared.recorder).is_some() {
            warn!("Preview stopped while recording, finalizing recording");
            self.finish_recording(true, false)?;
        }
        lock(&self.shared.photo).take();
        if let Some(preview) = self.preview.take() {
            preview.stop();
        }
        self.emit(EngineEvent::succeeded(EngineEventKind::PreviewStopped));
        Ok(())
    }

    fn start_record(&mut self) -> BackendResult<()> {
        if self.preview.is_none() {
            return Err(BackendError::InvalidState("preview must be running to record".into()));
        }
        if lock(&self.shared.recorder).is_some() {
            return Err(BackendError::InvalidState("already recording".into()));
        }
        let settings = {
            let config = lock(&self.config);
            match (&config.record_video, &config.record_path) {
                (Some(video), Some(path)) => RecordSettings {
                    path: path.clone(),
                    video: video.clone(),
                    audio: config.record_audio.clone(),
                },
                _ => return Err(BackendError::InvalidState("record sink not configured".into())),
            }
        };

        let recorder = Recorder::start(&settings, self.audio_device.as_ref())?;
        info!(path = %recorder.path().display(), "Recording started");
        *lock(&self.shared.recorder) = Some(Arc::new(recorder));
        self.emit(EngineEvent::succeeded(EngineEventKind::RecordStarted));
        Ok(())
    }

    fn stop_record(&mut self, finalize: bool, flush: bool) -> BackendResult<()> {
        self.finish_recording(finalize, flush)
    }

    fn take_photo(&mut self) -> BackendResult<()> {
        if self.preview.is_none() {
            return Err(BackendError::InvalidState("preview must be running to take a photo".into()));
        }
        let path = {
            let config = lock(&self.config);
            match (&config.photo_type, &config.photo_path) {
                (Some(_), Some(path)) => path.clone(),
                _ => return Err(BackendError::InvalidState("photo sink not configured".into())),
            }
        };
        let callback = self.callback()?;

        let mut photo = lock(&self.shared.photo);
        if photo.is_some() {
            return Err(BackendError::InvalidState("photo already pending".into()));
        }
        debug!(path = %path.display(), "Photo requested");
        *photo = Some(PhotoJob { path, callback });
        Ok(())
    }

    fn shutdown(&mut self) {
        let recorder = lock(&self.shared.recorder).take();
        if let Some(recorder) = recorder {
            if let Err(e) = recorder.finish(true) {
                warn!(error = %e, "Recording not finalized on shutdown");
            }
        }
        lock(&self.shared.photo).take();
        if let Some(preview) = self.preview.take() {
            preview.stop();
        }
        *lock(&self.config) = SinkConfig::default();
        self.callback = None;
        self.video_device = None;
        self.audio_device = None;
        debug!("GStreamer engine shut down");
    }
}

impl Drop for GstCaptureEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
