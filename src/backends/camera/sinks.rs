// SPDX-License-Identifier: GPL-3.0-only

//! Preview, photo and record sink configuration
//!
//! Each sink is configured the first time it is needed and reused after that.
//! A reused photo or record sink only gets its output path replaced. A sink
//! handle is kept only once its configuration fully succeeded, so a failed
//! attempt is retried from scratch next time.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::callback::EngineCallback;
use super::negotiation::MediaTypeCache;
use super::types::{BackendError, MajorType, MediaType, SinkKind, SourceStream, Subtype};
use super::{CameraPlatform, CaptureEngine, CaptureSink};
use crate::errors::CaptureError;

/// Preview output: uncompressed RGB32, every sample independent
pub fn build_media_type_for_preview(base: &MediaType) -> MediaType {
    MediaType {
        major_type: MajorType::Video,
        subtype: Subtype::Rgb32,
        frame_size: base.frame_size,
        framerate: base.framerate,
        all_samples_independent: true,
        audio: None,
    }
}

/// Photo output: JPEG still image at capture resolution
pub fn build_media_type_for_photo(base: &MediaType) -> MediaType {
    MediaType {
        major_type: MajorType::Image,
        subtype: Subtype::Jpeg,
        frame_size: base.frame_size,
        framerate: None,
        all_samples_independent: false,
        audio: None,
    }
}

/// Record output: H.264 video at capture resolution
pub fn build_media_type_for_video_capture(base: &MediaType) -> MediaType {
    MediaType {
        major_type: MajorType::Video,
        subtype: Subtype::H264,
        frame_size: base.frame_size,
        framerate: base.framerate,
        all_samples_independent: false,
        audio: None,
    }
}

/// The engine's three sinks, configured lazily
#[derive(Default)]
pub struct CaptureSinks {
    preview: Option<Box<dyn CaptureSink>>,
    photo: Option<Box<dyn CaptureSink>>,
    record: Option<Box<dyn CaptureSink>>,
}

impl CaptureSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_configured(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Preview => self.preview.is_some(),
            SinkKind::Photo => self.photo.is_some(),
            SinkKind::Record => self.record.is_some(),
        }
    }

    /// Configure the preview sink and route its samples to `callback`
    pub fn init_preview(
        &mut self,
        engine: &mut dyn CaptureEngine,
        media_types: &MediaTypeCache,
        callback: &Arc<EngineCallback>,
    ) -> Result<(), CaptureError> {
        if self.preview.is_some() {
            return Ok(());
        }

        let err = |e: BackendError| CaptureError::sink(SinkKind::Preview, e);
        let mut sink = engine.sink(SinkKind::Preview).map_err(err)?;
        sink.remove_all_streams().map_err(err)?;

        let media_type = build_media_type_for_preview(&media_types.base_preview);
        let index = sink
            .add_stream(SourceStream::VideoPreview, &media_type)
            .map_err(err)?;
        sink.set_sample_callback(index, Arc::clone(callback)).map_err(err)?;

        info!(media_type = %media_type, "Preview sink configured");
        self.preview = Some(sink);
        Ok(())
    }

    /// Configure the photo sink, or retarget it if already configured
    pub fn init_photo(
        &mut self,
        engine: &mut dyn CaptureEngine,
        media_types: &MediaTypeCache,
        path: &Path,
    ) -> Result<(), CaptureError> {
        let err = |e: BackendError| CaptureError::sink(SinkKind::Photo, e);

        if let Some(sink) = self.photo.as_mut() {
            debug!(path = %path.display(), "Reusing photo sink");
            return sink.set_output_path(path).map_err(err);
        }

        let mut sink = engine.sink(SinkKind::Photo).map_err(err)?;
        sink.remove_all_streams().map_err(err)?;

        let media_type = build_media_type_for_photo(&media_types.base_capture);
        sink.add_stream(SourceStream::Photo, &media_type).map_err(err)?;
        sink.set_output_path(path).map_err(err)?;

        info!(media_type = %media_type, path = %path.display(), "Photo sink configured");
        self.photo = Some(sink);
        Ok(())
    }

    /// Configure the record sink, or retarget it if already configured
    ///
    /// With `audio_enabled`, the platform's first AAC output type is added
    /// as a second stream. No AAC type at all fails the configuration.
    pub fn init_record(
        &mut self,
        engine: &mut dyn CaptureEngine,
        platform: &dyn CameraPlatform,
        media_types: &MediaTypeCache,
        path: &Path,
        audio_enabled: bool,
    ) -> Result<(), CaptureError> {
        let err = |e: BackendError| CaptureError::sink(SinkKind::Record, e);

        if let Some(sink) = self.record.as_mut() {
            debug!(path = %path.display(), "Reusing record sink");
            return sink.set_output_path(path).map_err(err);
        }

        let mut sink = engine.sink(SinkKind::Record).map_err(err)?;
        sink.remove_all_streams().map_err(err)?;

        let video_type = build_media_type_for_video_capture(&media_types.base_capture);
        sink.add_stream(SourceStream::VideoRecord, &video_type)
            .map_err(err)?;

        if audio_enabled {
            let audio_type = platform
                .audio_output_types(Subtype::Aac, true)
                .map_err(err)?
                .into_iter()
                .next()
                .ok_or_else(|| err(BackendError::NotAvailable("no AAC output type".into())))?;
            sink.add_stream(SourceStream::Audio, &audio_type).map_err(err)?;
            debug!(media_type = %audio_type, "Record sink audio stream added");
        }

        sink.set_output_path(path).map_err(err)?;

        info!(
            media_type = %video_type,
            audio = audio_enabled,
            path = %path.display(),
            "Record sink configured"
        );
        self.record = Some(sink);
        Ok(())
    }

    /// Drop every sink handle
    pub fn release(&mut self) {
        self.preview = None;
        self.photo = None;
        self.record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::callback::SampleGate;
    use crate::backends::camera::types::{BackendResult, CameraDevice, FrameSize};
    use crate::backends::camera::MediaSource;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum SinkCall {
        Open(SinkKind),
        RemoveAll,
        Add(SourceStream, MediaType),
        Callback(u32),
        Output(PathBuf),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<SinkCall>>>,
        fail_add: bool,
    }

    struct FakeSink {
        kind: SinkKind,
        calls: Arc<Mutex<Vec<SinkCall>>>,
        fail_add: bool,
        streams: u32,
    }

    impl CaptureSink for FakeSink {
        fn kind(&self) -> SinkKind {
            self.kind
        }
        fn remove_all_streams(&mut self) -> BackendResult<()> {
            self.calls.lock().unwrap().push(SinkCall::RemoveAll);
            Ok(())
        }
        fn add_stream(&mut self, source: SourceStream, media_type: &MediaType) -> BackendResult<u32> {
            if self.fail_add {
                return Err(BackendError::FormatNotSupported("nope".into()));
            }
            self.calls.lock().unwrap().push(SinkCall::Add(source, media_type.clone()));
            self.streams += 1;
            Ok(self.streams - 1)
        }
        fn set_sample_callback(&mut self, index: u32, _callback: Arc<EngineCallback>) -> BackendResult<()> {
            self.calls.lock().unwrap().push(SinkCall::Callback(index));
            Ok(())
        }
        fn set_output_path(&mut self, path: &Path) -> BackendResult<()> {
            self.calls.lock().unwrap().push(SinkCall::Output(path.to_path_buf()));
            Ok(())
        }
    }

    impl CaptureEngine for Recorder {
        fn initialize(
            &mut self,
            _callback: Arc<EngineCallback>,
            _audio: Option<&dyn MediaSource>,
            _video: &dyn MediaSource,
        ) -> BackendResult<()> {
            Ok(())
        }
        fn available_device_media_types(&self, _stream: SourceStream) -> BackendResult<Vec<MediaType>> {
            Ok(Vec::new())
        }
        fn sink(&mut self, kind: SinkKind) -> BackendResult<Box<dyn CaptureSink>> {
            self.calls.lock().unwrap().push(SinkCall::Open(kind));
            Ok(Box::new(FakeSink {
                kind,
                calls: self.calls.clone(),
                fail_add: self.fail_add,
                streams: 0,
            }))
        }
        fn start_preview(&mut self) -> BackendResult<()> {
            Ok(())
        }
        fn stop_preview(&mut self) -> BackendResult<()> {
            Ok(())
        }
        fn start_record(&mut self) -> BackendResult<()> {
            Ok(())
        }
        fn stop_record(&mut self, _finalize: bool, _flush: bool) -> BackendResult<()> {
            Ok(())
        }
        fn take_photo(&mut self) -> BackendResult<()> {
            Ok(())
        }
        fn shutdown(&mut self) {}
    }

    struct NoAudioPlatform;

    impl CameraPlatform for NoAudioPlatform {
        fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>> {
            Ok(Vec::new())
        }
        fn create_video_source(&self, device_id: &str) -> BackendResult<Box<dyn MediaSource>> {
            Err(BackendError::DeviceNotFound(device_id.into()))
        }
        fn create_default_audio_source(&self) -> BackendResult<Option<Box<dyn MediaSource>>> {
            Ok(None)
        }
        fn create_engine(&self) -> BackendResult<Box<dyn CaptureEngine>> {
            Ok(Box::<Recorder>::default())
        }
        fn audio_output_types(&self, _subtype: Subtype, _low_latency: bool) -> BackendResult<Vec<MediaType>> {
            Ok(Vec::new())
        }
    }

    fn cache() -> MediaTypeCache {
        MediaTypeCache {
            base_preview: MediaType::video(Subtype::Nv12, 1280, 720),
            base_capture: MediaType::video(Subtype::Mjpeg, 1920, 1080),
            preview_size: FrameSize::new(1280, 720),
            capture_size: FrameSize::new(1920, 1080),
        }
    }

    fn callback() -> Arc<EngineCallback> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(EngineCallback::new(0, tx, Arc::new(SampleGate::default())))
    }

    #[test]
    fn media_type_builders() {
        let base = MediaType::video(Subtype::Nv12, 640, 480);

        let preview = build_media_type_for_preview(&base);
        assert_eq!(preview.subtype, Subtype::Rgb32);
        assert!(preview.all_samples_independent);
        assert_eq!(preview.frame_size, base.frame_size);

        let photo = build_media_type_for_photo(&base);
        assert_eq!(photo.major_type, MajorType::Image);
        assert_eq!(photo.subtype, Subtype::Jpeg);

        let record = build_media_type_for_video_capture(&base);
        assert_eq!(record.major_type, MajorType::Video);
        assert_eq!(record.subtype, Subtype::H264);
    }

    #[test]
    fn preview_is_configured_once() {
        let mut engine = Recorder::default();
        let mut sinks = CaptureSinks::new();
        let cb = callback();

        sinks.init_preview(&mut engine, &cache(), &cb).unwrap();
        sinks.init_preview(&mut engine, &cache(), &cb).unwrap();

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| **c == SinkCall::Open(SinkKind::Preview)).count(), 1);
        assert!(calls.contains(&SinkCall::Callback(0)));
    }

    #[test]
    fn reused_photo_sink_only_changes_path() {
        let mut engine = Recorder::default();
        let mut sinks = CaptureSinks::new();

        sinks.init_photo(&mut engine, &cache(), Path::new("/tmp/a.jpeg")).unwrap();
        engine.calls.lock().unwrap().clear();
        sinks.init_photo(&mut engine, &cache(), Path::new("/tmp/b.jpeg")).unwrap();

        assert_eq!(
            *engine.calls.lock().unwrap(),
            vec![SinkCall::Output(PathBuf::from("/tmp/b.jpeg"))]
        );
    }

    #[test]
    fn photo_uses_capture_resolution() {
        let mut engine = Recorder::default();
        let mut sinks = CaptureSinks::new();
        sinks.init_photo(&mut engine, &cache(), Path::new("/tmp/a.jpeg")).unwrap();

        let calls = engine.calls.lock().unwrap();
        let added = calls.iter().find_map(|c| match c {
            SinkCall::Add(SourceStream::Photo, media_type) => Some(media_type.clone()),
            _ => None,
        });
        assert_eq!(added.unwrap().frame_size, Some(FrameSize::new(1920, 1080)));
    }

    #[test]
    fn record_without_audio_adds_video_then_path() {
        let mut engine = Recorder::default();
        let mut sinks = CaptureSinks::new();
        sinks
            .init_record(&mut engine, &NoAudioPlatform, &cache(), Path::new("/tmp/v.mp4"), false)
            .unwrap();

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls[0], SinkCall::Open(SinkKind::Record));
        assert_eq!(calls[1], SinkCall::RemoveAll);
        assert!(matches!(calls[2], SinkCall::Add(SourceStream::VideoRecord, _)));
        assert_eq!(calls[3], SinkCall::Output(PathBuf::from("/tmp/v.mp4")));
    }

    #[test]
    fn record_with_audio_requires_aac_type() {
        let mut engine = Recorder::default();
        let mut sinks = CaptureSinks::new();
        let err = sinks
            .init_record(&mut engine, &NoAudioPlatform, &cache(), Path::new("/tmp/v.mp4"), true)
            .unwrap_err();

        assert!(matches!(
            err,
            CaptureError::SinkConfigurationFailure {
                sink: SinkKind::Record,
                ..
            }
        ));
        assert!(!sinks.is_configured(SinkKind::Record));
    }

    #[test]
    fn failed_configuration_is_not_kept() {
        let mut engine = Recorder {
            fail_add: true,
            ..Default::default()
        };
        let mut sinks = CaptureSinks::new();
        let err = sinks.init_photo(&mut engine, &cache(), Path::new("/tmp/a.jpeg")).unwrap_err();

        assert_eq!(err.code(), "sink_configuration_failure");
        assert!(!sinks.is_configured(SinkKind::Photo));
    }
}
