// SPDX-License-Identifier: GPL-3.0-only

//! Recording pipeline
//!
//! ```text
//! appsrc ─► queue ─► videoconvert ─► H.264 encoder ─► h264parse ─┐
//!                                                                ├─► mp4mux ─► filesink
//! audio source ─► queue ─► audioconvert ─► audioresample ─► AAC ─┘
//! ```
//!
//! Frames are pushed from the preview pipeline's capture branch. Their
//! timestamps are cleared so appsrc stamps them with this pipeline's clock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use tracing::{debug, error, info, warn};

use super::enumeration::first_available_factory;
use crate::backends::camera::types::*;
use crate::constants::{pipeline, timing};

fn make(factory: &str) -> BackendResult<gstreamer::Element> {
    gstreamer::ElementFactory::make(factory)
        .build()
        .map_err(|e| BackendError::NotAvailable(format!("{}: {}", factory, e)))
}

fn link_err(what: &str) -> impl Fn(gstreamer::glib::BoolError) -> BackendError + '_ {
    move |e| BackendError::InitializationFailed(format!("Failed to link {}: {}", what, e))
}

/// What to record and where
#[derive(Debug, Clone)]
pub struct RecordSettings {
    pub path: PathBuf,
    pub video: MediaType,
    /// AAC output type, `None` for video only
    pub audio: Option<MediaType>,
}

/// A running recording
pub struct Recorder {
    pipeline: gstreamer::Pipeline,
    appsrc: AppSrc,
    audio_source: Option<gstreamer::Element>,
    caps_set: AtomicBool,
    framerate: gstreamer::Fraction,
    path: PathBuf,
}

impl Recorder {
    /// Build the pipeline and set it to PLAYING
    ///
    /// # Arguments
    /// * `settings` - Output file and stream types
    /// * `audio_device` - Microphone to record from, `autoaudiosrc` when `None`
    pub fn start(settings: &RecordSettings, audio_device: Option<&gstreamer::Device>) -> BackendResult<Self> {
        info!(path = %settings.path.display(), video = %settings.video, audio = settings.audio.is_some(), "Starting recorder");

        if settings.video.subtype != Subtype::H264 {
            return Err(BackendError::FormatNotSupported(format!(
                "record video subtype {}",
                settings.video.subtype
            )));
        }
        if let Some(parent) = settings.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let pipeline = gstreamer::Pipeline::new();

        let appsrc = AppSrc::builder()
            .name("frames")
            .is_live(true)
            .do_timestamp(true)
            .format(gstreamer::Format::Time)
            .build();
        let queue = make("queue")?;
        let convert = make("videoconvert")?;
        let encoder_name = first_available_factory(pipeline::H264_ENCODERS)
            .ok_or_else(|| BackendError::NotAvailable("no H.264 encoder".into()))?;
        let encoder = make(encoder_name)?;
        if encoder_name == "x264enc" {
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property_from_str("speed-preset", "veryfast");
        }
        let parser = make("h264parse")?;
        let muxer = make("mp4mux")?;
        let location = settings
            .path
            .to_str()
            .ok_or_else(|| BackendError::IoError(format!("non UTF-8 path {}", settings.path.display())))?;
        let filesink = gstreamer::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| BackendError::NotAvailable(format!("filesink: {}", e)))?;

        pipeline
            .add_many([appsrc.upcast_ref::<gstreamer::Element>(), &queue, &convert, &encoder, &parser, &muxer, &filesink])
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        gstreamer::Element::link_many([appsrc.upcast_ref::<gstreamer::Element>(), &queue, &convert, &encoder, &parser, &muxer])
            .map_err(link_err("video branch"))?;
        muxer.link(&filesink).map_err(link_err("muxer to filesink"))?;
        debug!(encoder = encoder_name, "Video branch linked");

        let audio_source = match &settings.audio {
            Some(audio) => Some(Self::add_audio_branch(&pipeline, &muxer, audio, audio_device)?),
            None => None,
        };

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            let _ = pipeline.set_state(gstreamer::State::Null);
            BackendError::InitializationFailed(format!("Failed to start recording: {}", e))
        })?;

        let framerate = settings
            .video
            .framerate
            .filter(|rate| rate.numerator > 0 && rate.denominator > 0)
            .map(|rate| gstreamer::Fraction::new(rate.numerator as i32, rate.denominator as i32))
            .unwrap_or_else(|| gstreamer::Fraction::new(pipeline::DEFAULT_RECORD_FPS as i32, 1));

        Ok(Self {
            pipeline,
            appsrc,
            audio_source,
            caps_set: AtomicBool::new(false),
            framerate,
            path: settings.path.clone(),
        })
    }

    fn add_audio_branch(
        pipeline: &gstreamer::Pipeline,
        muxer: &gstreamer::Element,
        audio: &MediaType,
        device: Option<&gstreamer::Device>,
    ) -> BackendResult<gstreamer::Element> {
        let source = match device {
            Some(device) => device
                .create_element(Some("microphone"))
                .map_err(|e| BackendError::InitializationFailed(format!("audio source: {}", e)))?,
            None => make("autoaudiosrc")?,
        };
        let queue = make("queue")?;
        let convert = make("audioconvert")?;
        let resample = make("audioresample")?;

        let mut caps = gstreamer::Caps::builder("audio/x-raw");
        if let Some(params) = audio.audio {
            caps = caps
                .field("rate", params.sample_rate as i32)
                .field("channels", params.channels as i32);
        }
        let capsfilter = gstreamer::ElementFactory::make("capsfilter")
            .property("caps", caps.build())
            .build()
            .map_err(|e| BackendError::NotAvailable(format!("capsfilter: {}", e)))?;

        let encoder_name = first_available_factory(pipeline::AAC_ENCODERS)
            .ok_or_else(|| BackendError::NotAvailable("no AAC encoder".into()))?;
        let encoder = make(encoder_name)?;
        if let Some(params) = audio.audio {
            if encoder.has_property("bitrate") {
                encoder.set_property_from_str("bitrate", &params.bitrate.to_string());
            }
        }

        pipeline
            .add_many([&source, &queue, &convert, &resample, &capsfilter, &encoder])
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        gstreamer::Element::link_many([&source, &queue, &convert, &resample, &capsfilter, &encoder])
            .map_err(link_err("audio branch"))?;
        encoder.link(muxer).map_err(link_err("audio encoder to muxer"))?;

        debug!(encoder = encoder_name, "Audio branch linked");
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feed one RGBA frame from the capture branch
    pub fn push_sample(&self, sample: &gstreamer::Sample) -> BackendResult<()> {
        if !self.caps_set.swap(true, Ordering::AcqRel) {
            if let Some(caps) = sample.caps() {
                let mut caps = caps.to_owned();
                // Live sources may report 0/1; the muxer needs a real rate
                if let Some(s) = caps.make_mut().structure_mut(0) {
                    let rate = s.get::<gstreamer::Fraction>("framerate").ok();
                    if rate.is_none_or(|rate| rate.numer() == 0) {
                        s.set("framerate", self.framerate);
                    }
                }
                debug!(caps = %caps, "Recorder input caps");
                self.appsrc.set_caps(Some(&caps));
            }
        }

        let mut buffer = sample
            .buffer_owned()
            .ok_or_else(|| BackendError::Other("sample without buffer".into()))?;
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(gstreamer::ClockTime::NONE);
            buffer.set_dts(gstreamer::ClockTime::NONE);
        }
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| BackendError::Other(format!("push failed: {:?}", e)))
    }

    /// Stop the recording
    ///
    /// With `finalize`, EOS is sent and awaited so the muxer writes a playable
    /// file. Blocks for up to the EOS timeout; call off the caller's thread.
    pub fn finish(&self, finalize: bool) -> BackendResult<PathBuf> {
        let mut outcome = Ok(());

        if finalize {
            if let Err(e) = self.appsrc.end_of_stream() {
                warn!(error = ?e, "Failed to end video stream");
            }
            if let Some(source) = &self.audio_source {
                if !source.send_event(gstreamer::event::Eos::new()) {
                    warn!("Failed to send EOS to audio source");
                }
            }

            outcome = self.wait_for_eos();
        }

        let _ = self.pipeline.set_state(gstreamer::State::Null);
        outcome.map(|_| {
            info!(path = %self.path.display(), "Recording saved");
            self.path.clone()
        })
    }

    fn wait_for_eos(&self) -> BackendResult<()> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| BackendError::Other("recording pipeline has no bus".into()))?;
        let timeout = gstreamer::ClockTime::from_mseconds(timing::EOS_TIMEOUT.as_millis() as u64);

        match bus.timed_pop_filtered(timeout, &[gstreamer::MessageType::Eos, gstreamer::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gstreamer::MessageView::Eos(..) => Ok(()),
                gstreamer::MessageView::Error(err) => {
                    error!(error = %err.error(), debug = ?err.debug(), "Recording pipeline error");
                    Err(BackendError::Other(err.error().to_string()))
                }
                _ => Ok(()),
            },
            None => Err(BackendError::Other(format!(
                "no EOS within {:?}, file may be incomplete",
                timing::EOS_TIMEOUT
            ))),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}
