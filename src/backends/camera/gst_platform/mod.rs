// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer capture platform
//!
//! Devices come from the GStreamer device monitor. Each session gets its own
//! [`GstCaptureEngine`], which runs the preview pipeline and serves photo and
//! record requests from it.

mod engine;
pub mod enumeration;
pub mod photo;
pub mod recorder;

pub use engine::{GstCaptureEngine, GstSink};

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use gstreamer::prelude::DeviceExt;
use tracing::{debug, info, warn};

use super::{CameraPlatform, CaptureEngine, MediaSource, MediaSourceKind};
use crate::backends::camera::types::*;
use crate::constants::pipeline;
use enumeration::{AUDIO_SOURCE_CLASS, VIDEO_SOURCE_CLASS};

/// Platform backed by the GStreamer device monitor
pub struct GstPlatform {
    /// Last enumerated cameras by device id
    devices: Mutex<HashMap<String, gstreamer::Device>>,
}

impl GstPlatform {
    /// Initialize GStreamer
    pub fn new() -> BackendResult<Self> {
        enumeration::init()?;
        Ok(Self {
            devices: Mutex::new(HashMap::new()),
        })
    }

    fn refresh(&self) -> BackendResult<Vec<gstreamer::Device>> {
        let devices = enumeration::monitor_devices(VIDEO_SOURCE_CLASS)?;
        let mut cache = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        cache.clear();
        for device in &devices {
            cache.insert(enumeration::device_id(device), device.clone());
        }
        Ok(devices)
    }

    fn find_device(&self, device_id: &str) -> BackendResult<gstreamer::Device> {
        let cached = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned();
        if let Some(device) = cached {
            return Ok(device);
        }

        debug!(device_id, "Device not cached, re-enumerating");
        self.refresh()?
            .into_iter()
            .find(|d| enumeration::device_id(d) == device_id)
            .ok_or_else(|| BackendError::DeviceNotFound(device_id.to_string()))
    }
}

impl CameraPlatform for GstPlatform {
    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDevice>> {
        let cameras: Vec<CameraDevice> = self.refresh()?.iter().map(enumeration::camera_device).collect();
        info!(count = cameras.len(), "Enumerated cameras");
        Ok(cameras)
    }

    fn create_video_source(&self, device_id: &str) -> BackendResult<Box<dyn MediaSource>> {
        let device = self.find_device(device_id)?;
        Ok(Box::new(GstMediaSource {
            kind: MediaSourceKind::Video,
            device_id: device_id.to_string(),
            device: Some(device),
        }))
    }

    fn create_default_audio_source(&self) -> BackendResult<Option<Box<dyn MediaSource>>> {
        let device = match enumeration::monitor_devices(AUDIO_SOURCE_CLASS) {
            Ok(devices) => devices.into_iter().next(),
            Err(e) => {
                warn!(error = %e, "Audio device enumeration failed");
                None
            }
        };

        Ok(device.map(|device| {
            debug!(name = %device.display_name(), "Using default audio device");
            Box::new(GstMediaSource {
                kind: MediaSourceKind::Audio,
                device_id: enumeration::device_id(&device),
                device: Some(device),
            }) as Box<dyn MediaSource>
        }))
    }

    fn create_engine(&self) -> BackendResult<Box<dyn CaptureEngine>> {
        Ok(Box::new(GstCaptureEngine::new()))
    }

    fn audio_output_types(&self, subtype: Subtype, low_latency: bool) -> BackendResult<Vec<MediaType>> {
        if subtype != Subtype::Aac {
            return Ok(Vec::new());
        }
        if enumeration::first_available_factory(pipeline::AAC_ENCODERS).is_none() {
            debug!("No AAC encoder installed");
            return Ok(Vec::new());
        }

        let bitrate = if low_latency {
            pipeline::AAC_LOW_LATENCY_BITRATE
        } else {
            pipeline::AAC_BITRATE
        };
        Ok([pipeline::AAC_SAMPLE_RATE, 44_100]
            .into_iter()
            .map(|sample_rate| {
                MediaType::audio(
                    Subtype::Aac,
                    AudioParameters {
                        sample_rate,
                        channels: pipeline::AAC_CHANNELS,
                        bitrate,
                    },
                )
            })
            .collect())
    }
}

/// An opened GStreamer device
pub struct GstMediaSource {
    kind: MediaSourceKind,
    device_id: String,
    device: Option<gstreamer::Device>,
}

impl GstMediaSource {
    /// Underlying device, `None` after shutdown
    pub fn device(&self) -> Option<gstreamer::Device> {
        self.device.clone()
    }
}

impl MediaSource for GstMediaSource {
    fn kind(&self) -> MediaSourceKind {
        self.kind
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn shutdown(&mut self) {
        if self.device.take().is_some() {
            debug!(device_id = %self.device_id, "Media source released");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
