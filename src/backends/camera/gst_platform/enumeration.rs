// SPDX-License-Identifier: GPL-3.0-only

//! Device discovery through the GStreamer device monitor

use gstreamer::prelude::*;
use tracing::{debug, warn};

use crate::backends::camera::types::*;

/// Device monitor class for cameras
pub const VIDEO_SOURCE_CLASS: &str = "Video/Source";
/// Device monitor class for microphones
pub const AUDIO_SOURCE_CLASS: &str = "Audio/Source";

/// Device properties that carry a stable identifier, most specific first
const ID_PROPERTIES: &[&str] = &["device.path", "api.v4l2.path", "object.path", "node.name"];

/// Initialize GStreamer
pub fn init() -> BackendResult<()> {
    gstreamer::init().map_err(|e| BackendError::NotAvailable(format!("GStreamer: {}", e)))
}

/// List devices of a monitor class
pub fn monitor_devices(class: &str) -> BackendResult<Vec<gstreamer::Device>> {
    let monitor = gstreamer::DeviceMonitor::new();
    if monitor.add_filter(Some(class), None).is_none() {
        warn!(class, "Device monitor rejected filter");
    }
    monitor
        .start()
        .map_err(|e| BackendError::NotAvailable(format!("Device monitor: {}", e)))?;
    let devices: Vec<gstreamer::Device> = monitor.devices().into_iter().collect();
    monitor.stop();

    debug!(class, count = devices.len(), "Enumerated devices");
    Ok(devices)
}

/// Stable identifier for a device, falling back to its display name
pub fn device_id(device: &gstreamer::Device) -> String {
    device
        .properties()
        .and_then(|props| {
            ID_PROPERTIES
                .iter()
                .find_map(|key| props.get::<String>(*key).ok())
        })
        .unwrap_or_else(|| device.display_name().to_string())
}

pub fn camera_device(device: &gstreamer::Device) -> CameraDevice {
    CameraDevice {
        name: device.display_name().to_string(),
        device_id: device_id(device),
    }
}

/// Every media type a device advertises
pub fn device_media_types(device: &gstreamer::Device) -> Vec<MediaType> {
    device
        .caps()
        .map(|caps| media_types_from_caps(&caps))
        .unwrap_or_default()
}

pub fn media_types_from_caps(caps: &gstreamer::CapsRef) -> Vec<MediaType> {
    caps.iter().filter_map(media_type_from_structure).collect()
}

/// Map one caps structure to a media type
///
/// Width and height are only read when fixed; ranges leave the frame size
/// unset. Non-video structures are skipped.
pub fn media_type_from_structure(s: &gstreamer::StructureRef) -> Option<MediaType> {
    let subtype = match s.name().as_str() {
        "video/x-raw" => match s.get::<&str>("format") {
            Ok("NV12") => Subtype::Nv12,
            Ok("YUY2") => Subtype::Yuy2,
            Ok("BGRx") => Subtype::Rgb32,
            Ok(other) => Subtype::Other(other.to_string()),
            Err(_) => Subtype::Other("video/x-raw".to_string()),
        },
        "image/jpeg" => Subtype::Mjpeg,
        "video/x-h264" => Subtype::H264,
        other if other.starts_with("video/") => Subtype::Other(other.to_string()),
        _ => return None,
    };

    let frame_size = match (s.get::<i32>("width"), s.get::<i32>("height")) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => Some(FrameSize::new(width as u32, height as u32)),
        _ => None,
    };

    let framerate = s
        .get::<gstreamer::Fraction>("framerate")
        .ok()
        .filter(|rate| rate.numer() > 0 && rate.denom() > 0)
        .map(|rate| Framerate::new(rate.numer() as u32, rate.denom() as u32));

    Some(MediaType {
        major_type: MajorType::Video,
        subtype,
        frame_size,
        framerate,
        all_samples_independent: false,
        audio: None,
    })
}

/// Caps a source should produce for `media_type`
pub fn caps_for_source(media_type: &MediaType) -> gstreamer::Caps {
    let mut builder = match &media_type.subtype {
        Subtype::Mjpeg => gstreamer::Caps::builder("image/jpeg"),
        Subtype::Nv12 => gstreamer::Caps::builder("video/x-raw").field("format", "NV12"),
        Subtype::Yuy2 => gstreamer::Caps::builder("video/x-raw").field("format", "YUY2"),
        Subtype::Rgb32 => gstreamer::Caps::builder("video/x-raw").field("format", "BGRx"),
        _ => gstreamer::Caps::builder("video/x-raw"),
    };
    if let Some(size) = media_type.frame_size {
        builder = builder
            .field("width", size.width as i32)
            .field("height", size.height as i32);
    }
    if let Some(rate) = media_type.framerate {
        builder = builder.field(
            "framerate",
            gstreamer::Fraction::new(rate.numerator as i32, rate.denominator as i32),
        );
    }
    builder.build()
}

/// First available element factory out of `names`
pub fn first_available_factory(names: &[&'static str]) -> Option<&'static str> {
    names
        .iter()
        .copied()
        .find(|name| gstreamer::ElementFactory::find(name).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_raw_caps_map_to_sized_type() {
        init().unwrap();
        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "NV12")
            .field("width", 1280i32)
            .field("height", 720i32)
            .field("framerate", gstreamer::Fraction::new(30, 1))
            .build();

        let types = media_types_from_caps(&caps);
        assert_eq!(
            types,
            vec![MediaType::video(Subtype::Nv12, 1280, 720).with_framerate(Framerate::new(30, 1))]
        );
    }

    #[test]
    fn ranged_size_is_unreadable() {
        init().unwrap();
        let caps = gstreamer::Caps::builder("image/jpeg")
            .field("width", gstreamer::IntRange::new(1i32, 1920))
            .field("height", 1080i32)
            .build();

        let types = media_types_from_caps(&caps);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].subtype, Subtype::Mjpeg);
        assert_eq!(types[0].frame_size, None);
    }

    #[test]
    fn audio_structures_are_skipped() {
        init().unwrap();
        let caps = gstreamer::Caps::builder("audio/x-raw").field("rate", 48000i32).build();
        assert!(media_types_from_caps(&caps).is_empty());
    }

    #[test]
    fn source_caps_round_size_and_format() {
        init().unwrap();
        let caps = caps_for_source(&MediaType::video(Subtype::Yuy2, 640, 480));
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name().as_str(), "video/x-raw");
        assert_eq!(s.get::<&str>("format").unwrap(), "YUY2");
        assert_eq!(s.get::<i32>("width").unwrap(), 640);
    }
}
