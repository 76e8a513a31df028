// SPDX-License-Identifier: GPL-3.0-only

//! Base media type selection
//!
//! From the device's candidate list two types are chosen:
//!
//! - **preview**: largest area whose height fits under the preset ceiling
//! - **capture**: largest area overall, used for photo and record
//!
//! Candidates without a readable frame size are skipped. Ties on area are
//! broken by height, width, subtype preference and frame rate, so the result
//! does not depend on the order the device reports candidates in.

use std::cmp::Ordering;

use tracing::{debug, info};

use super::types::{FrameSize, MediaType, ResolutionPreset};
use crate::errors::CaptureError;

/// Negotiated base types, cached per session until reset
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTypeCache {
    pub base_preview: MediaType,
    pub base_capture: MediaType,
    pub preview_size: FrameSize,
    pub capture_size: FrameSize,
}

/// Ordering key used to compare two sized candidates
fn rank(media_type: &MediaType, size: FrameSize) -> (u64, u32, u32, u8, u64) {
    let fps_scaled = media_type
        .framerate
        .filter(|rate| rate.denominator != 0)
        .map(|rate| u64::from(rate.numerator) * 1000 / u64::from(rate.denominator))
        .unwrap_or(0);
    (
        size.area(),
        size.height,
        size.width,
        media_type.subtype.preference(),
        fps_scaled,
    )
}

fn compare(a: &(&MediaType, FrameSize), b: &(&MediaType, FrameSize)) -> Ordering {
    rank(a.0, a.1).cmp(&rank(b.0, b.1))
}

/// Pick the base preview and capture types for `preset`
///
/// # Arguments
/// * `candidates` - Media types offered by the device's preview stream
/// * `preset` - Preview height ceiling
///
/// # Returns
/// The cache, or `NegotiationFailure` if no sized candidate fits the ceiling
pub fn resolve_base_media_types(
    candidates: &[MediaType],
    preset: ResolutionPreset,
) -> Result<MediaTypeCache, CaptureError> {
    let max_height = preset.max_preview_height().unwrap_or(u32::MAX);

    let sized: Vec<(&MediaType, FrameSize)> = candidates
        .iter()
        .filter_map(|media_type| match media_type.frame_size {
            Some(size) if size.width > 0 && size.height > 0 => Some((media_type, size)),
            _ => {
                debug!(%media_type, "Skipping candidate without readable frame size");
                None
            }
        })
        .collect();

    let (base_capture, capture_size) = sized.iter().copied().max_by(compare).ok_or_else(|| {
        CaptureError::NegotiationFailure(format!(
            "none of {} candidate media types has a readable frame size",
            candidates.len()
        ))
    })?;

    let (base_preview, preview_size) = sized
        .iter()
        .copied()
        .filter(|(_, size)| size.height <= max_height)
        .max_by(compare)
        .ok_or_else(|| {
            CaptureError::NegotiationFailure(format!(
                "no media type at or below {} preview height {}",
                preset, max_height
            ))
        })?;

    info!(
        preset = %preset,
        preview = %base_preview,
        capture = %base_capture,
        "Negotiated base media types"
    );

    Ok(MediaTypeCache {
        base_preview: base_preview.clone(),
        base_capture: base_capture.clone(),
        preview_size,
        capture_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{Framerate, MajorType, Subtype};

    fn sized(subtype: Subtype, w: u32, h: u32) -> MediaType {
        MediaType::video(subtype, w, h)
    }

    fn unsized_type() -> MediaType {
        MediaType {
            major_type: MajorType::Video,
            subtype: Subtype::Nv12,
            frame_size: None,
            framerate: None,
            all_samples_independent: false,
            audio: None,
        }
    }

    fn webcam() -> Vec<MediaType> {
        vec![
            sized(Subtype::Nv12, 640, 480),
            sized(Subtype::Nv12, 1280, 720),
            sized(Subtype::Mjpeg, 1920, 1080),
            sized(Subtype::Nv12, 320, 240),
            unsized_type(),
        ]
    }

    #[test]
    fn high_caps_preview_at_720() {
        let cache = resolve_base_media_types(&webcam(), ResolutionPreset::High).unwrap();
        assert_eq!(cache.preview_size, FrameSize::new(1280, 720));
        assert_eq!(cache.capture_size, FrameSize::new(1920, 1080));
    }

    #[test]
    fn low_caps_preview_at_240() {
        let cache = resolve_base_media_types(&webcam(), ResolutionPreset::Low).unwrap();
        assert_eq!(cache.preview_size, FrameSize::new(320, 240));
        assert_eq!(cache.capture_size, FrameSize::new(1920, 1080));
    }

    #[test]
    fn unbounded_presets_use_largest() {
        for preset in [ResolutionPreset::Auto, ResolutionPreset::Max] {
            let cache = resolve_base_media_types(&webcam(), preset).unwrap();
            assert_eq!(cache.preview_size, cache.capture_size);
        }
    }

    #[test]
    fn ceiling_holds_for_every_preset() {
        for preset in ResolutionPreset::ALL {
            let cache = resolve_base_media_types(&webcam(), preset).unwrap();
            if let Some(max) = preset.max_preview_height() {
                assert!(cache.preview_size.height <= max);
            }
            assert!(cache.preview_size.area() <= cache.capture_size.area());
        }
    }

    #[test]
    fn result_is_permutation_independent() {
        let mut candidates = webcam();
        // Same area as 1280x720 NV12 but a different subtype
        candidates.push(sized(Subtype::Mjpeg, 1280, 720));
        candidates.push(sized(Subtype::Nv12, 1280, 720).with_framerate(Framerate::new(60, 1)));

        let expected = resolve_base_media_types(&candidates, ResolutionPreset::High).unwrap();
        for shift in 0..candidates.len() {
            let mut rotated = candidates.clone();
            rotated.rotate_left(shift);
            assert_eq!(
                resolve_base_media_types(&rotated, ResolutionPreset::High).unwrap(),
                expected
            );
            rotated.reverse();
            assert_eq!(
                resolve_base_media_types(&rotated, ResolutionPreset::High).unwrap(),
                expected
            );
        }
        assert_eq!(expected.base_preview.framerate, Some(Framerate::new(60, 1)));
    }

    #[test]
    fn nothing_under_ceiling_fails() {
        let candidates = vec![sized(Subtype::Nv12, 1920, 1080)];
        let err = resolve_base_media_types(&candidates, ResolutionPreset::Medium).unwrap_err();
        assert_eq!(err.code(), "negotiation_failure");
    }

    #[test]
    fn only_unsized_candidates_fail() {
        let err = resolve_base_media_types(&[unsized_type(), unsized_type()], ResolutionPreset::Auto).unwrap_err();
        assert_eq!(err.code(), "negotiation_failure");
    }

    #[test]
    fn empty_candidates_fail() {
        assert!(resolve_base_media_types(&[], ResolutionPreset::Auto).is_err());
    }
}
