// SPDX-License-Identifier: GPL-3.0-only

//! Still photo encoding

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use tracing::{debug, info};

use crate::backends::camera::types::{BackendError, BackendResult};
use crate::constants::pipeline::JPEG_QUALITY;

/// A captured RGBA frame waiting to be encoded
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
}

impl RgbaFrame {
    /// Drop alpha and row padding
    pub fn to_rgb(&self) -> BackendResult<Vec<u8>> {
        let row_bytes = self.width as usize * 4;
        let height = self.height as usize;
        if self.stride < row_bytes || self.data.len() < self.stride * height.saturating_sub(1) + row_bytes {
            return Err(BackendError::FormatNotSupported(format!(
                "frame buffer of {} bytes too small for {}x{} stride {}",
                self.data.len(),
                self.width,
                self.height,
                self.stride
            )));
        }

        let mut rgb = Vec::with_capacity(self.width as usize * height * 3);
        for row in 0..height {
            let start = row * self.stride;
            for px in self.data[start..start + row_bytes].chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
        }
        Ok(rgb)
    }
}

/// Encode `frame` as JPEG at `path`, creating parent directories
pub fn save_jpeg(frame: &RgbaFrame, path: &Path) -> BackendResult<()> {
    if frame.width == 0 || frame.height == 0 {
        return Err(BackendError::FormatNotSupported("empty frame".into()));
    }
    let rgb = frame.to_rgb()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    debug!(path = %path.display(), width = frame.width, height = frame.height, "Encoding JPEG");
    let mut writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| BackendError::Other(format!("JPEG encoding failed: {}", e)))?;
    writer.flush()?;

    info!(path = %path.display(), "Photo saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_and_alpha_are_stripped() {
        let frame = RgbaFrame {
            // Two rows of one pixel, each row padded to 8 bytes
            data: vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0],
            width: 1,
            height: 2,
            stride: 8,
        };
        assert_eq!(frame.to_rgb().unwrap(), vec![1, 2, 3, 5, 6, 7]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let frame = RgbaFrame {
            data: vec![0; 7],
            width: 2,
            height: 1,
            stride: 8,
        };
        assert!(frame.to_rgb().is_err());
    }

    #[test]
    fn writes_decodable_jpeg() {
        let dir = std::env::temp_dir().join(format!("camera-capture-photo-{}", std::process::id()));
        let path = dir.join("nested").join("shot.jpeg");
        let frame = RgbaFrame {
            data: vec![200; 16 * 8 * 4],
            width: 16,
            height: 8,
            stride: 16 * 4,
        };

        save_jpeg(&frame, &path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
