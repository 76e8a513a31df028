// SPDX-License-Identifier: GPL-3.0-only

//! Pixel format conversion for preview samples
//!
//! The preview sink delivers 32-bit BGRX (byte order B, G, R, X). The display
//! layer consumes RGBA, so every delivered frame is swizzled into the
//! session's destination buffer with alpha forced opaque.

use bytemuck::{Pod, Zeroable};

use crate::constants::pixels::{DEST_BYTES_PER_PIXEL, SOURCE_BYTES_PER_PIXEL};

/// One BGRX source pixel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Bgrx {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub x: u8,
}

/// One RGBA destination pixel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl From<Bgrx> for Rgba {
    fn from(px: Bgrx) -> Self {
        Rgba {
            r: px.r,
            g: px.g,
            b: px.b,
            a: 255,
        }
    }
}

/// Byte length of an RGBA buffer with the given dimensions
pub fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * DEST_BYTES_PER_PIXEL
}

/// Convert BGRX into an existing RGBA buffer
///
/// Converts `min(width * height, src pixels, dst pixels)` pixels; anything
/// beyond that in `dst` is left untouched. Trailing bytes of an incomplete
/// pixel in either buffer are ignored.
///
/// # Returns
/// Number of pixels written
pub fn bgrx_to_rgba_into(src: &[u8], dst: &mut [u8], width: u32, height: u32) -> usize {
    let pixel_count = width as usize * height as usize;
    let src_pixels = src.len() / SOURCE_BYTES_PER_PIXEL;
    let dst_pixels = dst.len() / DEST_BYTES_PER_PIXEL;
    let count = pixel_count.min(src_pixels).min(dst_pixels);

    let src: &[Bgrx] = bytemuck::cast_slice(&src[..count * SOURCE_BYTES_PER_PIXEL]);
    let dst: &mut [Rgba] = bytemuck::cast_slice_mut(&mut dst[..count * DEST_BYTES_PER_PIXEL]);

    for (out, px) in dst.iter_mut().zip(src) {
        *out = Rgba::from(*px);
    }

    count
}

/// Convert BGRX to a newly allocated RGBA buffer
pub fn bgrx_to_rgba(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgba = vec![0u8; rgba_len(width, height)];
    bgrx_to_rgba_into(src, &mut rgba, width, height);
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzles_and_forces_alpha() {
        let src = [10, 20, 30, 0, 1, 2, 3, 77];
        let rgba = bgrx_to_rgba(&src, 2, 1);
        assert_eq!(rgba, vec![30, 20, 10, 255, 3, 2, 1, 255]);
    }

    #[test]
    fn ignores_padding_byte_value() {
        for x in [0u8, 1, 128, 254, 255] {
            let rgba = bgrx_to_rgba(&[5, 6, 7, x], 1, 1);
            assert_eq!(rgba, vec![7, 6, 5, 255]);
        }
    }

    #[test]
    fn short_source_converts_complete_pixels_only() {
        // One full pixel plus two stray bytes
        let src = [1, 2, 3, 4, 9, 9];
        let mut dst = vec![0u8; rgba_len(2, 1)];
        let written = bgrx_to_rgba_into(&src, &mut dst, 2, 1);
        assert_eq!(written, 1);
        assert_eq!(dst, vec![3, 2, 1, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn oversized_source_is_bounded_by_dimensions() {
        let src = vec![0xAA; 4 * 16];
        let mut dst = vec![0u8; rgba_len(2, 2)];
        assert_eq!(bgrx_to_rgba_into(&src, &mut dst, 2, 2), 4);
        assert!(dst.chunks_exact(4).all(|px| px == [0xAA, 0xAA, 0xAA, 255]));
    }

    #[test]
    fn zero_dimensions_write_nothing() {
        let mut dst = vec![7u8; 8];
        assert_eq!(bgrx_to_rgba_into(&[1, 2, 3, 4], &mut dst, 0, 0), 0);
        assert_eq!(dst, vec![7u8; 8]);
    }
}
