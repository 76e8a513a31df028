// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Preview height ceilings per resolution preset
pub mod presets {
    pub const LOW_MAX_HEIGHT: u32 = 240;
    pub const MEDIUM_MAX_HEIGHT: u32 = 480;
    pub const HIGH_MAX_HEIGHT: u32 = 720;
    pub const VERY_HIGH_MAX_HEIGHT: u32 = 1080;
    pub const ULTRA_HIGH_MAX_HEIGHT: u32 = 2160;
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Default wait for create / preview / record-start outcomes
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default wait for a photo to be encoded and written
    pub const PHOTO_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default wait for a recording to be finalized
    pub const RECORD_STOP_TIMEOUT: Duration = Duration::from_secs(15);

    /// How long a pipeline may take to reach PLAYING
    pub const PIPELINE_START_TIMEOUT: Duration = Duration::from_secs(5);

    /// Bus poll interval for pipeline watcher threads
    pub const BUS_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// How long to wait for EOS while finalizing a recording
    pub const EOS_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Pixel layout constants
pub mod pixels {
    /// Bytes per pixel of the BGRX preview sample
    pub const SOURCE_BYTES_PER_PIXEL: usize = 4;

    /// Bytes per pixel of the RGBA display buffer
    pub const DEST_BYTES_PER_PIXEL: usize = 4;
}

/// Capture pipeline tuning
pub mod pipeline {
    /// Samples allowed to wait for the session dispatcher before new ones are dropped
    pub const MAX_QUEUED_SAMPLES: usize = 2;

    /// Appsink queue depth
    pub const APPSINK_MAX_BUFFERS: u32 = 2;

    /// JPEG quality for still photos
    pub const JPEG_QUALITY: u8 = 92;

    /// Frame rate assumed for recording when the device does not report one
    pub const DEFAULT_RECORD_FPS: u32 = 30;

    /// H.264 encoders in order of preference
    pub const H264_ENCODERS: &[&str] = &["x264enc", "openh264enc", "vah264enc", "vaapih264enc"];

    /// AAC encoders in order of preference
    pub const AAC_ENCODERS: &[&str] = &["fdkaacenc", "avenc_aac", "voaacenc", "faac"];

    /// Default AAC output parameters
    pub const AAC_SAMPLE_RATE: u32 = 48_000;
    pub const AAC_CHANNELS: u32 = 2;
    pub const AAC_BITRATE: u32 = 128_000;
    /// Bitrate used when low latency output is requested
    pub const AAC_LOW_LATENCY_BITRATE: u32 = 96_000;
}
