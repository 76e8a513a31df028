// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera capture backends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::presets;

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, widened so that 4K+ sizes never overflow
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame rate as a rational number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub numerator: u32,
    pub denominator: u32,
}

impl Framerate {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second, rounded down
    pub fn fps(&self) -> u32 {
        if self.denominator == 0 {
            0
        } else {
            self.numerator / self.denominator
        }
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

/// Major type of a media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MajorType {
    Video,
    Image,
    Audio,
}

/// Encoding subtype of a media stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subtype {
    /// 32-bit BGRX, the preview sink's delivery format
    Rgb32,
    Nv12,
    Yuy2,
    Mjpeg,
    H264,
    /// JPEG still image container
    Jpeg,
    Aac,
    /// Anything the platform reports that is not listed above
    Other(String),
}

impl Subtype {
    /// Preference when two candidates have identical dimensions.
    ///
    /// Higher wins. Raw formats are preferred over compressed ones since
    /// they avoid a decode step on every frame.
    pub fn preference(&self) -> u8 {
        match self {
            Subtype::Nv12 => 6,
            Subtype::Yuy2 => 5,
            Subtype::Rgb32 => 4,
            Subtype::Mjpeg => 3,
            Subtype::H264 => 2,
            Subtype::Jpeg | Subtype::Aac => 1,
            Subtype::Other(_) => 0,
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subtype::Rgb32 => write!(f, "RGB32"),
            Subtype::Nv12 => write!(f, "NV12"),
            Subtype::Yuy2 => write!(f, "YUY2"),
            Subtype::Mjpeg => write!(f, "MJPG"),
            Subtype::H264 => write!(f, "H264"),
            Subtype::Jpeg => write!(f, "JPEG"),
            Subtype::Aac => write!(f, "AAC"),
            Subtype::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Audio stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioParameters {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
}

/// Description of a media stream format
///
/// Candidates reported by the device may lack a fixed frame size
/// (`frame_size == None`); those are never selected for preview or capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaType {
    pub major_type: MajorType,
    pub subtype: Subtype,
    pub frame_size: Option<FrameSize>,
    pub framerate: Option<Framerate>,
    /// Every sample is a key frame (uncompressed preview delivery)
    pub all_samples_independent: bool,
    pub audio: Option<AudioParameters>,
}

impl MediaType {
    /// Video media type with a fixed frame size
    pub fn video(subtype: Subtype, width: u32, height: u32) -> Self {
        Self {
            major_type: MajorType::Video,
            subtype,
            frame_size: Some(FrameSize::new(width, height)),
            framerate: None,
            all_samples_independent: false,
            audio: None,
        }
    }

    /// Audio media type
    pub fn audio(subtype: Subtype, parameters: AudioParameters) -> Self {
        Self {
            major_type: MajorType::Audio,
            subtype,
            frame_size: None,
            framerate: None,
            all_samples_independent: false,
            audio: Some(parameters),
        }
    }

    pub fn with_framerate(mut self, framerate: Framerate) -> Self {
        self.framerate = Some(framerate);
        self
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.major_type, self.subtype)?;
        if let Some(size) = self.frame_size {
            write!(f, " {}", size)?;
        }
        if let Some(rate) = self.framerate {
            write!(f, "@{}", rate)?;
        }
        Ok(())
    }
}

/// Logical source stream the engine exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceStream {
    VideoPreview,
    VideoRecord,
    Photo,
    Audio,
}

/// The three independently configurable engine outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkKind {
    Preview,
    Photo,
    Record,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Preview => write!(f, "preview"),
            SinkKind::Photo => write!(f, "photo"),
            SinkKind::Record => write!(f, "record"),
        }
    }
}

/// Preview resolution ceiling requested by the caller
///
/// Only the preview stream is capped; photo and record always use the
/// largest size the device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionPreset {
    #[default]
    Auto,
    Low,
    Medium,
    High,
    VeryHigh,
    UltraHigh,
    Max,
}

impl ResolutionPreset {
    pub const ALL: [ResolutionPreset; 7] = [
        ResolutionPreset::Auto,
        ResolutionPreset::Low,
        ResolutionPreset::Medium,
        ResolutionPreset::High,
        ResolutionPreset::VeryHigh,
        ResolutionPreset::UltraHigh,
        ResolutionPreset::Max,
    ];

    /// Maximum preview height for this preset, `None` when unbounded
    pub fn max_preview_height(&self) -> Option<u32> {
        match self {
            ResolutionPreset::Low => Some(presets::LOW_MAX_HEIGHT),
            ResolutionPreset::Medium => Some(presets::MEDIUM_MAX_HEIGHT),
            ResolutionPreset::High => Some(presets::HIGH_MAX_HEIGHT),
            ResolutionPreset::VeryHigh => Some(presets::VERY_HIGH_MAX_HEIGHT),
            ResolutionPreset::UltraHigh => Some(presets::ULTRA_HIGH_MAX_HEIGHT),
            ResolutionPreset::Auto | ResolutionPreset::Max => None,
        }
    }

    /// Boundary string for this preset
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPreset::Auto => "auto",
            ResolutionPreset::Low => "low",
            ResolutionPreset::Medium => "medium",
            ResolutionPreset::High => "high",
            ResolutionPreset::VeryHigh => "veryHigh",
            ResolutionPreset::UltraHigh => "ultraHigh",
            ResolutionPreset::Max => "max",
        }
    }
}

impl FromStr for ResolutionPreset {
    type Err = std::convert::Infallible;

    /// Unknown strings map to `Auto`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low" => ResolutionPreset::Low,
            "medium" => ResolutionPreset::Medium,
            "high" => ResolutionPreset::High,
            "veryHigh" => ResolutionPreset::VeryHigh,
            "ultraHigh" => ResolutionPreset::UltraHigh,
            "max" => ResolutionPreset::Max,
            _ => ResolutionPreset::Auto,
        })
    }
}

impl fmt::Display for ResolutionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Camera device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Human-readable name
    pub name: String,
    /// Stable identifier used to open the device
    pub device_id: String,
}

impl fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.device_id)
    }
}

/// Kind of an asynchronous engine notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    Initialized,
    Error,
    PreviewStarted,
    PreviewStopped,
    RecordStarted,
    RecordStopped,
    PhotoTaken,
    /// Any notification the session does not act on
    Unhandled(String),
}

/// Asynchronous engine notification carrying the command outcome
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    pub status: BackendResult<()>,
}

impl EngineEvent {
    pub fn succeeded(kind: EngineEventKind) -> Self {
        Self {
            kind,
            status: Ok(()),
        }
    }

    pub fn failed(kind: EngineEventKind, error: BackendError) -> Self {
        Self {
            kind,
            status: Err(error),
        }
    }
}

/// Result type for native backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by the native capture platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Failed to initialize the engine or a source
    InitializationFailed(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Media type not supported by the sink or encoder
    FormatNotSupported(String),
    /// Command issued while the engine cannot accept it
    InvalidState(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::InvalidState(msg) => write!(f, "Invalid engine state: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}
