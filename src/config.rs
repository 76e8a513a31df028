// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON at `<config dir>/camera-capture/config.json`. Every field
//! has a default, so partial files load fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backends::camera::types::ResolutionPreset;
use crate::constants::timing;

const APP_DIR: &str = "camera-capture";
const CONFIG_FILE: &str = "config.json";

/// How long callers wait for engine outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Create, preview and record-start requests
    pub command_ms: u64,
    /// Photo capture
    pub photo_ms: u64,
    /// Recording finalization
    pub record_stop_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_ms: timing::COMMAND_TIMEOUT.as_millis() as u64,
            photo_ms: timing::PHOTO_TIMEOUT.as_millis() as u64,
            record_stop_ms: timing::RECORD_STOP_TIMEOUT.as_millis() as u64,
        }
    }
}

impl TimeoutSettings {
    pub fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    pub fn photo(&self) -> Duration {
        Duration::from_millis(self.photo_ms)
    }

    pub fn record_stop(&self) -> Duration {
        Duration::from_millis(self.record_stop_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preview resolution ceiling for new cameras
    pub resolution_preset: ResolutionPreset,
    /// Record audio alongside video
    pub enable_audio: bool,
    pub timeouts: TimeoutSettings,
    /// Override for the photo directory
    pub photo_dir: Option<PathBuf>,
    /// Override for the video directory
    pub video_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolution_preset: ResolutionPreset::Auto,
            enable_audio: false,
            timeouts: TimeoutSettings::default(),
            photo_dir: None,
            video_dir: None,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory, using defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`
    ///
    /// A missing file yields defaults silently. A file that cannot be read or
    /// parsed yields defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Directory for photos: override, else `<Pictures>/camera`
    pub fn photo_dir(&self) -> PathBuf {
        self.photo_dir.clone().unwrap_or_else(|| {
            dirs::picture_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("camera")
        })
    }

    /// Directory for videos: override, else `<Videos>/camera`
    pub fn video_dir(&self) -> PathBuf {
        self.video_dir.clone().unwrap_or_else(|| {
            dirs::video_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("camera")
        })
    }
}
