// SPDX-License-Identifier: GPL-3.0-only

//! Output file naming for photos and videos

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

const PHOTO_PREFIX: &str = "PhotoCapture";
const VIDEO_PREFIX: &str = "VideoCapture";
const PHOTO_EXTENSION: &str = "jpeg";
const VIDEO_EXTENSION: &str = "mp4";

/// `<prefix>_YYYY_MMDD_HHMMSS_mmm.<extension>`
fn timestamped_name<Tz: TimeZone>(prefix: &str, extension: &str, time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}.{}", prefix, time.format("%Y_%m%d_%H%M%S_%3f"), extension)
}

/// Fresh photo path in `dir`
pub fn photo_path(dir: &Path) -> PathBuf {
    dir.join(timestamped_name(PHOTO_PREFIX, PHOTO_EXTENSION, &Local::now()))
}

/// Fresh video path in `dir`
pub fn video_path(dir: &Path) -> PathBuf {
    dir.join(timestamped_name(VIDEO_PREFIX, VIDEO_EXTENSION, &Local::now()))
}

/// Resolve a user-supplied output
///
/// A directory (existing, or written with a trailing separator) gets a
/// timestamped file inside it; anything else is used as the file path.
pub fn resolve_output(output: Option<PathBuf>, default_dir: &Path, fresh: fn(&Path) -> PathBuf) -> PathBuf {
    match output {
        Some(path) if path.is_dir() || path.as_os_str().to_string_lossy().ends_with(std::path::MAIN_SEPARATOR) => {
            fresh(&path)
        }
        Some(path) => path,
        None => fresh(default_dir),
    }
}
