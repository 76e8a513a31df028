// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_capture::config::TimeoutSettings;
use camera_capture::{Config, ResolutionPreset};
use std::path::PathBuf;
use std::time::Duration;

fn temp_config(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("camera-capture-config-{}-{}", std::process::id(), name))
        .join("config.json")
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.resolution_preset, ResolutionPreset::Auto);
    assert!(!config.enable_audio, "Audio should be opt-in");
    assert_eq!(config.timeouts.command(), Duration::from_secs(5));
    assert_eq!(config.timeouts.photo(), Duration::from_secs(10));
    assert_eq!(config.timeouts.record_stop(), Duration::from_secs(15));
}

#[test]
fn test_missing_file_yields_defaults() {
    let config = Config::load_from(&temp_config("missing"));
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let path = temp_config("partial");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{ "resolution_preset": "veryHigh", "timeouts": { "photo_ms": 2500 } }"#,
    )
    .unwrap();

    let config = Config::load_from(&path);
    assert_eq!(config.resolution_preset, ResolutionPreset::VeryHigh);
    assert_eq!(config.timeouts.photo(), Duration::from_millis(2500));
    assert_eq!(
        config.timeouts.command_ms,
        TimeoutSettings::default().command_ms
    );

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let path = temp_config("invalid");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "not json").unwrap();

    assert_eq!(Config::load_from(&path), Config::default());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_save_and_reload() {
    let path = temp_config("saved");
    let config = Config {
        resolution_preset: ResolutionPreset::Low,
        enable_audio: true,
        photo_dir: Some(PathBuf::from("/srv/photos")),
        ..Config::default()
    };

    config.save_to(&path).unwrap();
    let reloaded = Config::load_from(&path);
    assert_eq!(reloaded, config);
    assert_eq!(reloaded.photo_dir(), PathBuf::from("/srv/photos"));

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn test_default_dirs_end_in_camera() {
    let config = Config::default();
    assert!(config.photo_dir().ends_with("camera"));
    assert!(config.video_dir().ends_with("camera"));
}
