// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Taking photos
//! - Recording videos
//!
//! Every command drives the same [`CameraManager`] request flow a host UI
//! would use.

use camera_capture::backends::camera::gst_platform::{GstPlatform, enumeration};
use camera_capture::backends::camera::{CameraDevice, CameraPlatform, FrameSize};
use camera_capture::{CameraManager, Config, HeadlessTextureRegistrar, ResolutionPreset, SessionSettings, storage};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn new_manager(config: &Config) -> CliResult<(Arc<GstPlatform>, CameraManager)> {
    let platform = Arc::new(GstPlatform::new()?);
    let manager = CameraManager::new(platform.clone(), Arc::new(HeadlessTextureRegistrar::new()))
        .with_timeouts(config.timeouts);
    Ok((platform, manager))
}

fn select_camera(platform: &GstPlatform, camera_index: usize) -> CliResult<CameraDevice> {
    let mut cameras = platform.enumerate_devices()?;
    if cameras.is_empty() {
        return Err("No cameras found".into());
    }
    if camera_index >= cameras.len() {
        return Err(format!(
            "Camera index {} out of range (0-{})",
            camera_index,
            cameras.len() - 1
        )
        .into());
    }
    let camera = cameras.swap_remove(camera_index);
    println!("Using camera: {}", camera.name);
    Ok(camera)
}

/// Create and initialize a camera, returning its id and preview size
async fn open_camera(
    manager: &CameraManager,
    camera: &CameraDevice,
    settings: SessionSettings,
) -> CliResult<(i64, FrameSize)> {
    let camera_id = manager.create_camera(&camera.device_id, settings).await?;
    match manager.initialize(camera_id).await {
        Ok(size) => Ok((camera_id, size)),
        Err(e) => {
            manager.dispose(camera_id);
            Err(e.into())
        }
    }
}

/// List all available cameras
pub fn list_cameras() -> CliResult<()> {
    enumeration::init()?;
    let devices = enumeration::monitor_devices(enumeration::VIDEO_SOURCE_CLASS).unwrap_or_default();

    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        let camera = enumeration::camera_device(device);
        println!("  [{}] {}", index, camera.name);
        println!("      Device: {}", camera.device_id);

        // Distinct frame sizes, largest first
        let mut sizes: Vec<FrameSize> = enumeration::device_media_types(device)
            .iter()
            .filter_map(|t| t.frame_size)
            .collect();
        sizes.sort_by_key(|s| std::cmp::Reverse((s.area(), s.height)));
        sizes.dedup();
        if !sizes.is_empty() {
            let sizes: Vec<String> = sizes.iter().take(5).map(ToString::to_string).collect();
            println!("      Sizes: {}", sizes.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Take a photo using the specified camera
pub fn take_photo(camera_index: usize, output: Option<PathBuf>, preset: Option<ResolutionPreset>) -> CliResult<()> {
    let config = Config::load();
    let (platform, manager) = new_manager(&config)?;
    let camera = select_camera(&platform, camera_index)?;
    let path = storage::resolve_output(output, &config.photo_dir(), storage::photo_path);

    let settings = SessionSettings {
        enable_audio: false,
        resolution_preset: preset.unwrap_or(config.resolution_preset),
    };

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let (camera_id, size) = open_camera(&manager, &camera, settings).await?;
        println!("Preview: {}", size);
        println!("Capturing...");

        let saved = manager.take_picture(camera_id, path).await;
        manager.dispose(camera_id);
        Ok::<_, Box<dyn std::error::Error>>(saved?)
    });
    manager.dispose_all();

    let saved = result?;
    println!("Photo saved: {}", saved.display());
    Ok(())
}

/// Record a video using the specified camera
pub fn record_video(
    camera_index: usize,
    duration: u64,
    output: Option<PathBuf>,
    enable_audio: bool,
    preset: Option<ResolutionPreset>,
) -> CliResult<()> {
    let config = Config::load();
    let (platform, manager) = new_manager(&config)?;
    let camera = select_camera(&platform, camera_index)?;
    let path = storage::resolve_output(output, &config.video_dir(), storage::video_path);

    let settings = SessionSettings {
        enable_audio: enable_audio || config.enable_audio,
        resolution_preset: preset.unwrap_or(config.resolution_preset),
    };

    println!("Output: {}", path.display());
    println!("Duration: {} seconds", duration);
    if settings.enable_audio {
        println!("Audio: enabled");
    }

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let target_duration = Duration::from_secs(duration);
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let (camera_id, size) = open_camera(&manager, &camera, settings).await?;
        println!("Preview: {}", size);

        if let Err(e) = manager
            .start_video_recording(camera_id, path, Some(target_duration))
            .await
        {
            manager.dispose(camera_id);
            return Err(e.into());
        }

        println!();
        println!("Recording... (press Ctrl+C to stop early)");

        // Wait for duration or Ctrl+C
        let start = Instant::now();
        while start.elapsed() < target_duration {
            if stop_flag.load(Ordering::SeqCst) {
                println!();
                println!("Stopping early...");
                break;
            }

            let elapsed = start.elapsed().as_secs();
            print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
            std::io::Write::flush(&mut std::io::stdout())?;

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        println!();

        let saved = manager.stop_video_recording(camera_id).await;
        manager.dispose(camera_id);
        Ok::<_, Box<dyn std::error::Error>>(saved?)
    });
    manager.dispose_all();

    let saved = result?;
    println!("Video saved: {}", saved.display());
    Ok(())
}
