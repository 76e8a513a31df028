// SPDX-License-Identifier: GPL-3.0-only

use camera_capture::ResolutionPreset;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-capture")]
#[command(about = "Capture photos and videos from a camera")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Take a photo
    Photo {
        /// Camera index to use (from 'camera-capture list')
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Output file or directory (default: ~/Pictures/camera/PhotoCapture_TIMESTAMP.jpeg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Preview resolution preset (low, medium, high, veryHigh, ultraHigh, max, auto)
        #[arg(short, long)]
        preset: Option<ResolutionPreset>,
    },

    /// Record a video
    Video {
        /// Camera index to use (from 'camera-capture list')
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output file or directory (default: ~/Videos/camera/VideoCapture_TIMESTAMP.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Enable audio recording
        #[arg(short, long)]
        audio: bool,

        /// Preview resolution preset (low, medium, high, veryHigh, ultraHigh, max, auto)
        #[arg(short, long)]
        preset: Option<ResolutionPreset>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_capture=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Photo {
            camera,
            output,
            preset,
        } => cli::take_photo(camera, output, preset),
        Commands::Video {
            camera,
            duration,
            output,
            audio,
            preset,
        } => cli::record_video(camera, duration, output, audio, preset),
    }
}
