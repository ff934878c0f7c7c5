//! mediadeck - audio playback and camera capture console
//!
//! This is the main entry point for the mediadeck binary.

use anyhow::Context;
use clap::Parser;
use log::info;
use mediadeck::app::Console;
use mediadeck::audio::{AudioOutput, PlaybackSession};
use mediadeck::camera::{CaptureSession, VirtualCameraPlatform};
use mediadeck::config::{self, AppConfig, PlaybackConfig};
use mediadeck::cli;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    info!("Starting mediadeck");

    let config = config::load(args.config.as_deref())?;

    // Sessions are driven from one task; timers share the same thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(run(args, config))
}

async fn run(args: cli::Args, config: AppConfig) -> anyhow::Result<()> {
    let output = build_output(&config.playback);
    let playback = PlaybackSession::new(output, config.playback.clone())
        .context("Failed to create playback session")?;

    let platform = Arc::new(VirtualCameraPlatform::from_config(&config.capture));
    let capture = CaptureSession::new(platform, config.capture.clone());

    info!(
        "Playback session {}, capture session {}",
        playback.id(),
        capture.id()
    );

    let mut console = Console::new(playback, capture);
    console.init().await;

    if let Some(arg) = args.load.as_deref() {
        console.load(arg).await;
    }
    if let Some(device_id) = args.startup_camera() {
        console.start_camera(device_id).await;
    }

    console.run().await
}

#[cfg(feature = "pipewire")]
fn build_output(config: &PlaybackConfig) -> Arc<dyn AudioOutput> {
    Arc::new(mediadeck::audio::PipeWireOutput::new(config.fft_size))
}

#[cfg(not(feature = "pipewire"))]
fn build_output(config: &PlaybackConfig) -> Arc<dyn AudioOutput> {
    info!("Built without PipeWire, playback is silent");
    Arc::new(mediadeck::audio::NullSink::new(config.fft_size))
}
