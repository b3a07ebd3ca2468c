//! Record the screen, the camera, or both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use qamrec_capture_engine::{
    acquire, CaptureMode, CaptureRequest, CaptureSession, LogNotifier, SessionConfig,
    SessionControl, SessionDriver,
};
use qamrec_common::config::AppConfig;
use qamrec_media_model::{format_file_size, PipLayout};
use qamrec_platform_gst::{
    init_gstreamer, AcquisitionConfig, GstAcquisition, GstCapabilities, GstRecorderFactory,
    GstSurfaceFactory,
};
use qamrec_render_engine::{Compositor, RenderConfig};
use tokio::io::AsyncBufReadExt;

pub struct RecordArgs {
    pub mode: CaptureMode,
    pub output: PathBuf,
    pub duration: Option<f64>,
    pub mic: bool,
    pub system_audio: bool,
    pub pipewire_node: Option<u32>,
    pub camera_device: Option<String>,
    pub hide_cursor: bool,
}

pub async fn run(config: &AppConfig, args: RecordArgs) -> anyhow::Result<()> {
    init_gstreamer()?;

    println!("Starting recording");
    println!("  Mode: {:?}", args.mode);
    println!("  Output: {}", args.output.display());
    println!("  Mic: {}", args.mic);
    println!("  System audio: {}", args.system_audio);
    println!();

    let acquisition = GstAcquisition::new(AcquisitionConfig {
        pipewire_node: args.pipewire_node,
        camera_device: args.camera_device,
        hide_cursor: args.hide_cursor,
    });
    let acquired = acquire(
        &acquisition,
        CaptureRequest {
            mode: args.mode,
            include_system_audio: args.system_audio,
            include_microphone: args.mic,
        },
    )
    .await?;

    let mut compositor = Compositor::new(
        Arc::new(GstSurfaceFactory::new()),
        RenderConfig::from(&config.capture),
    );
    let source = match &acquired.overlay {
        Some(camera) => {
            let merged = compositor.merge(
                &acquired.primary,
                camera,
                PipLayout::from(config.capture.pip),
                config.capture.compositor_frame_rate,
            );
            match merged {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!(error = %e, "Compositing failed; releasing devices");
                    acquired.release();
                    return Err(e.into());
                }
            }
        }
        None => acquired.primary.clone(),
    };

    let capabilities = GstCapabilities::new();
    let session = CaptureSession::new(
        SessionConfig::from(&config.capture),
        Arc::new(GstRecorderFactory::new()),
        &capabilities,
    )
    .with_notifier(Arc::new(LogNotifier));
    println!("  Format: {}", session.format());

    let (mut driver, control) = SessionDriver::new(session)?;
    if let Some(track) = &acquired.end_track {
        driver = driver.stop_when_ended(track);
    }

    println!("Recording. Type p + Enter to pause, r to resume, s (or Ctrl+C) to stop.");
    let controls = tokio::spawn(forward_controls(control, args.duration));
    let result = driver.run(source).await;
    controls.abort();

    compositor.stop_merging();
    acquired.release();

    if let Err(e) = &result {
        tracing::error!(error = %e, "Recording failed");
    }
    let Some(artifact) = result? else {
        println!("Recording produced no data.");
        return Ok(());
    };

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let path = args
        .output
        .join(artifact.suggested_filename(&chrono::Local::now()));
    std::fs::write(&path, &artifact.payload)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!();
    println!("Recording saved to: {}", path.display());
    println!(
        "  {:.1}s, {}",
        artifact.duration.as_secs_f64(),
        format_file_size(artifact.size_bytes())
    );
    Ok(())
}

/// Map Ctrl+C, an optional deadline and stdin commands onto the session.
async fn forward_controls(control: SessionControl, duration: Option<f64>) {
    let deadline = async {
        match duration.filter(|d| d.is_finite() && *d > 0.0) {
            Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "p" => {
                        control.pause();
                        println!("Paused.");
                    }
                    "r" => {
                        control.resume();
                        println!("Resumed.");
                    }
                    "s" => break,
                    _ => {}
                },
                _ => stdin_open = false,
            },
        }
    }
    control.stop();
}
