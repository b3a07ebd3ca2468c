//! Convert a saved recording.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use qamrec_common::config::AppConfig;
use qamrec_media_model::{
    format_file_size, generate_filename, Container, FormatDescriptor, RecordingArtifact,
    Resolution,
};
use qamrec_platform_gst::{init_gstreamer, GstDecoderFactory, GstEncoderFactory};
use qamrec_render_engine::{ExportTarget, ProgressCallback, TranscodeConfig, Transcoder};

pub async fn run(
    config: &AppConfig,
    input: PathBuf,
    target: ExportTarget,
    resolution: Resolution,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    init_gstreamer()?;

    let container = match input.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mp4") => Container::Mp4,
        Some(ext) if ext.eq_ignore_ascii_case("webm") => Container::Webm,
        _ => anyhow::bail!("Unknown recording type: {} (expected .webm or .mp4)", input.display()),
    };
    let payload = std::fs::read(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    // Duration is measured by the decoder.
    let artifact = RecordingArtifact::new(
        Bytes::from(payload),
        FormatDescriptor::generic(container),
        Duration::ZERO,
    );

    let output = output.unwrap_or_else(|| {
        config.output_dir.join(generate_filename(
            "converted",
            target.extension(),
            &chrono::Local::now(),
        ))
    });

    println!("Converting {}", input.display());
    println!("  Format: {}", target.extension());
    println!("  Resolution: {resolution}");
    println!("  Output: {}", output.display());

    let transcoder = Transcoder::new(
        Arc::new(GstDecoderFactory::new()),
        Arc::new(GstEncoderFactory::new()),
    )
    .with_config(TranscodeConfig::from(&config.transcode));

    let progress: ProgressCallback = Box::new(|p| {
        print!("\r  Progress: {:?} {}%   ", p.phase, p.percent);
        let _ = std::io::stdout().flush();
    });

    let bytes = transcoder
        .export(&artifact, target, resolution, Some(progress))
        .await;
    println!();
    let bytes = bytes?;
    tracing::info!(size_bytes = bytes.len(), output = %output.display(), "Conversion finished");

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Conversion complete: {} ({})",
        output.display(),
        format_file_size(bytes.len() as u64)
    );
    Ok(())
}
