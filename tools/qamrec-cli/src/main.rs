//! Qamrec CLI: record the screen or camera and convert recordings.
//!
//! Usage:
//!   qamrec record [OPTIONS]          Record until Ctrl+C, `s`, or --duration
//!   qamrec convert <FILE> [OPTIONS]  Convert a recording to webm, mp4 or gif
//!   qamrec check                     Report capture support

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use qamrec_capture_engine::CaptureMode;
use qamrec_common::config::AppConfig;
use qamrec_media_model::Resolution;
use qamrec_render_engine::ExportTarget;

mod commands;

#[derive(Parser)]
#[command(
    name = "qamrec",
    about = "Screen, camera and picture-in-picture recording",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a recording
    Record {
        /// screen, camera, or screen-camera (picture-in-picture)
        #[arg(short, long, default_value = "screen")]
        mode: CaptureMode,

        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Record the microphone
        #[arg(long)]
        mic: bool,

        /// Record desktop audio
        #[arg(long)]
        system_audio: bool,

        /// PipeWire node granted by the screencast portal (Wayland)
        #[arg(long)]
        pipewire_node: Option<u32>,

        /// V4L2 camera device, e.g. /dev/video0
        #[arg(long)]
        camera_device: Option<String>,

        #[arg(long)]
        hide_cursor: bool,
    },

    /// Convert a recording
    Convert {
        /// Recording to convert (.webm or .mp4)
        input: PathBuf,

        /// webm, mp4, or gif
        #[arg(short, long, default_value = "gif")]
        format: ExportTarget,

        /// original, or the longest output edge in pixels
        #[arg(short, long, default_value = "original")]
        resolution: Resolution,

        /// Output file (defaults to a timestamped name in the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check capture support
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    qamrec_common::logging::init_logging(&config.logging);
    tracing::debug!(
        output_dir = %config.output_dir.display(),
        prefer_mp4 = config.capture.prefer_mp4,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Record {
            mode,
            output,
            duration,
            mic,
            system_audio,
            pipewire_node,
            camera_device,
            hide_cursor,
        } => {
            commands::record::run(
                &config,
                commands::record::RecordArgs {
                    mode,
                    output: output.unwrap_or_else(|| config.output_dir.clone()),
                    duration,
                    mic,
                    system_audio,
                    pipewire_node,
                    camera_device,
                    hide_cursor,
                },
            )
            .await
        }
        Commands::Convert {
            input,
            format,
            resolution,
            output,
        } => commands::convert::run(&config, input, format, resolution, output).await,
        Commands::Check => commands::check::run(&config),
    }
}
