//! Check capture support.

use qamrec_capture_engine::FormatNegotiator;
use qamrec_common::config::AppConfig;
use qamrec_media_model::FormatPreferences;
use qamrec_platform_gst::pipeline::element_available;
use qamrec_platform_gst::{detect_display_server, init_gstreamer, DisplayServer, GstCapabilities};

const ELEMENTS: &[(&str, &str)] = &[
    ("ximagesrc", "X11 screen capture"),
    ("pipewiresrc", "PipeWire screen capture"),
    ("v4l2src", "camera capture"),
    ("pulsesrc", "microphone and desktop audio"),
    ("decodebin", "conversion input"),
    ("appsink", "recorder output"),
];

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Qamrec System Check");
    println!("{}", "=".repeat(50));

    match detect_display_server() {
        DisplayServer::Wayland => {
            println!("[OK] Display server: Wayland (screen capture needs --pipewire-node)")
        }
        DisplayServer::X11 => println!("[OK] Display server: X11"),
        DisplayServer::Unknown => println!("[WARN] Display server: Unknown"),
    }

    if let Err(e) = init_gstreamer() {
        println!("[FAIL] {e}");
        return Ok(());
    }
    println!("[OK] GStreamer initialized");

    println!();
    for (element, purpose) in ELEMENTS {
        let status = if element_available(element) { "OK" } else { "MISSING" };
        println!("[{status}] {element:<12} {purpose}");
    }

    let capabilities = GstCapabilities::new();
    let preferences = FormatPreferences::recorder_defaults(config.capture.prefer_mp4);
    let candidates: Vec<_> = preferences
        .preferred
        .iter()
        .chain(preferences.baseline.iter())
        .collect();
    let supported = capabilities.supported(candidates.iter().copied());

    println!();
    println!("Recording formats:");
    for format in &candidates {
        let mark = if supported.contains(format) { "+" } else { "-" };
        println!("  {mark} {format}");
    }

    let negotiated = FormatNegotiator::new(preferences.clone()).negotiate(&capabilities);
    println!();
    println!("Recordings will use: {negotiated}");
    if supported.is_empty() {
        println!("No recording format is fully supported; install the GStreamer good/bad/ugly plugins.");
    }
    Ok(())
}
