//! Screen, camera and microphone acquisition on Linux desktops.
//!
//! Acquired tracks carry GStreamer launch fragments; nothing is opened until
//! a recorder or surface builds a pipeline from them.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use qamrec_capture_engine::{CameraRequest, MediaAcquisition};
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{MediaSource, MediaTrack, TrackKind, TrackOrigin, TrackSettings};

use crate::pipeline::element_available;

const SCREEN_FRAME_RATE: u32 = 30;
const CAMERA_FRAME_RATE: u32 = 30;

/// Display server type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    Wayland,
    X11,
    Unknown,
}

/// Detect the current display server.
pub fn detect_display_server() -> DisplayServer {
    display_server_from(
        std::env::var_os("WAYLAND_DISPLAY").is_some(),
        std::env::var_os("DISPLAY").is_some(),
    )
}

fn display_server_from(wayland_display: bool, x_display: bool) -> DisplayServer {
    if wayland_display {
        DisplayServer::Wayland
    } else if x_display {
        DisplayServer::X11
    } else {
        DisplayServer::Unknown
    }
}

/// Acquisition settings.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionConfig {
    /// PipeWire node granted by the screencast portal. Required on Wayland.
    pub pipewire_node: Option<u32>,
    /// Explicit V4L2 device; detected when unset.
    pub camera_device: Option<String>,
    pub hide_cursor: bool,
}

pub struct GstAcquisition {
    config: AcquisitionConfig,
    next_id: AtomicU64,
}

impl GstAcquisition {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
        }
    }

    fn track(&self, kind: TrackKind, label: &str, settings: TrackSettings, launch: String) -> MediaTrack {
        let id = format!("{label}-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        MediaTrack::new(id, kind, label, settings, TrackOrigin::Launch(launch))
    }

    fn require(element: &str) -> QamrecResult<()> {
        if element_available(element) {
            Ok(())
        } else {
            Err(QamrecError::unsupported(format!(
                "GStreamer element '{element}' is not installed"
            )))
        }
    }

    fn microphone_track(&self) -> QamrecResult<MediaTrack> {
        Self::require("pulsesrc")?;
        Ok(self.track(
            TrackKind::Audio,
            "microphone",
            TrackSettings::default(),
            microphone_fragment(),
        ))
    }
}

#[async_trait]
impl MediaAcquisition for GstAcquisition {
    async fn screen(&self, with_system_audio: bool) -> QamrecResult<MediaSource> {
        let server = detect_display_server();
        let launch = match (server, self.config.pipewire_node) {
            (_, Some(node)) => {
                Self::require("pipewiresrc")?;
                pipewire_screen_fragment(node)
            }
            (DisplayServer::X11, None) => {
                Self::require("ximagesrc")?;
                x11_screen_fragment(self.config.hide_cursor)
            }
            (DisplayServer::Wayland, None) => {
                return Err(QamrecError::permission_denied(
                    "Wayland screen capture needs a PipeWire node from the screencast portal",
                ))
            }
            (DisplayServer::Unknown, None) => {
                return Err(QamrecError::device_not_found("no display server detected"))
            }
        };
        tracing::info!(?server, pipewire_node = ?self.config.pipewire_node, "Acquired screen");

        let settings = TrackSettings {
            frame_rate: Some(SCREEN_FRAME_RATE),
            ..TrackSettings::default()
        };
        let mut tracks = vec![self.track(TrackKind::Video, "screen", settings, launch)];
        if with_system_audio {
            Self::require("pulsesrc")?;
            tracks.push(self.track(
                TrackKind::Audio,
                "system-audio",
                TrackSettings::default(),
                system_audio_fragment(),
            ));
        }
        Ok(MediaSource::new(tracks))
    }

    async fn camera(&self, request: CameraRequest) -> QamrecResult<MediaSource> {
        Self::require("v4l2src")?;
        let device = match &self.config.camera_device {
            Some(device) if Path::new(device).exists() => device.clone(),
            Some(device) => {
                return Err(QamrecError::device_not_found(format!(
                    "camera device {device} does not exist"
                )))
            }
            None => tokio::task::spawn_blocking(detect_default_webcam_device)
                .await
                .map_err(|e| QamrecError::acquisition(format!("camera lookup failed: {e}")))?
                .ok_or_else(|| {
                    QamrecError::device_not_found(
                        "No webcam device found (expected /dev/video0 or another /dev/video* node)",
                    )
                })?,
        };
        tracing::info!(%device, width = request.width, height = request.height, "Acquired camera");

        let mut tracks = vec![self.track(
            TrackKind::Video,
            "camera",
            TrackSettings::video(request.width, request.height, CAMERA_FRAME_RATE),
            camera_fragment(&device, request.width, request.height),
        )];
        if request.with_audio {
            tracks.push(self.microphone_track()?);
        }
        Ok(MediaSource::new(tracks))
    }

    async fn microphone(&self) -> QamrecResult<MediaSource> {
        Ok(MediaSource::new(vec![self.microphone_track()?]))
    }
}

fn x11_screen_fragment(hide_cursor: bool) -> String {
    let show_pointer = if hide_cursor { "false" } else { "true" };
    format!("ximagesrc use-damage=false remote=true show-pointer={show_pointer} do-timestamp=true")
}

fn pipewire_screen_fragment(node: u32) -> String {
    format!("pipewiresrc path={node} do-timestamp=true")
}

fn camera_fragment(device: &str, width: u32, height: u32) -> String {
    format!(
        "v4l2src device=\"{}\" do-timestamp=true ! videoconvert ! videoscale ! video/x-raw,width={width},height={height}",
        device.replace('"', "\\\"")
    )
}

fn microphone_fragment() -> String {
    "pulsesrc do-timestamp=true".to_string()
}

fn system_audio_fragment() -> String {
    "pulsesrc device=@DEFAULT_MONITOR@ do-timestamp=true".to_string()
}

/// Pick the `/dev/videoN` node most likely to be a webcam.
fn detect_default_webcam_device() -> Option<String> {
    let mut candidates: Vec<(String, u32)> = (0..16u32)
        .filter_map(|idx| {
            let dev_path = format!("/dev/video{idx}");
            if !Path::new(&dev_path).exists() {
                return None;
            }
            let name = std::fs::read_to_string(format!("/sys/class/video4linux/video{idx}/name"))
                .unwrap_or_default();
            let score = score_device(&name, query_v4l2_capture_capability(&dev_path));
            tracing::debug!(device = %dev_path, name = name.trim(), score, "Scored V4L2 device");
            Some((dev_path, score))
        })
        .collect();

    // Stable sort keeps the lowest index first among equal scores.
    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    candidates.into_iter().next().map(|(path, _)| path)
}

/// Score a V4L2 device as a webcam candidate; 0 means not a webcam.
fn score_device(name: &str, supports_capture: Option<bool>) -> u32 {
    const WEBCAM: [&str; 8] = [
        "webcam", "camera", "cam", "facetime", "logitech", "microsoft", "razer", "v4l2loopback",
    ];
    const NOT_WEBCAM: [&str; 8] = [
        "tuner", "tv", "dvb", "hdmi", "capture", "encoder", "decoder", "hauppauge",
    ];

    let name = name.to_lowercase();
    if NOT_WEBCAM.iter().any(|kw| name.contains(kw)) {
        return 0;
    }
    let named_webcam = WEBCAM.iter().any(|kw| name.contains(kw));

    match (named_webcam, supports_capture) {
        (true, Some(true)) => 100,
        (true, _) => 80,
        (false, Some(true)) => 50,
        (false, Some(false)) => 0,
        (false, None) => 10,
    }
}

/// `None` when `v4l2-ctl` is not installed.
fn query_v4l2_capture_capability(dev_path: &str) -> Option<bool> {
    let output = std::process::Command::new("v4l2-ctl")
        .args(["--device", dev_path, "--info"])
        .output()
        .ok()?;
    if !output.status.success() {
        return Some(false);
    }
    Some(
        String::from_utf8_lossy(&output.stdout)
            .to_lowercase()
            .contains("video capture"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wayland_wins_over_x11() {
        assert_eq!(display_server_from(true, true), DisplayServer::Wayland);
        assert_eq!(display_server_from(false, true), DisplayServer::X11);
        assert_eq!(display_server_from(false, false), DisplayServer::Unknown);
    }

    #[test]
    fn named_webcams_outrank_generic_capture_devices() {
        assert_eq!(score_device("Logitech BRIO\n", Some(true)), 100);
        assert_eq!(score_device("Integrated Camera", None), 80);
        assert_eq!(score_device("uvcvideo", Some(true)), 50);
        assert_eq!(score_device("uvcvideo", None), 10);
        assert_eq!(score_device("uvcvideo", Some(false)), 0);
    }

    #[test]
    fn tuners_and_capture_cards_are_excluded() {
        assert_eq!(score_device("Hauppauge WinTV", Some(true)), 0);
        assert_eq!(score_device("USB HDMI Capture", Some(true)), 0);
    }

    #[test]
    fn camera_fragment_scales_to_the_request() {
        assert_eq!(
            camera_fragment("/dev/video2", 300, 300),
            "v4l2src device=\"/dev/video2\" do-timestamp=true ! videoconvert ! videoscale ! video/x-raw,width=300,height=300"
        );
    }

    #[test]
    fn screen_fragments_follow_cursor_setting() {
        assert!(x11_screen_fragment(false).contains("show-pointer=true"));
        assert!(x11_screen_fragment(true).contains("show-pointer=false"));
        assert_eq!(pipewire_screen_fragment(42), "pipewiresrc path=42 do-timestamp=true");
    }
}
