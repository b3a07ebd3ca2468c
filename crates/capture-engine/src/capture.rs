//! Capture modes and media acquisition.

use async_trait::async_trait;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{MediaSource, MediaTrack};
use serde::{Deserialize, Serialize};

/// What the user asked to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    #[default]
    Screen,
    Camera,
    /// Screen with the camera composited as a picture-in-picture inset.
    ScreenCamera,
}

impl std::str::FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "screen" => Ok(Self::Screen),
            "camera" => Ok(Self::Camera),
            "screen-camera" | "pip" => Ok(Self::ScreenCamera),
            other => Err(format!(
                "unknown capture mode '{other}' (expected screen, camera, screen-camera)"
            )),
        }
    }
}

/// Camera acquisition constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraRequest {
    pub width: u32,
    pub height: u32,
    pub with_audio: bool,
}

/// Acquisition collaborator: obtains live sources from the platform.
///
/// Implementations report refusals as [`QamrecError::PermissionDenied`] and
/// missing hardware as [`QamrecError::DeviceNotFound`].
#[async_trait]
pub trait MediaAcquisition: Send + Sync {
    async fn screen(&self, with_system_audio: bool) -> QamrecResult<MediaSource>;

    async fn camera(&self, request: CameraRequest) -> QamrecResult<MediaSource>;

    async fn microphone(&self) -> QamrecResult<MediaSource>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureRequest {
    pub mode: CaptureMode,
    pub include_system_audio: bool,
    pub include_microphone: bool,
}

/// Camera size requested for the picture-in-picture inset.
pub const PIP_CAMERA_SIZE: (u32, u32) = (300, 300);

/// Camera size requested for camera-only recordings.
pub const CAMERA_ONLY_SIZE: (u32, u32) = (1280, 720);

/// Sources acquired for one recording.
#[derive(Debug, Clone)]
pub struct AcquiredCapture {
    /// The stream to record, or the compositor's primary input.
    pub primary: MediaSource,
    /// Camera stream to composite over `primary`.
    pub overlay: Option<MediaSource>,
    /// Ending this track stops the recording.
    pub end_track: Option<MediaTrack>,
}

impl AcquiredCapture {
    /// Stop every acquired track.
    pub fn release(&self) {
        self.primary.stop_all();
        if let Some(overlay) = &self.overlay {
            overlay.stop_all();
        }
    }
}

/// Acquire the sources needed for `request`.
///
/// Screen mode appends microphone audio tracks to the screen stream. On any
/// failure, tracks acquired so far are stopped before the error is returned.
pub async fn acquire(
    acquisition: &dyn MediaAcquisition,
    request: CaptureRequest,
) -> QamrecResult<AcquiredCapture> {
    tracing::info!(mode = ?request.mode, system_audio = request.include_system_audio,
        microphone = request.include_microphone, "Acquiring capture sources");

    match request.mode {
        CaptureMode::Camera => {
            let (width, height) = CAMERA_ONLY_SIZE;
            let camera = acquisition
                .camera(CameraRequest {
                    width,
                    height,
                    with_audio: request.include_microphone || request.include_system_audio,
                })
                .await
                .map_err(QamrecError::into_acquisition)?;
            Ok(AcquiredCapture {
                primary: camera,
                overlay: None,
                end_track: None,
            })
        }
        CaptureMode::Screen | CaptureMode::ScreenCamera => {
            let mut screen = acquisition
                .screen(request.include_system_audio)
                .await
                .map_err(QamrecError::into_acquisition)?;
            let end_track = screen.first_video().cloned();

            let overlay = if request.mode == CaptureMode::ScreenCamera {
                let (width, height) = PIP_CAMERA_SIZE;
                let camera = acquisition
                    .camera(CameraRequest {
                        width,
                        height,
                        with_audio: request.include_microphone,
                    })
                    .await;
                match camera {
                    Ok(camera) => Some(camera),
                    Err(e) => {
                        screen.stop_all();
                        return Err(e.into_acquisition());
                    }
                }
            } else {
                if request.include_microphone {
                    match acquisition.microphone().await {
                        Ok(mic) => {
                            for track in mic.audio_tracks() {
                                screen.add_track(track.clone());
                            }
                        }
                        Err(e) => {
                            screen.stop_all();
                            return Err(e.into_acquisition());
                        }
                    }
                }
                None
            };

            Ok(AcquiredCapture {
                primary: screen,
                overlay,
                end_track,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_names() {
        assert_eq!("screen".parse::<CaptureMode>(), Ok(CaptureMode::Screen));
        assert_eq!("PIP".parse::<CaptureMode>(), Ok(CaptureMode::ScreenCamera));
        assert_eq!(
            "screen-camera".parse::<CaptureMode>(),
            Ok(CaptureMode::ScreenCamera)
        );
        assert!("window".parse::<CaptureMode>().is_err());
    }

    #[test]
    fn mode_serializes_kebab_case() {
        let json = serde_json::to_string(&CaptureMode::ScreenCamera).unwrap();
        assert_eq!(json, "\"screen-camera\"");
    }
}
