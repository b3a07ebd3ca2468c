//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where finished recordings and conversions are saved.
    pub output_dir: PathBuf,

    /// Capture session and compositor defaults.
    pub capture: CaptureDefaults,

    /// Transcoder defaults.
    pub transcode: TranscodeDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default capture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDefaults {
    /// Try MP4 before the WebM baseline when negotiating the container.
    pub prefer_mp4: bool,

    /// Interval at which the recorder emits data chunks.
    pub timeslice_ms: u64,

    /// Resolution of the elapsed-time ticker.
    pub tick_interval_ms: u64,

    pub audio_bits_per_second: u32,

    pub video_bits_per_second: u32,

    /// Picture-in-picture overlay geometry.
    pub pip: PipDefaults,

    /// Frame rate at which the compositor canvas is captured.
    pub compositor_frame_rate: u32,

    /// Display refresh rate driving the compositor render loop.
    pub refresh_hz: u32,
}

/// Overlay inset geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipDefaults {
    pub width: u32,
    pub height: u32,
    pub offset_from_right: u32,
    pub offset_from_bottom: u32,
    pub corner_radius: u32,
}

/// Default transcoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeDefaults {
    /// Frame rate used to sample the source for animated images.
    pub extraction_fps: u32,

    /// Frame rate of re-encoded video output.
    pub resample_fps: u32,

    /// Yield to the scheduler after this many encoded frames.
    pub yield_every_frames: usize,

    /// Upper bound on the per-frame palette size.
    pub max_palette_colors: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "qamrec=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            capture: CaptureDefaults::default(),
            transcode: TranscodeDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            prefer_mp4: true,
            timeslice_ms: 1000,
            tick_interval_ms: 100,
            audio_bits_per_second: 128_000,
            video_bits_per_second: 2_500_000,
            pip: PipDefaults::default(),
            compositor_frame_rate: 30,
            refresh_hz: 60,
        }
    }
}

impl Default for PipDefaults {
    fn default() -> Self {
        Self {
            width: 300,
            height: 300,
            offset_from_right: 20,
            offset_from_bottom: 20,
            corner_radius: 10,
        }
    }
}

impl Default for TranscodeDefaults {
    fn default() -> Self {
        Self {
            extraction_fps: 15,
            resample_fps: 30,
            yield_every_frames: 10,
            max_palette_colors: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match Self::from_json(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(content: &str) -> crate::error::QamrecResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or divide by zero.
    pub fn validate(&self) -> crate::error::QamrecResult<()> {
        use crate::error::QamrecError;

        if self.capture.timeslice_ms == 0 || self.capture.tick_interval_ms == 0 {
            return Err(QamrecError::config(
                "capture.timeslice_ms and capture.tick_interval_ms must be positive",
            ));
        }
        if self.capture.compositor_frame_rate == 0 || self.capture.refresh_hz == 0 {
            return Err(QamrecError::config(
                "capture.compositor_frame_rate and capture.refresh_hz must be positive",
            ));
        }
        if self.transcode.extraction_fps == 0 || self.transcode.resample_fps == 0 {
            return Err(QamrecError::config(
                "transcode frame rates must be positive",
            ));
        }
        if !(2..=256).contains(&self.transcode.max_palette_colors) {
            return Err(QamrecError::config(
                "transcode.max_palette_colors must be within 2..=256",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("qamrec").join("config.json")
}

/// Default directory for saved recordings.
fn default_output_dir() -> PathBuf {
    std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join("Videos"))
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recorder_expectations() {
        let config = AppConfig::default();
        assert!(config.capture.prefer_mp4);
        assert_eq!(config.capture.timeslice_ms, 1000);
        assert_eq!(config.capture.tick_interval_ms, 100);
        assert_eq!(config.capture.pip.width, 300);
        assert_eq!(config.capture.pip.offset_from_right, 20);
        assert_eq!(config.capture.pip.corner_radius, 10);
        assert_eq!(config.transcode.extraction_fps, 15);
        assert_eq!(config.transcode.resample_fps, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config =
            AppConfig::from_json(r#"{ "capture": { "prefer_mp4": false } }"#).unwrap();
        assert!(!config.capture.prefer_mp4);
        assert_eq!(config.capture.timeslice_ms, 1000);
        assert_eq!(config.transcode.extraction_fps, 15);
    }

    #[test]
    fn zero_frame_rate_is_rejected() {
        let err = AppConfig::from_json(r#"{ "transcode": { "extraction_fps": 0 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("frame rates"));
    }
}
