//! Offline transcoding of finished recordings.
//!
//! Decoding and video encoding are injected through [`DecoderFactory`] and
//! [`EncoderFactory`]; the GIF encoder is built in. Decoders and encoders are
//! owned by the conversion call and dropped on every exit path, so
//! implementations release their resources in `Drop`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::RgbaImage;
use qamrec_common::config::TranscodeDefaults;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{
    Container, FormatDescriptor, RecordingArtifact, Resolution, VideoFrame,
};
use serde::{Deserialize, Serialize};

use crate::progress::{ProgressCallback, ProgressReporter};

/// Stream properties reported by a decoder once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMetadata {
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

/// A decode handle over one recording.
///
/// Taking `&mut self` means at most one seek or read can be in flight.
#[async_trait]
pub trait MediaDecoder: Send {
    fn metadata(&self) -> MediaMetadata;

    /// Seek to `position` and return the frame displayed there.
    async fn seek(&mut self, position: Duration) -> QamrecResult<VideoFrame>;

    /// Next frame in playback order, or `None` at the end of the stream.
    async fn next_frame(&mut self) -> QamrecResult<Option<VideoFrame>>;
}

pub trait DecoderFactory: Send + Sync {
    /// Open a decoder over `payload`. May block while the stream is inspected;
    /// the transcoder calls it from the blocking pool.
    fn open(
        &self,
        payload: &Bytes,
        format: &FormatDescriptor,
    ) -> QamrecResult<Box<dyn MediaDecoder>>;
}

/// Encoder for fixed-rate canvas frames.
pub trait VideoEncoder: Send {
    fn push_frame(&mut self, frame: &RgbaImage, pts: Duration) -> QamrecResult<()>;

    /// Flush and return the finished payload. May block until the encoder
    /// has drained; the transcoder calls it from the blocking pool.
    fn finish(self: Box<Self>) -> QamrecResult<Bytes>;
}

/// Parameters for a video encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub format: FormatDescriptor,
    pub video_bits_per_second: u32,
}

pub trait EncoderFactory: Send + Sync {
    fn create(&self, settings: &EncoderSettings) -> QamrecResult<Box<dyn VideoEncoder>>;
}

/// Transcoder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeConfig {
    pub extraction_fps: u32,
    pub resample_fps: u32,
    pub yield_every_frames: usize,
    pub max_palette_colors: usize,
    pub video_bits_per_second: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::from(&TranscodeDefaults::default())
    }
}

impl From<&TranscodeDefaults> for TranscodeConfig {
    fn from(d: &TranscodeDefaults) -> Self {
        Self {
            extraction_fps: d.extraction_fps.max(1),
            resample_fps: d.resample_fps.max(1),
            yield_every_frames: d.yield_every_frames.max(1),
            max_palette_colors: d.max_palette_colors,
            video_bits_per_second: 2_500_000,
        }
    }
}

/// Download formats offered for a finished recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportTarget {
    Webm,
    Mp4,
    Gif,
}

impl ExportTarget {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mp4 => "mp4",
            Self::Gif => "gif",
        }
    }
}

impl std::str::FromStr for ExportTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webm" => Ok(Self::Webm),
            "mp4" => Ok(Self::Mp4),
            "gif" => Ok(Self::Gif),
            other => Err(format!("unknown export format '{other}' (expected webm, mp4, gif)")),
        }
    }
}

/// How a download request will be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPlan {
    /// Hand out the recorded payload unchanged.
    DirectCopy,
    /// Re-encode as video in the given container.
    Resample(Container),
    /// Frame-by-frame GIF conversion.
    AnimatedImage,
}

/// Decide how to produce `target` from a recording in `native`.
///
/// MP4 cannot be produced by re-encoding, so it is only offered for native
/// MP4 recordings at their original size.
pub fn plan_export(
    native: Container,
    target: ExportTarget,
    resolution: Resolution,
) -> QamrecResult<ExportPlan> {
    match target {
        ExportTarget::Webm if resolution.is_original() && native == Container::Webm => {
            Ok(ExportPlan::DirectCopy)
        }
        ExportTarget::Webm => Ok(ExportPlan::Resample(Container::Webm)),
        ExportTarget::Mp4 if native != Container::Mp4 => Err(QamrecError::unsupported(
            "MP4 download is only available for recordings made in MP4",
        )),
        ExportTarget::Mp4 if !resolution.is_original() => Err(QamrecError::unsupported(
            "MP4 recordings can only be downloaded at their original resolution",
        )),
        ExportTarget::Mp4 => Ok(ExportPlan::DirectCopy),
        ExportTarget::Gif => Ok(ExportPlan::AnimatedImage),
    }
}

/// Runs conversions with injected decode/encode back ends.
#[derive(Clone)]
pub struct Transcoder {
    decoders: Arc<dyn DecoderFactory>,
    encoders: Arc<dyn EncoderFactory>,
    config: TranscodeConfig,
}

impl Transcoder {
    pub fn new(decoders: Arc<dyn DecoderFactory>, encoders: Arc<dyn EncoderFactory>) -> Self {
        Self {
            decoders,
            encoders,
            config: TranscodeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TranscodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// Produce `target` from `artifact`, copying, resampling or converting
    /// as [`plan_export`] decides.
    pub async fn export(
        &self,
        artifact: &RecordingArtifact,
        target: ExportTarget,
        resolution: Resolution,
        progress: Option<ProgressCallback>,
    ) -> QamrecResult<Bytes> {
        let plan = plan_export(artifact.format.container, target, resolution)?;
        tracing::info!(?target, ?plan, %resolution, "Exporting recording");
        match plan {
            ExportPlan::DirectCopy => {
                let mut reporter = ProgressReporter::new(progress);
                reporter.done();
                Ok(artifact.payload.clone())
            }
            ExportPlan::Resample(container) => {
                self.resample_to_video(artifact, container, resolution, progress)
                    .await
            }
            ExportPlan::AnimatedImage => {
                self.resample_to_animated_image(artifact, resolution, progress)
                    .await
            }
        }
    }

    /// Re-encode `artifact` as video in `container`, scaled to `resolution`.
    ///
    /// Skipped (the payload is returned as-is) when the resolution is
    /// original and the recording is already in `container`.
    pub async fn resample_to_video(
        &self,
        artifact: &RecordingArtifact,
        container: Container,
        resolution: Resolution,
        progress: Option<ProgressCallback>,
    ) -> QamrecResult<Bytes> {
        let mut reporter = ProgressReporter::new(progress);
        if resolution.is_original() && artifact.format.container == container {
            tracing::debug!(%container, "Skipping resample; payload already matches");
            reporter.done();
            return Ok(artifact.payload.clone());
        }

        let mut decoder = self.open_decoder(artifact).await?;
        let meta = decoder.metadata();
        let (width, height) = resolution.scale(meta.width, meta.height);
        let encoder = self
            .encoders
            .create(&EncoderSettings {
                width,
                height,
                frame_rate: self.config.resample_fps,
                format: output_format(container),
                video_bits_per_second: self.config.video_bits_per_second,
            })
            .map_err(QamrecError::into_conversion)?;

        crate::resample::resample(
            decoder.as_mut(),
            encoder,
            (width, height),
            self.config.resample_fps,
            &mut reporter,
        )
        .await
    }

    /// Convert `artifact` to an animated GIF scaled to `resolution`.
    pub async fn resample_to_animated_image(
        &self,
        artifact: &RecordingArtifact,
        resolution: Resolution,
        progress: Option<ProgressCallback>,
    ) -> QamrecResult<Bytes> {
        let mut reporter = ProgressReporter::new(progress);
        reporter.report(qamrec_media_model::ConversionPhase::Extracting, 0);

        let frames = {
            let mut decoder = self.open_decoder(artifact).await?;
            let meta = decoder.metadata();
            let size = resolution.scale(meta.width, meta.height);
            crate::animated::extract_frames(
                decoder.as_mut(),
                size,
                self.config.extraction_fps,
                &mut reporter,
            )
            .await?
        };

        crate::animated::encode_gif(&frames, &self.config, &mut reporter).await
    }

    async fn open_decoder(
        &self,
        artifact: &RecordingArtifact,
    ) -> QamrecResult<Box<dyn MediaDecoder>> {
        let decoders = self.decoders.clone();
        let payload = artifact.payload.clone();
        let format = artifact.format.clone();
        tokio::task::spawn_blocking(move || decoders.open(&payload, &format))
            .await
            .map_err(|e| QamrecError::conversion(format!("decoder task failed: {e}")))?
            .map_err(QamrecError::into_conversion)
    }
}

/// Encoder output format for a resample into `container`.
pub fn output_format(container: Container) -> FormatDescriptor {
    match container {
        Container::Webm => FormatDescriptor {
            container,
            mime_type: "video/webm;codecs=vp9".to_string(),
        },
        Container::Mp4 => FormatDescriptor {
            container,
            mime_type: "video/mp4;codecs=avc1".to_string(),
        },
    }
}
