//! File decoding for the transcoder.
//!
//! The recording payload is written to a temporary file and decoded with
//! `decodebin`. Opening blocks while the file prerolls (and, for streamed
//! WebM, while its duration is measured), so callers open from the
//! blocking pool. Seeks are flushing and accurate so the returned frame is the
//! one displayed at the requested position, not the previous keyframe.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{FormatDescriptor, VideoFrame};
use qamrec_render_engine::{DecoderFactory, MediaDecoder, MediaMetadata};
use tempfile::NamedTempFile;

use crate::elements::file_decoder_launch;
use crate::pipeline::{escape_path, sample_to_frame, GstPipeline, STATE_TIMEOUT};

fn timeout() -> gst::ClockTime {
    gst::ClockTime::from_nseconds(STATE_TIMEOUT.as_nanos() as u64)
}

#[derive(Debug, Clone, Default)]
pub struct GstDecoderFactory;

impl GstDecoderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl DecoderFactory for GstDecoderFactory {
    fn open(&self, payload: &Bytes, format: &FormatDescriptor) -> QamrecResult<Box<dyn MediaDecoder>> {
        Ok(Box::new(GstDecoder::open(payload, format)?))
    }
}

pub struct GstDecoder {
    pipeline: GstPipeline,
    sink: gst_app::AppSink,
    metadata: MediaMetadata,
    playing: bool,
    // Removed from disk when the decoder is dropped.
    _file: NamedTempFile,
}

impl GstDecoder {
    pub fn open(payload: &Bytes, format: &FormatDescriptor) -> QamrecResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("qamrec-")
            .suffix(&format!(".{}", format.container.extension()))
            .tempfile()?;
        file.write_all(payload)?;
        file.flush()?;

        let launch = file_decoder_launch(&escape_path(file.path()));
        let pipeline = GstPipeline::from_launch("decoder", &launch)?;
        let sink = pipeline.app_sink("frames")?;

        pipeline
            .set_state_blocking(gst::State::Paused)
            .map_err(QamrecError::into_conversion)?;
        let preroll = sink
            .try_pull_preroll(timeout())
            .ok_or_else(|| QamrecError::conversion("recording has no decodable video"))?;
        let first = sample_to_frame(&preroll)?;

        let duration = match pipeline.inner().query_duration::<gst::ClockTime>() {
            Some(d) if d.nseconds() > 0 => Duration::from_nanos(d.nseconds()),
            _ => measure_duration(&pipeline, &sink)?,
        };

        let metadata = MediaMetadata {
            width: first.width(),
            height: first.height(),
            duration,
        };
        tracing::debug!(?metadata, "Decoder opened");
        Ok(Self {
            pipeline,
            sink,
            metadata,
            playing: false,
            _file: file,
        })
    }
}

/// Streamed WebM carries no duration header; play the file through once and
/// take the end of the last frame, then rewind.
fn measure_duration(pipeline: &GstPipeline, sink: &gst_app::AppSink) -> QamrecResult<Duration> {
    tracing::debug!("Container reports no duration; scanning frames");
    pipeline.set_state(gst::State::Playing)?;

    let mut end = Duration::ZERO;
    while let Some(sample) = sink.try_pull_sample(timeout()) {
        if let Some(buffer) = sample.buffer() {
            let pts = buffer.pts().map_or(0, |t| t.nseconds());
            let length = buffer.duration().map_or(0, |t| t.nseconds());
            end = end.max(Duration::from_nanos(pts + length));
        }
    }
    if !sink.is_eos() {
        return Err(QamrecError::conversion("timed out measuring recording duration"));
    }

    pipeline.set_state_blocking(gst::State::Paused)?;
    seek_to(pipeline.inner(), sink, Duration::ZERO)?;
    Ok(end)
}

fn pause_blocking(pipeline: &gst::Pipeline) -> QamrecResult<()> {
    pipeline
        .set_state(gst::State::Paused)
        .map_err(|e| QamrecError::conversion(format!("failed to pause decoder: {e:?}")))?;
    if let (Err(e), _, _) = pipeline.state(timeout()) {
        return Err(QamrecError::conversion(format!("decoder did not pause: {e:?}")));
    }
    Ok(())
}

fn seek_to(
    pipeline: &gst::Pipeline,
    sink: &gst_app::AppSink,
    position: Duration,
) -> QamrecResult<VideoFrame> {
    pipeline
        .seek_simple(
            gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
            gst::ClockTime::from_nseconds(position.as_nanos() as u64),
        )
        .map_err(|e| QamrecError::conversion(format!("seek to {position:?} failed: {e}")))?;
    let sample = sink
        .try_pull_preroll(timeout())
        .ok_or_else(|| QamrecError::conversion(format!("no frame at {position:?}")))?;
    sample_to_frame(&sample)
}

#[async_trait]
impl MediaDecoder for GstDecoder {
    fn metadata(&self) -> MediaMetadata {
        self.metadata
    }

    async fn seek(&mut self, position: Duration) -> QamrecResult<VideoFrame> {
        let was_playing = std::mem::take(&mut self.playing);
        let pipeline = self.pipeline.inner().clone();
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || {
            if was_playing {
                pause_blocking(&pipeline)?;
            }
            seek_to(&pipeline, &sink, position)
        })
        .await
        .map_err(|e| QamrecError::conversion(format!("seek task failed: {e}")))?
    }

    async fn next_frame(&mut self) -> QamrecResult<Option<VideoFrame>> {
        if !self.playing {
            self.pipeline.set_state(gst::State::Playing)?;
            self.playing = true;
        }
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || match sink.try_pull_sample(timeout()) {
            Some(sample) => sample_to_frame(&sample).map(Some),
            None if sink.is_eos() => Ok(None),
            None => Err(QamrecError::conversion("timed out waiting for a decoded frame")),
        })
        .await
        .map_err(|e| QamrecError::conversion(format!("decode task failed: {e}")))?
    }
}
