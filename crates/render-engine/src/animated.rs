//! Animated GIF conversion.
//!
//! Two strictly sequential phases: every target frame is extracted by
//! seeking, then the buffered frames are quantized and written in order.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use gif::{Encoder, Frame, Repeat};
use image::RgbaImage;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::ConversionPhase;

use crate::draw::scale_to;
use crate::progress::{fraction_percent, ProgressReporter};
use crate::quantize::quantize;
use crate::transcode::{MediaDecoder, TranscodeConfig};

/// `floor(duration × fps)`.
pub fn target_frame_count(duration: Duration, fps: u32) -> usize {
    (duration.as_nanos() * fps as u128 / 1_000_000_000) as usize
}

/// Seek position of frame `index` at `fps`: `index / fps` seconds.
pub fn frame_position(index: usize, fps: u32) -> Duration {
    Duration::from_nanos((index as u128 * 1_000_000_000 / fps.max(1) as u128) as u64)
}

/// Per-frame display time, `round(1000 / fps)` milliseconds.
pub fn frame_delay_ms(fps: u32) -> u32 {
    (1000 + fps.max(1) / 2) / fps.max(1)
}

/// GIF delays are in hundredths of a second, so 67ms cannot be stored
/// exactly and is written as 7 (70ms).
fn delay_centis(delay_ms: u32) -> u16 {
    ((delay_ms + 5) / 10).min(u16::MAX as u32) as u16
}

pub(crate) async fn extract_frames(
    decoder: &mut dyn MediaDecoder,
    (width, height): (u32, u32),
    fps: u32,
    reporter: &mut ProgressReporter,
) -> QamrecResult<Vec<RgbaImage>> {
    let duration = decoder.metadata().duration;
    let total = target_frame_count(duration, fps);
    tracing::info!(total, width, height, fps, "Extracting frames");

    let mut frames = Vec::with_capacity(total);
    for index in 0..total {
        let frame = decoder
            .seek(frame_position(index, fps))
            .await
            .map_err(QamrecError::into_conversion)?;
        frames.push(scale_to(&frame.image, width, height));
        reporter.report(
            ConversionPhase::Extracting,
            fraction_percent(index, total, 50),
        );
    }
    Ok(frames)
}

pub(crate) async fn encode_gif(
    frames: &[RgbaImage],
    config: &TranscodeConfig,
    reporter: &mut ProgressReporter,
) -> QamrecResult<Bytes> {
    let Some(first) = frames.first() else {
        return Err(QamrecError::conversion(
            "recording is shorter than one GIF frame",
        ));
    };
    reporter.report(ConversionPhase::Encoding, 50);

    let (width, height) = first.dimensions();
    let mut writer = GifWriter::new(width, height, frame_delay_ms(config.extraction_fps))?;

    for (index, frame) in frames.iter().enumerate() {
        let indexed = quantize(frame, config.max_palette_colors);
        writer.write(&indexed)?;
        reporter.report(
            ConversionPhase::Encoding,
            50 + fraction_percent(index, frames.len(), 50),
        );

        if index % config.yield_every_frames.max(1) == 0 {
            tokio::task::yield_now().await;
        }
    }

    let payload = writer.finish()?;
    tracing::info!(frames = frames.len(), size_bytes = payload.len(), "GIF encoded");
    reporter.done();
    Ok(payload)
}

/// Incremental GIF writer with a per-frame local palette.
pub struct GifWriter {
    encoder: Encoder<Vec<u8>>,
    width: u16,
    height: u16,
    delay: u16,
}

impl GifWriter {
    pub fn new(width: u32, height: u32, delay_ms: u32) -> QamrecResult<Self> {
        let width = u16::try_from(width)
            .map_err(|_| QamrecError::conversion(format!("GIF width too large: {width}")))?;
        let height = u16::try_from(height)
            .map_err(|_| QamrecError::conversion(format!("GIF height too large: {height}")))?;

        let mut encoder = Encoder::new(Vec::new(), width, height, &[]).map_err(gif_error)?;
        encoder.set_repeat(Repeat::Infinite).map_err(gif_error)?;
        Ok(Self {
            encoder,
            width,
            height,
            delay: delay_centis(delay_ms),
        })
    }

    pub fn write(&mut self, frame: &crate::quantize::IndexedFrame) -> QamrecResult<()> {
        if (frame.width, frame.height) != (self.width as u32, self.height as u32) {
            return Err(QamrecError::conversion(format!(
                "frame is {}x{}, expected {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        let gif_frame = Frame {
            width: self.width,
            height: self.height,
            delay: self.delay,
            palette: Some(frame.palette.clone()),
            buffer: Cow::Borrowed(&frame.indices),
            ..Frame::default()
        };
        self.encoder.write_frame(&gif_frame).map_err(gif_error)
    }

    pub fn finish(self) -> QamrecResult<Bytes> {
        let bytes = self
            .encoder
            .into_inner()
            .map_err(|e| QamrecError::conversion(format!("failed to finalize GIF: {e}")))?;
        Ok(Bytes::from(bytes))
    }
}

fn gif_error(e: gif::EncodingError) -> QamrecError {
    QamrecError::conversion(format!("GIF encoding failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_is_floored() {
        assert_eq!(target_frame_count(Duration::from_millis(2000), 15), 30);
        assert_eq!(target_frame_count(Duration::from_millis(1999), 15), 29);
        assert_eq!(target_frame_count(Duration::from_millis(50), 15), 0);
    }

    #[test]
    fn positions_step_by_one_fifteenth() {
        assert_eq!(frame_position(0, 15), Duration::ZERO);
        assert_eq!(frame_position(15, 15), Duration::from_secs(1));
        assert_eq!(frame_position(3, 15), Duration::from_nanos(200_000_000));
    }

    #[test]
    fn delay_rounds_to_nearest_millisecond() {
        assert_eq!(frame_delay_ms(15), 67);
        assert_eq!(frame_delay_ms(30), 33);
        assert_eq!(delay_centis(67), 7);
    }
}
