//! Playback-driven video resampling.
//!
//! The source is played through in order; every decoded frame is scaled
//! into the output canvas, and the canvas is sampled on a fixed frame grid.
//! Each output tick carries the latest decoded frame at or before it.

use std::time::Duration;

use bytes::Bytes;
use image::RgbaImage;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::ConversionPhase;

use crate::draw::scale_to;
use crate::progress::ProgressReporter;
use crate::transcode::{MediaDecoder, VideoEncoder};

const PROGRESS_START: u8 = 10;
const PROGRESS_END: u8 = 90;

pub(crate) async fn resample(
    decoder: &mut dyn MediaDecoder,
    mut encoder: Box<dyn VideoEncoder>,
    (width, height): (u32, u32),
    fps: u32,
    reporter: &mut ProgressReporter,
) -> QamrecResult<Bytes> {
    let duration = decoder.metadata().duration;

    tracing::info!(width, height, fps, duration_ms = duration.as_millis() as u64, "Resampling video");
    reporter.report(ConversionPhase::Encoding, PROGRESS_START);

    let mut grid = FrameGrid::new(fps);
    let mut latest: Option<RgbaImage> = None;
    let mut last_pts = Duration::ZERO;

    while let Some(frame) = decoder
        .next_frame()
        .await
        .map_err(QamrecError::into_conversion)?
    {
        let scaled = scale_to(&frame.image, width, height);
        let previous = latest.as_ref().unwrap_or(&scaled);
        grid.fill_until(frame.pts, previous, encoder.as_mut())?;

        last_pts = frame.pts;
        latest = Some(scaled);
        reporter.report(ConversionPhase::Encoding, playback_percent(frame.pts, duration));
    }

    let Some(last) = latest else {
        return Err(QamrecError::conversion("source contains no video frames"));
    };
    // The last frame holds until the end of the source, and gets at least one tick.
    let end = duration.max(last_pts + Duration::from_nanos(1));
    grid.fill_until(end, &last, encoder.as_mut())?;

    tracing::debug!(frames = grid.emitted, "Finalizing resampled video");
    let payload = tokio::task::spawn_blocking(move || encoder.finish())
        .await
        .map_err(|e| QamrecError::conversion(format!("encoder task failed: {e}")))?
        .map_err(QamrecError::into_conversion)?;
    reporter.done();
    Ok(payload)
}

/// Fixed-rate output clock. Tick `n` falls at `n / fps` seconds, computed
/// exactly so the grid does not drift over long sources.
struct FrameGrid {
    fps: u64,
    emitted: u64,
}

impl FrameGrid {
    fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1) as u64,
            emitted: 0,
        }
    }

    fn next_tick(&self) -> Duration {
        Duration::from_nanos(self.emitted * 1_000_000_000 / self.fps)
    }

    /// Emit `frame` for every tick strictly before `until`.
    fn fill_until(
        &mut self,
        until: Duration,
        frame: &RgbaImage,
        encoder: &mut dyn VideoEncoder,
    ) -> QamrecResult<()> {
        while self.next_tick() < until {
            encoder
                .push_frame(frame, self.next_tick())
                .map_err(QamrecError::into_conversion)?;
            self.emitted += 1;
        }
        Ok(())
    }
}

/// Encoding progress for a playback position: 10% at the start, 90% at the end.
fn playback_percent(position: Duration, duration: Duration) -> u8 {
    if duration.is_zero() {
        return PROGRESS_START;
    }
    let fraction = (position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
    let span = (PROGRESS_END - PROGRESS_START) as f64;
    (PROGRESS_START as f64 + fraction * span).round().min(PROGRESS_END as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_ticks_do_not_accumulate_rounding() {
        let mut grid = FrameGrid::new(30);
        grid.emitted = 30;
        assert_eq!(grid.next_tick(), Duration::from_secs(1));
        grid.emitted = 1;
        assert_eq!(grid.next_tick(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn playback_progress_spans_ten_to_ninety() {
        let total = Duration::from_secs(10);
        assert_eq!(playback_percent(Duration::ZERO, total), 10);
        assert_eq!(playback_percent(Duration::from_secs(5), total), 50);
        assert_eq!(playback_percent(total, total), 90);
        assert_eq!(playback_percent(Duration::from_secs(12), total), 90);
        assert_eq!(playback_percent(Duration::from_secs(1), Duration::ZERO), 10);
    }
}
