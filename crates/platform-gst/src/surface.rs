//! Live decode surfaces feeding the compositor.

use std::sync::{Arc, Mutex, PoisonError};

use gstreamer as gst;
use gstreamer_app as gst_app;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{FrameReceiver, MediaSource, MediaTrack, TrackOrigin, VideoFrame};
use qamrec_render_engine::{DecodeSurface, SurfaceFactory};

use crate::elements::surface_launch;
use crate::pipeline::{sample_to_frame, BusEvent, BusWatcher, GstPipeline};

type LatestFrame = Arc<Mutex<Option<Arc<VideoFrame>>>>;

/// Opens surfaces for the first video track of a source.
#[derive(Debug, Clone, Default)]
pub struct GstSurfaceFactory;

impl GstSurfaceFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SurfaceFactory for GstSurfaceFactory {
    fn open(&self, source: &MediaSource) -> QamrecResult<Box<dyn DecodeSurface>> {
        let track = source
            .first_video()
            .ok_or_else(|| QamrecError::unsupported("source has no video track to display"))?;
        match track.origin() {
            TrackOrigin::Launch(fragment) => Ok(Box::new(PipelineSurface::open(track, fragment)?)),
            TrackOrigin::Canvas(frames) => Ok(Box::new(CanvasSurface {
                frames: frames.clone(),
                started: false,
            })),
            TrackOrigin::Opaque => Err(QamrecError::unsupported(format!(
                "track '{}' cannot be displayed",
                track.label()
            ))),
        }
    }
}

/// A pipeline decoding a live source into its latest RGBA frame.
///
/// When the source ends or the pipeline fails, the displayed track is
/// stopped so whoever recorded it sees the track end.
pub struct PipelineSurface {
    pipeline: Option<GstPipeline>,
    track: MediaTrack,
    watcher: Option<BusWatcher>,
    latest: LatestFrame,
}

impl PipelineSurface {
    fn open(track: &MediaTrack, fragment: &str) -> QamrecResult<Self> {
        let pipeline = GstPipeline::from_launch(
            format!("surface:{}", track.label()),
            &surface_launch(fragment),
        )?;
        let latest: LatestFrame = Arc::default();

        let sink = pipeline.app_sink("frames")?;
        let slot = latest.clone();
        sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    match sample_to_frame(&sample) {
                        Ok(frame) => {
                            *slot.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(Arc::new(frame));
                        }
                        Err(e) => tracing::debug!(error = %e, "Dropping undecodable surface sample"),
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(Self {
            pipeline: Some(pipeline),
            track: track.clone(),
            watcher: None,
            latest,
        })
    }
}

impl DecodeSurface for PipelineSurface {
    fn start(&mut self) -> QamrecResult<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| QamrecError::recording("surface already released"))?;
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| pipeline.bus_error().unwrap_or(e))?;

        let track = self.track.clone();
        self.watcher = BusWatcher::spawn(pipeline, move |event| {
            match event {
                BusEvent::SourceEnded { element, error: None } => {
                    tracing::info!(%element, track = track.label(), "Surface source ended");
                }
                BusEvent::SourceEnded { error: Some(error), .. } | BusEvent::Failed(error) => {
                    tracing::warn!(%error, track = track.label(), "Surface pipeline failed");
                }
            }
            track.stop();
        });
        Ok(())
    }

    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.current_frame().map(|f| f.image.dimensions())
    }

    fn release(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(pipeline) = self.pipeline.take() {
            tracing::debug!(pipeline = pipeline.name(), "Releasing surface");
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = %e, "Surface did not stop cleanly");
            }
        }
    }
}

impl Drop for PipelineSurface {
    fn drop(&mut self) {
        self.release();
    }
}

/// Displays frames already produced in-process, e.g. another canvas.
struct CanvasSurface {
    frames: FrameReceiver,
    started: bool,
}

impl DecodeSurface for CanvasSurface {
    fn start(&mut self) -> QamrecResult<()> {
        self.started = true;
        Ok(())
    }

    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        if !self.started {
            return None;
        }
        self.frames.borrow().clone()
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.current_frame().map(|f| f.image.dimensions())
    }

    fn release(&mut self) {
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::RgbaImage;
    use qamrec_media_model::{frame_channel, MediaTrack, TrackKind, TrackSettings};

    #[test]
    fn canvas_tracks_are_displayed_without_a_pipeline() {
        let (tx, rx) = frame_channel();
        let source = MediaSource::new(vec![MediaTrack::new(
            "canvas-0",
            TrackKind::Video,
            "canvas",
            TrackSettings::video(4, 2, 30),
            TrackOrigin::Canvas(rx),
        )]);
        let mut surface = GstSurfaceFactory::new().open(&source).unwrap();

        tx.send_replace(Some(Arc::new(VideoFrame::new(RgbaImage::new(4, 2), Duration::ZERO))));
        assert!(surface.current_frame().is_none());

        surface.start().unwrap();
        assert_eq!(surface.native_size(), Some((4, 2)));

        surface.release();
        assert!(surface.current_frame().is_none());
    }

    #[test]
    fn opaque_tracks_are_refused() {
        let source = MediaSource::new(vec![MediaTrack::new(
            "v",
            TrackKind::Video,
            "external",
            TrackSettings::default(),
            TrackOrigin::Opaque,
        )]);
        let err = GstSurfaceFactory::new().open(&source).err().unwrap();
        assert_eq!(err.kind(), qamrec_common::error::ErrorKind::Unsupported);
    }
}
