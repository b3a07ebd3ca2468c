//! Re-encoding canvas frames into a video container.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use gstreamer as gst;
use gstreamer_app as gst_app;
use image::RgbaImage;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_render_engine::{EncoderFactory, EncoderSettings, VideoEncoder};

use crate::elements::{encoder_launch, CodecPlan};
use crate::pipeline::{frame_buffer, rgba_caps, GstPipeline};

#[derive(Debug, Clone, Default)]
pub struct GstEncoderFactory;

impl GstEncoderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderFactory for GstEncoderFactory {
    fn create(&self, settings: &EncoderSettings) -> QamrecResult<Box<dyn VideoEncoder>> {
        let plan = CodecPlan::for_format(&settings.format).ok_or_else(|| {
            QamrecError::unsupported(format!("cannot encode {}", settings.format))
        })?;
        let launch = encoder_launch(&plan, settings.frame_rate, settings.video_bits_per_second);
        let pipeline = GstPipeline::from_launch("encoder", &launch)?;

        let src = pipeline.app_src("src")?;
        src.set_caps(Some(&rgba_caps(
            settings.width,
            settings.height,
            settings.frame_rate,
        )));

        let output = Arc::new(Mutex::new(BytesMut::new()));
        let sink_output = output.clone();
        pipeline.app_sink("out")?.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    sink_output
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(map.as_slice());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(QamrecError::into_conversion)?;
        tracing::debug!(width = settings.width, height = settings.height,
            frame_rate = settings.frame_rate, format = %settings.format, "Encoder started");

        Ok(Box::new(GstEncoder {
            pipeline,
            src,
            output,
            frame_duration: Duration::from_nanos(
                1_000_000_000 / settings.frame_rate.max(1) as u64,
            ),
        }))
    }
}

pub struct GstEncoder {
    pipeline: GstPipeline,
    src: gst_app::AppSrc,
    output: Arc<Mutex<BytesMut>>,
    frame_duration: Duration,
}

impl VideoEncoder for GstEncoder {
    fn push_frame(&mut self, frame: &RgbaImage, pts: Duration) -> QamrecResult<()> {
        self.src
            .push_buffer(frame_buffer(frame, pts, self.frame_duration))
            .map_err(|e| {
                self.pipeline
                    .bus_error()
                    .map(QamrecError::into_conversion)
                    .unwrap_or_else(|| QamrecError::conversion(format!("encoder refused frame: {e:?}")))
            })?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> QamrecResult<Bytes> {
        self.src
            .end_of_stream()
            .map_err(|e| QamrecError::conversion(format!("failed to end encoder input: {e:?}")))?;
        if let Some(error) = self.pipeline.wait_for_eos() {
            return Err(error.into_conversion());
        }
        self.pipeline.set_state(gst::State::Null)?;

        let bytes = std::mem::take(&mut *self.output.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(bytes = bytes.len(), "Encoder finished");
        Ok(bytes.freeze())
    }
}
