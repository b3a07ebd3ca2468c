//! Live recorder streaming muxed chunks out of an `appsink`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use qamrec_capture_engine::{
    Recorder, RecorderEvent, RecorderEventSender, RecorderFactory, RecorderOptions,
};
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{FormatDescriptor, FrameReceiver, MediaSource, TrackOrigin};

use crate::elements::{canvas_source, recorder_launch, CodecPlan};
use crate::pipeline::{frame_buffer, rgba_caps, BusEvent, BusWatcher, GstPipeline};

const CANVAS_SRC: &str = "canvas";
const DEFAULT_FRAME_RATE: u32 = 30;

/// Builds GStreamer recorders for sources whose tracks carry launch
/// fragments or in-process canvas feeds.
#[derive(Debug, Clone, Default)]
pub struct GstRecorderFactory;

impl GstRecorderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl RecorderFactory for GstRecorderFactory {
    fn create(
        &self,
        source: &MediaSource,
        format: &FormatDescriptor,
        options: &RecorderOptions,
        events: RecorderEventSender,
    ) -> QamrecResult<Box<dyn Recorder>> {
        let plan = CodecPlan::for_format(format)
            .ok_or_else(|| QamrecError::unsupported(format!("cannot record {format}")))?;
        let video = source
            .first_video()
            .ok_or_else(|| QamrecError::acquisition("source has no video track"))?;
        let frame_rate = video.settings().frame_rate.unwrap_or(DEFAULT_FRAME_RATE);

        let (video_fragment, canvas) = match video.origin() {
            TrackOrigin::Launch(fragment) => (fragment.clone(), None),
            TrackOrigin::Canvas(frames) => (canvas_source(CANVAS_SRC), Some(frames.clone())),
            TrackOrigin::Opaque => {
                return Err(QamrecError::unsupported(format!(
                    "video track '{}' cannot be recorded by GStreamer",
                    video.label()
                )))
            }
        };

        let mut audio_fragments = Vec::new();
        for track in source.audio_tracks() {
            match track.origin() {
                TrackOrigin::Launch(fragment) => audio_fragments.push(fragment.clone()),
                _ => tracing::warn!(track = track.label(), "Skipping audio track without a pipeline source"),
            }
        }

        let launch = recorder_launch(
            &plan,
            &video_fragment,
            &audio_fragments,
            frame_rate,
            options.video_bits_per_second,
            options.audio_bits_per_second,
            options.timeslice,
        );
        let pipeline = GstPipeline::from_launch("recorder", &launch)?;

        let chunks = Arc::new(Mutex::new(ChunkBuffer::new(events.clone())));
        let sink = pipeline.app_sink("out")?;
        let sink_chunks = chunks.clone();
        sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    sink_chunks
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(map.as_slice());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let canvas = match canvas {
            Some(frames) => Some(CanvasInput {
                src: pipeline.app_src(CANVAS_SRC)?,
                frames,
                frame_rate,
                feeder: None,
            }),
            None => None,
        };

        tracing::info!(format = %format, audio_tracks = audio_fragments.len(), frame_rate, "Recorder pipeline built");
        Ok(Box::new(GstRecorder {
            pipeline,
            source: source.clone(),
            chunks,
            events,
            canvas,
            watcher: None,
            source_lost: Arc::new(AtomicBool::new(false)),
            stopped: false,
        }))
    }
}

/// Accumulates muxer output and hands it out once per timeslice.
struct ChunkBuffer {
    pending: BytesMut,
    timeslice: Duration,
    last_flush: Instant,
    events: RecorderEventSender,
    holding: bool,
}

impl ChunkBuffer {
    fn new(events: RecorderEventSender) -> Self {
        Self {
            pending: BytesMut::new(),
            timeslice: Duration::from_secs(1),
            last_flush: Instant::now(),
            events,
            holding: false,
        }
    }

    fn begin(&mut self, timeslice: Duration) {
        self.timeslice = timeslice;
        self.last_flush = Instant::now();
        self.holding = false;
    }

    /// Keep everything from now on for [`Self::take`], so output produced
    /// while finalizing is returned by `stop` instead of sent.
    fn hold(&mut self) {
        self.holding = true;
    }

    fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        if !self.holding && self.last_flush.elapsed() >= self.timeslice {
            if let Some(chunk) = self.take() {
                // A closed receiver means the session is gone; nothing to do.
                let _ = self.events.send(RecorderEvent::Data(chunk));
            }
            self.last_flush = Instant::now();
        }
    }

    fn take(&mut self) -> Option<Bytes> {
        (!self.pending.is_empty()).then(|| self.pending.split().freeze())
    }
}

struct CanvasInput {
    src: gst_app::AppSrc,
    frames: FrameReceiver,
    frame_rate: u32,
    feeder: Option<tokio::task::JoinHandle<()>>,
}

pub struct GstRecorder {
    pipeline: GstPipeline,
    source: MediaSource,
    chunks: Arc<Mutex<ChunkBuffer>>,
    events: RecorderEventSender,
    canvas: Option<CanvasInput>,
    watcher: Option<BusWatcher>,
    source_lost: Arc<AtomicBool>,
    stopped: bool,
}

impl GstRecorder {
    fn stop_background(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(feeder) = self.canvas.as_mut().and_then(|c| c.feeder.take()) {
            feeder.abort();
        }
    }

    /// A source that ends or fails ends the recorded tracks, which the
    /// session treats as a stop. Other failures abort the recording.
    fn watch(&self) -> Option<BusWatcher> {
        let source = self.source.clone();
        let events = self.events.clone();
        let lost = self.source_lost.clone();
        BusWatcher::spawn(&self.pipeline, move |event| match event {
            BusEvent::SourceEnded { element, error } => {
                match error {
                    Some(error) => {
                        tracing::warn!(%element, %error, "Recorder source lost");
                        lost.store(true, Ordering::SeqCst);
                    }
                    None => tracing::info!(%element, "Recorder source ended"),
                }
                source.stop_all();
            }
            BusEvent::Failed(error) => {
                tracing::error!(%error, "Recorder pipeline failed");
                let _ = events.send(RecorderEvent::Error(error.to_string()));
            }
        })
    }
}

impl Recorder for GstRecorder {
    fn start(&mut self, timeslice: Duration) -> QamrecResult<()> {
        if let Some(canvas) = self.canvas.as_mut() {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                QamrecError::unsupported(format!("canvas recording needs a tokio runtime: {e}"))
            })?;
            canvas.feeder = Some(runtime.spawn(feed_canvas(
                canvas.frames.clone(),
                canvas.src.clone(),
                canvas.frame_rate,
            )));
        }

        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .begin(timeslice);
        if let Err(e) = self.pipeline.set_state_blocking(gst::State::Playing) {
            self.stop_background();
            return Err(e);
        }
        self.watcher = self.watch();
        tracing::info!(timeslice_ms = timeslice.as_millis() as u64, "Recorder started");
        Ok(())
    }

    fn pause(&mut self) -> QamrecResult<()> {
        self.pipeline.set_state(gst::State::Paused)
    }

    fn resume(&mut self) -> QamrecResult<()> {
        self.pipeline.set_state(gst::State::Playing)
    }

    fn stop(&mut self) -> QamrecResult<Vec<Bytes>> {
        if self.stopped {
            return Ok(Vec::new());
        }
        self.stopped = true;
        self.stop_background();
        self.chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hold();

        if self.source_lost.load(Ordering::SeqCst) {
            // An errored pipeline never carries EOS; keep what was muxed.
            tracing::warn!("Recorder source was lost; finalizing without drain");
        } else {
            // Paused live sources will not carry EOS downstream.
            match self.pipeline.set_state(gst::State::Playing) {
                Ok(()) => {
                    if let Some(error) = self.pipeline.drain() {
                        tracing::warn!(%error, "Recorder failed while finalizing; keeping collected data");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Recorder could not resume to finalize"),
            }
        }
        self.pipeline.set_state(gst::State::Null)?;

        let tail = self
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!(tail_bytes = tail.as_ref().map_or(0, Bytes::len), "Recorder stopped");
        Ok(tail.into_iter().collect())
    }
}

impl Drop for GstRecorder {
    fn drop(&mut self) {
        self.stop_background();
    }
}

async fn feed_canvas(mut frames: FrameReceiver, src: gst_app::AppSrc, frame_rate: u32) {
    let interval = Duration::from_nanos(1_000_000_000 / frame_rate.max(1) as u64);
    let mut caps_size = None;
    while frames.changed().await.is_ok() {
        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };
        let size = frame.image.dimensions();
        if caps_size != Some(size) {
            src.set_caps(Some(&rgba_caps(size.0, size.1, frame_rate)));
            caps_size = Some(size);
        }
        if let Err(e) = src.push_buffer(frame_buffer(&frame.image, frame.pts, interval)) {
            tracing::debug!(?e, "Canvas appsrc refused buffer; stopping feed");
            return;
        }
    }
    let _ = src.end_of_stream();
}
