//! Shared GStreamer pipeline plumbing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use image::RgbaImage;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::VideoFrame;

/// How long state changes and EOS drains may take before giving up.
pub const STATE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_gstreamer() -> QamrecResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(QamrecError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether the element factory `name` is registered.
pub fn element_available(name: &str) -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find(name).is_some()
}

/// A named pipeline that is torn down to `Null` when dropped.
pub struct GstPipeline {
    name: String,
    pipeline: gst::Pipeline,
}

impl GstPipeline {
    pub fn from_launch(name: impl Into<String>, launch: &str) -> QamrecResult<Self> {
        init_gstreamer()?;
        let name = name.into();
        tracing::debug!(pipeline = %name, %launch, "Building pipeline");

        let element = gst::parse::launch(launch).map_err(|e| {
            QamrecError::unsupported(format!("Failed to build {name} pipeline: {e}"))
        })?;
        let pipeline = element.dynamic_cast::<gst::Pipeline>().map_err(|_| {
            QamrecError::unsupported(format!("{name} launch string did not produce a pipeline"))
        })?;
        Ok(Self { name, pipeline })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inner(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    pub fn app_sink(&self, element: &str) -> QamrecResult<gst_app::AppSink> {
        self.pipeline
            .by_name(element)
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| {
                QamrecError::unsupported(format!("{}: missing appsink '{element}'", self.name))
            })
    }

    pub fn app_src(&self, element: &str) -> QamrecResult<gst_app::AppSrc> {
        self.pipeline
            .by_name(element)
            .and_then(|e| e.dynamic_cast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| {
                QamrecError::unsupported(format!("{}: missing appsrc '{element}'", self.name))
            })
    }

    pub fn set_state(&self, state: gst::State) -> QamrecResult<()> {
        self.pipeline.set_state(state).map_err(|e| {
            QamrecError::Other(anyhow::anyhow!(
                "Failed to set {} pipeline to {state:?}: {e:?}",
                self.name
            ))
        })?;
        Ok(())
    }

    /// Set `state` and block until it is reached.
    pub fn set_state_blocking(&self, state: gst::State) -> QamrecResult<()> {
        self.set_state(state)?;
        match self
            .pipeline
            .state(gst::ClockTime::from_nseconds(STATE_TIMEOUT.as_nanos() as u64))
        {
            (Ok(_), reached, _) if reached == state => Ok(()),
            (Ok(_), reached, _) => {
                tracing::warn!(pipeline = %self.name, ?reached, wanted = ?state, "State change still pending");
                Ok(())
            }
            (Err(_), _, _) => Err(self.bus_error().unwrap_or_else(|| {
                QamrecError::Other(anyhow::anyhow!(
                    "{} pipeline failed to reach {state:?}",
                    self.name
                ))
            })),
        }
    }

    /// First error message waiting on the bus, if any.
    pub fn bus_error(&self) -> Option<QamrecError> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(e) = msg.view() {
                return Some(map_element_error(&self.name, &e.error()));
            }
        }
        None
    }

    /// Send EOS and wait for it to reach the sinks so muxers can finalize.
    pub fn drain(&self) -> Option<QamrecError> {
        if !self.pipeline.send_event(gst::event::Eos::new()) {
            tracing::warn!(pipeline = %self.name, "Failed to send EOS event; output may be truncated");
            return None;
        }
        self.wait_for_eos()
    }

    /// Wait for an EOS already travelling downstream. Returns the pipeline
    /// error if one arrives first.
    pub fn wait_for_eos(&self) -> Option<QamrecError> {
        let bus = self.pipeline.bus()?;
        let start = Instant::now();
        loop {
            let Some(remaining) = STATE_TIMEOUT.checked_sub(start.elapsed()) else {
                tracing::warn!(pipeline = %self.name, "EOS drain timed out");
                return None;
            };
            let timeout = gst::ClockTime::from_nseconds(remaining.as_nanos() as u64);
            match bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error]) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!(pipeline = %self.name, "EOS received; pipeline drained");
                        return None;
                    }
                    gst::MessageView::Error(e) => {
                        tracing::warn!(pipeline = %self.name, error = %e.error(), "Pipeline error during EOS drain");
                        return Some(map_element_error(&self.name, &e.error()));
                    }
                    _ => {}
                },
                None => {
                    tracing::warn!(pipeline = %self.name, "EOS drain timed out");
                    return None;
                }
            }
        }
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::error!(pipeline = %self.name, ?e, "Failed to set pipeline to Null on drop");
        }
    }
}

/// Application message posted when a source pad carries EOS.
const SOURCE_EOS: &str = "qamrec-source-eos";

/// What a watched pipeline reported on its bus.
#[derive(Debug)]
pub enum BusEvent {
    /// A source element stopped producing, by EOS (`error` is `None`) or
    /// by failing at runtime, e.g. a revoked screencast or unplugged camera.
    SourceEnded {
        element: String,
        error: Option<QamrecError>,
    },
    /// Any other element failed.
    Failed(QamrecError),
}

/// Background thread reporting the first source end or failure of a
/// pipeline. Source EOS is read off the source pads, since a muxing
/// pipeline only posts EOS once every branch has ended.
pub struct BusWatcher {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl BusWatcher {
    pub fn spawn<F>(pipeline: &GstPipeline, mut on_event: F) -> Option<Self>
    where
        F: FnMut(BusEvent) + Send + 'static,
    {
        let bus = pipeline.inner().bus()?;
        let name = pipeline.name().to_string();
        let sources = watch_source_eos(pipeline.inner());
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let thread = std::thread::spawn(move || {
            while flag.load(Ordering::SeqCst) {
                let Some(msg) = bus.timed_pop_filtered(
                    gst::ClockTime::from_mseconds(100),
                    &[gst::MessageType::Error, gst::MessageType::Application],
                ) else {
                    continue;
                };
                let origin = msg.src().map(|s| s.name().to_string());
                let event = match msg.view() {
                    gst::MessageView::Error(e) => classify_error(
                        origin,
                        &sources,
                        map_element_error(&name, &e.error()),
                    ),
                    gst::MessageView::Application(_)
                        if msg.structure().is_some_and(|s| s.has_name(SOURCE_EOS)) =>
                    {
                        BusEvent::SourceEnded {
                            element: origin.unwrap_or_default(),
                            error: None,
                        }
                    }
                    _ => continue,
                };
                if flag.load(Ordering::SeqCst) {
                    tracing::debug!(pipeline = %name, ?event, "Pipeline reported");
                    on_event(event);
                }
                break;
            }
        });
        Some(Self { running, thread })
    }

    /// Stop watching. Nothing is reported after this returns.
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.thread.join().is_err() {
            tracing::warn!("Bus watcher panicked");
        }
    }
}

/// Post [`SOURCE_EOS`] when any source element of `pipeline` pushes EOS.
/// Returns the names of the source elements.
fn watch_source_eos(pipeline: &gst::Pipeline) -> Vec<String> {
    let mut names = Vec::new();
    for element in pipeline.iterate_sources().into_iter().flatten() {
        names.push(element.name().to_string());
        for pad in element.src_pads() {
            let weak = element.downgrade();
            pad.add_probe(gst::PadProbeType::EVENT_DOWNSTREAM, move |_, info| {
                let is_eos = matches!(
                    &info.data,
                    Some(gst::PadProbeData::Event(event)) if event.type_() == gst::EventType::Eos
                );
                if let Some(element) = weak.upgrade().filter(|_| is_eos) {
                    let msg = gst::message::Application::builder(gst::Structure::new_empty(SOURCE_EOS))
                        .src(&element)
                        .build();
                    if element.post_message(msg).is_err() {
                        tracing::debug!(element = %element.name(), "No bus for source EOS");
                    }
                }
                gst::PadProbeReturn::Ok
            });
        }
    }
    names
}

/// Errors posted by a source element mean its input is gone.
fn classify_error(origin: Option<String>, sources: &[String], error: QamrecError) -> BusEvent {
    match origin {
        Some(element) if sources.contains(&element) => BusEvent::SourceEnded {
            element,
            error: Some(error),
        },
        _ => BusEvent::Failed(error),
    }
}

/// Classify an element error so permission and device failures surface as such.
pub fn map_element_error(pipeline: &str, error: &gst::glib::Error) -> QamrecError {
    let message = format!("{pipeline}: {error}");
    if error.matches(gst::ResourceError::NotAuthorized) {
        QamrecError::permission_denied(message)
    } else if error.matches(gst::ResourceError::NotFound)
        || error.matches(gst::ResourceError::OpenRead)
        || error.matches(gst::ResourceError::Busy)
    {
        QamrecError::device_not_found(message)
    } else {
        QamrecError::recording(message)
    }
}

/// Convert an RGBA appsink sample into a frame.
pub fn sample_to_frame(sample: &gst::Sample) -> QamrecResult<VideoFrame> {
    let caps = sample
        .caps()
        .ok_or_else(|| QamrecError::conversion("sample has no caps"))?;
    let structure = caps
        .structure(0)
        .ok_or_else(|| QamrecError::conversion("sample caps have no structure"))?;
    let width = structure
        .get::<i32>("width")
        .map_err(|_| QamrecError::conversion("sample caps have no width"))? as u32;
    let height = structure
        .get::<i32>("height")
        .map_err(|_| QamrecError::conversion("sample caps have no height"))? as u32;

    let buffer = sample
        .buffer()
        .ok_or_else(|| QamrecError::conversion("sample has no buffer"))?;
    let pts = buffer
        .pts()
        .map(|t| Duration::from_nanos(t.nseconds()))
        .unwrap_or_default();
    let map = buffer
        .map_readable()
        .map_err(|_| QamrecError::conversion("failed to map sample buffer"))?;

    let image = RgbaImage::from_raw(width, height, map.as_slice().to_vec()).ok_or_else(|| {
        QamrecError::conversion(format!(
            "buffer of {} bytes does not hold a {width}x{height} RGBA frame",
            map.size()
        ))
    })?;
    Ok(VideoFrame::new(image, pts))
}

/// Build an RGBA buffer for an appsrc.
pub fn frame_buffer(image: &RgbaImage, pts: Duration, duration: Duration) -> gst::Buffer {
    let mut buffer = gst::Buffer::from_mut_slice(image.as_raw().clone());
    if let Some(buffer) = buffer.get_mut() {
        buffer.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos() as u64));
        buffer.set_duration(gst::ClockTime::from_nseconds(duration.as_nanos() as u64));
    }
    buffer
}

pub fn rgba_caps(width: u32, height: u32, frame_rate: u32) -> gst::Caps {
    gst::Caps::builder("video/x-raw")
        .field("format", "RGBA")
        .field("width", width as i32)
        .field("height", height as i32)
        .field("framerate", gst::Fraction::new(frame_rate.max(1) as i32, 1))
        .build()
}

pub fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_errors_end_the_source_and_others_fail() {
        let sources = vec!["pipewiresrc0".to_string()];

        match classify_error(
            Some("pipewiresrc0".into()),
            &sources,
            QamrecError::device_not_found("stream closed"),
        ) {
            BusEvent::SourceEnded { element, error } => {
                assert_eq!(element, "pipewiresrc0");
                assert!(error.is_some());
            }
            other => panic!("expected source end, got {other:?}"),
        }

        assert!(matches!(
            classify_error(Some("vp8enc0".into()), &sources, QamrecError::recording("encoder")),
            BusEvent::Failed(_)
        ));
        assert!(matches!(
            classify_error(None, &sources, QamrecError::recording("no origin")),
            BusEvent::Failed(_)
        ));
    }

    #[test]
    fn quotes_in_paths_are_escaped() {
        assert_eq!(
            escape_path(Path::new("/tmp/a \"b\".webm")),
            "/tmp/a \\\"b\\\".webm"
        );
    }
}
