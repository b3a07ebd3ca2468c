//! Live picture-in-picture compositor.
//!
//! Two input sources are decoded into surfaces. A render loop running at
//! the display refresh rate draws the primary over the whole canvas and the
//! secondary into a rounded inset, and publishes the canvas to an output
//! track at a fixed capture frame rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use qamrec_common::clock::{Clock, MonotonicClock, RateController};
use qamrec_common::config::CaptureDefaults;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{
    frame_channel, FrameSender, MediaSource, MediaTrack, PipLayout, TrackKind, TrackOrigin,
    TrackSettings, VideoFrame,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::draw::{
    draw_full, draw_rounded_inset, stroke_rounded_rect, INSET_BORDER_COLOR, INSET_BORDER_WIDTH,
};

/// Off-screen decoder for one live source.
pub trait DecodeSurface: Send {
    /// Begin decoding. Frames become available some time later.
    fn start(&mut self) -> QamrecResult<()>;

    /// Most recently decoded frame, if any has arrived yet.
    fn current_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Native video size once the stream has reported it.
    fn native_size(&self) -> Option<(u32, u32)>;

    /// Stop decoding and free the surface. Must tolerate repeated calls.
    fn release(&mut self);
}

pub trait SurfaceFactory: Send + Sync {
    fn open(&self, source: &MediaSource) -> QamrecResult<Box<dyn DecodeSurface>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderConfig {
    /// Render loop rate, standing in for the display refresh.
    pub refresh_hz: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self::from(&CaptureDefaults::default())
    }
}

impl From<&CaptureDefaults> for RenderConfig {
    fn from(d: &CaptureDefaults) -> Self {
        Self {
            refresh_hz: d.refresh_hz.max(1),
        }
    }
}

/// Per-merge drawing state. Owns both surfaces and releases them on drop.
pub struct MergeRenderer {
    primary: Box<dyn DecodeSurface>,
    secondary: Box<dyn DecodeSurface>,
    secondary_started: bool,
    layout: PipLayout,
    primary_size: Option<(u32, u32)>,
    canvas: Option<RgbaImage>,
    rate: RateController,
    first_publish_ns: Option<u64>,
    output: FrameSender,
}

impl MergeRenderer {
    pub fn new(
        primary: Box<dyn DecodeSurface>,
        secondary: Box<dyn DecodeSurface>,
        layout: PipLayout,
        primary_size: Option<(u32, u32)>,
        frame_rate: u32,
        output: FrameSender,
    ) -> Self {
        Self {
            primary,
            secondary,
            secondary_started: false,
            layout,
            primary_size,
            canvas: None,
            rate: RateController::new(frame_rate),
            first_publish_ns: None,
            output,
        }
    }

    pub fn start(&mut self) -> QamrecResult<()> {
        self.primary.start()
    }

    /// Canvas dimensions, fixed at the first primary frame.
    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        self.canvas.as_ref().map(RgbaImage::dimensions)
    }

    /// Draw one refresh tick. Returns whether a frame was published.
    pub fn render_tick(&mut self, now_ns: u64) -> QamrecResult<bool> {
        let Some(primary) = self.primary.current_frame() else {
            return Ok(false);
        };

        if !self.secondary_started {
            self.secondary_started = true;
            self.secondary.start()?;
            tracing::debug!("Primary surface ready; starting overlay surface");
        }

        let (width, height) = self
            .primary_size
            .or_else(|| self.primary.native_size())
            .unwrap_or((primary.width(), primary.height()));
        let canvas = self.canvas.get_or_insert_with(|| {
            tracing::info!(width, height, "Compositor canvas sized");
            RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
        });

        draw_full(canvas, &primary.image);
        if let Some(overlay) = self.secondary.current_frame() {
            let rect = self.layout.place(canvas.width(), canvas.height());
            draw_rounded_inset(canvas, &overlay.image, &rect);
            stroke_rounded_rect(canvas, &rect, INSET_BORDER_WIDTH, INSET_BORDER_COLOR);
        }

        if !self.rate.should_tick(now_ns) {
            return Ok(false);
        }
        let origin = *self.first_publish_ns.get_or_insert(now_ns);
        let frame = VideoFrame::new(canvas.clone(), Duration::from_nanos(now_ns - origin));
        self.output.send_replace(Some(Arc::new(frame)));
        Ok(true)
    }
}

impl Drop for MergeRenderer {
    fn drop(&mut self) {
        self.primary.release();
        self.secondary.release();
    }
}

type SharedRenderer = Arc<Mutex<Option<MergeRenderer>>>;

struct ActiveMerge {
    renderer: SharedRenderer,
    task: JoinHandle<()>,
    canvas_track: MediaTrack,
}

static CANVAS_IDS: AtomicU64 = AtomicU64::new(1);

/// Merges two live sources into one canvas-backed source.
///
/// At most one merge is active per compositor; starting a new one stops
/// the previous loop and releases its surfaces first.
pub struct Compositor {
    factory: Arc<dyn SurfaceFactory>,
    config: RenderConfig,
    clock: Arc<dyn Clock>,
    active: Option<ActiveMerge>,
}

impl Compositor {
    pub fn new(factory: Arc<dyn SurfaceFactory>, config: RenderConfig) -> Self {
        Self {
            factory,
            config,
            clock: Arc::new(MonotonicClock::new()),
            active: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_merging(&self) -> bool {
        self.active.is_some()
    }

    /// Start compositing `secondary` over `primary`.
    ///
    /// The returned source carries the canvas video track followed by every
    /// audio track of `primary` and then `secondary`, unmodified. Must be
    /// called from within a tokio runtime.
    pub fn merge(
        &mut self,
        primary: &MediaSource,
        secondary: &MediaSource,
        layout: PipLayout,
        frame_rate: u32,
    ) -> QamrecResult<MediaSource> {
        self.stop_merging();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| QamrecError::unsupported(format!("compositor needs a tokio runtime: {e}")))?;

        let primary_size = primary
            .first_video()
            .and_then(|track| track.settings().dimensions());
        let (output, frames) = frame_channel();
        let mut renderer = MergeRenderer::new(
            self.factory.open(primary)?,
            self.factory.open(secondary)?,
            layout,
            primary_size,
            frame_rate,
            output,
        );
        renderer.start()?;

        let canvas_track = MediaTrack::new(
            format!("canvas-{}", CANVAS_IDS.fetch_add(1, Ordering::Relaxed)),
            TrackKind::Video,
            "Picture-in-picture canvas",
            TrackSettings {
                width: primary_size.map(|(w, _)| w),
                height: primary_size.map(|(_, h)| h),
                frame_rate: Some(frame_rate),
            },
            TrackOrigin::Canvas(frames),
        );

        let mut merged = MediaSource::new(vec![canvas_track.clone()]);
        for track in primary.audio_tracks().chain(secondary.audio_tracks()) {
            merged.add_track(track.clone());
        }

        let renderer: SharedRenderer = Arc::new(Mutex::new(Some(renderer)));
        let task = runtime.spawn(render_loop(
            renderer.clone(),
            self.clock.clone(),
            self.config.refresh_hz,
            canvas_track.clone(),
        ));

        tracing::info!(
            frame_rate,
            refresh_hz = self.config.refresh_hz,
            audio_tracks = merged.audio_tracks().count(),
            "Compositor started"
        );
        self.active = Some(ActiveMerge {
            renderer,
            task,
            canvas_track,
        });
        Ok(merged)
    }

    /// Cancel the render loop and release both surfaces.
    pub fn stop_merging(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.task.abort();
        let renderer = active
            .renderer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(renderer);
        active.canvas_track.stop();
        tracing::info!("Compositor stopped");
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.stop_merging();
    }
}

async fn render_loop(
    renderer: SharedRenderer,
    clock: Arc<dyn Clock>,
    refresh_hz: u32,
    canvas_track: MediaTrack,
) {
    let period = Duration::from_nanos(1_000_000_000 / refresh_hz.max(1) as u64);
    let mut refresh = tokio::time::interval(period);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        refresh.tick().await;
        if canvas_track.is_ended() {
            break;
        }

        let mut guard = renderer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = guard.as_mut() else {
            break;
        };
        if let Err(e) = active.render_tick(clock.now_ns()) {
            tracing::error!(error = %e, "Compositor render failed");
            guard.take();
            drop(guard);
            canvas_track.stop();
            break;
        }
    }
    tracing::debug!("Render loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use qamrec_common::clock::ManualClock;
    use std::sync::atomic::AtomicBool;

    struct StaticSurface {
        frame: Option<Arc<VideoFrame>>,
        started: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl StaticSurface {
        fn solid(w: u32, h: u32, color: [u8; 4]) -> (Box<Self>, Arc<AtomicBool>, Arc<AtomicBool>) {
            let started = Arc::new(AtomicBool::new(false));
            let released = Arc::new(AtomicBool::new(false));
            let frame = VideoFrame::new(RgbaImage::from_pixel(w, h, Rgba(color)), Duration::ZERO);
            let surface = Box::new(Self {
                frame: Some(Arc::new(frame)),
                started: started.clone(),
                released: released.clone(),
            });
            (surface, started, released)
        }
    }

    impl DecodeSurface for StaticSurface {
        fn start(&mut self) -> QamrecResult<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn current_frame(&self) -> Option<Arc<VideoFrame>> {
            self.started
                .load(Ordering::SeqCst)
                .then(|| self.frame.clone())
                .flatten()
        }

        fn native_size(&self) -> Option<(u32, u32)> {
            None
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn publishes_at_capture_rate_not_refresh_rate() {
        let clock = ManualClock::new();
        let (primary, _, _) = StaticSurface::solid(64, 48, [0, 0, 255, 255]);
        let (secondary, overlay_started, _) = StaticSurface::solid(8, 8, [255, 0, 0, 255]);
        let (tx, rx) = frame_channel();
        let layout = PipLayout::new(16, 16, 4, 4, 3);
        let mut renderer = MergeRenderer::new(primary, secondary, layout, None, 30, tx);

        assert!(!overlay_started.load(Ordering::SeqCst));
        renderer.start().unwrap();

        // One second of 100Hz refresh ticks.
        let mut published = 0;
        for _ in 0..100 {
            if renderer.render_tick(clock.now_ns()).unwrap() {
                published += 1;
            }
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(published, 30);
        assert!(overlay_started.load(Ordering::SeqCst));
        assert_eq!(renderer.canvas_size(), Some((64, 48)));

        let frame = rx.borrow().clone().unwrap();
        // Inset occupies (44, 28)..(60, 44).
        assert_eq!(frame.image.get_pixel(52, 36), &Rgba([255, 0, 0, 255]));
        assert_eq!(frame.image.get_pixel(2, 2), &Rgba([0, 0, 255, 255]));
        // Rounded corner is clipped; only the border tint lands there.
        assert_ne!(frame.image.get_pixel(44, 28).0[0], 255);
    }

    #[test]
    fn dropping_renderer_releases_both_surfaces() {
        let (primary, _, primary_released) = StaticSurface::solid(4, 4, [0, 0, 0, 255]);
        let (secondary, _, secondary_released) = StaticSurface::solid(4, 4, [0, 0, 0, 255]);
        let (tx, _rx) = frame_channel();
        drop(MergeRenderer::new(primary, secondary, PipLayout::default(), None, 30, tx));

        assert!(primary_released.load(Ordering::SeqCst));
        assert!(secondary_released.load(Ordering::SeqCst));
    }
}
