//! Live media sources, tracks, and decoded frames.
//!
//! A [`MediaSource`] is a bag of [`MediaTrack`] handles. Tracks are created by
//! the acquisition layer (or the compositor, for its canvas track) and shared
//! by cloning; stopping any clone ends the track for every holder.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tokio::sync::watch;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Capture settings reported by a track, when known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl TrackSettings {
    pub fn video(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
        }
    }

    /// Width and height, if both are known and non-zero.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

/// A single decoded RGBA frame with its presentation time.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbaImage,
    pub pts: Duration,
}

impl VideoFrame {
    pub fn new(image: RgbaImage, pts: Duration) -> Self {
        Self { image, pts }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Receiving end of an in-process frame feed.
pub type FrameReceiver = watch::Receiver<Option<Arc<VideoFrame>>>;

/// Sending end of an in-process frame feed.
pub type FrameSender = watch::Sender<Option<Arc<VideoFrame>>>;

/// Create an empty frame feed.
pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    watch::channel(None)
}

/// Where a track's media actually comes from.
#[derive(Debug, Clone)]
pub enum TrackOrigin {
    /// A platform pipeline fragment producing this track's raw media.
    Launch(String),
    /// Frames pushed in-process, e.g. by the compositor canvas.
    Canvas(FrameReceiver),
    /// Unknown origin; only usable by collaborators that created it.
    Opaque,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    settings: TrackSettings,
    origin: TrackOrigin,
    ended: watch::Sender<bool>,
}

/// Shared handle to one live track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(
        id: impl Into<String>,
        kind: TrackKind,
        label: impl Into<String>,
        settings: TrackSettings,
        origin: TrackOrigin,
    ) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                settings,
                origin,
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn settings(&self) -> TrackSettings {
        self.inner.settings
    }

    pub fn origin(&self) -> &TrackOrigin {
        &self.inner.origin
    }

    /// End the track. Idempotent.
    pub fn stop(&self) {
        let changed = self.inner.ended.send_if_modified(|ended| {
            let changed = !*ended;
            *ended = true;
            changed
        });
        if changed {
            tracing::debug!(track = %self.inner.id, label = %self.inner.label, "Track stopped");
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Subscribe to the ended signal. The value flips to `true` once.
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.inner.ended.subscribe()
    }

    /// Whether two handles refer to the same underlying track.
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A live stream: zero or more video and audio tracks.
#[derive(Debug, Clone, Default)]
pub struct MediaSource {
    tracks: Vec<MediaTrack>,
}

impl MediaSource {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn first_video(&self) -> Option<&MediaTrack> {
        self.video_tracks().next()
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track in the source.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, kind: TrackKind) -> MediaTrack {
        MediaTrack::new(id, kind, id, TrackSettings::default(), TrackOrigin::Opaque)
    }

    #[test]
    fn stopping_a_clone_ends_the_track_everywhere() {
        let a = track("screen", TrackKind::Video);
        let b = a.clone();
        let mut ended = a.ended();
        assert!(!b.is_ended());

        b.stop();
        assert!(a.is_ended());
        assert!(ended.has_changed().unwrap());
        assert!(*ended.borrow_and_update());

        b.stop();
        assert!(!ended.has_changed().unwrap());
    }

    #[test]
    fn source_splits_tracks_by_kind() {
        let mut source = MediaSource::default();
        source.add_track(track("v", TrackKind::Video));
        source.add_track(track("a1", TrackKind::Audio));
        source.add_track(track("a2", TrackKind::Audio));

        assert_eq!(source.video_tracks().count(), 1);
        let audio: Vec<_> = source.audio_tracks().map(|t| t.id().to_string()).collect();
        assert_eq!(audio, vec!["a1", "a2"]);

        source.stop_all();
        assert!(source.tracks().iter().all(MediaTrack::is_ended));
    }

    #[test]
    fn settings_dimensions_require_both_edges() {
        assert_eq!(TrackSettings::video(1280, 720, 30).dimensions(), Some((1280, 720)));
        let partial = TrackSettings {
            width: Some(640),
            ..Default::default()
        };
        assert_eq!(partial.dimensions(), None);
    }
}
