//! Recording session management.
//!
//! [`CaptureSession`] is a synchronous state machine. It never waits on
//! anything itself: recorder output arrives as [`RecorderEvent`]s, elapsed
//! time is published on [`CaptureSession::tick`], and track-ended signals
//! are forwarded through [`CaptureSession::on_track_ended`]. The async
//! [`crate::driver::SessionDriver`] wires those inputs to real time.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use qamrec_common::clock::{ActiveTimer, Clock, MonotonicClock};
use qamrec_common::config::CaptureDefaults;
use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{FormatDescriptor, FormatPreferences, MediaSource, RecordingArtifact};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::negotiator::{CapabilityQuery, FormatNegotiator};
use crate::notifier::{LifecycleEvent, LifecycleNotifier, NullNotifier};
use crate::recorder::{
    Recorder, RecorderEvent, RecorderEventReceiver, RecorderEventSender, RecorderFactory,
    RecorderOptions,
};

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSessionState {
    /// Not recording. Initial state, and the state after a failure.
    Idle,
    Recording,
    Paused,
    /// Terminal; the artifact has been delivered.
    Stopped,
}

impl CaptureSessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub state: CaptureSessionState,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub format: FormatDescriptor,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Observer of session progress.
pub trait SessionListener: Send + Sync {
    /// Active (non-paused) recording time, republished every tick.
    fn on_elapsed(&self, _elapsed: Duration) {}

    /// Fired exactly once per session, on normal stop.
    fn on_complete(&self, _artifact: &RecordingArtifact) {}

    fn on_error(&self, _error: &QamrecError) {}
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub preferences: FormatPreferences,
    pub recorder: RecorderOptions,
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&CaptureDefaults::default())
    }
}

impl From<&CaptureDefaults> for SessionConfig {
    fn from(d: &CaptureDefaults) -> Self {
        Self {
            preferences: FormatPreferences::recorder_defaults(d.prefer_mp4),
            recorder: RecorderOptions::from(d),
            tick_interval: Duration::from_millis(d.tick_interval_ms.max(1)),
        }
    }
}

/// One recording attempt: owns at most one recorder and the stream it records.
pub struct CaptureSession {
    format: FormatDescriptor,
    config: SessionConfig,
    factory: Arc<dyn RecorderFactory>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn LifecycleNotifier>,
    listeners: Vec<Arc<dyn SessionListener>>,
    state: CaptureSessionState,
    recorder: Option<Box<dyn Recorder>>,
    source: Option<MediaSource>,
    chunks: Vec<Bytes>,
    timer: ActiveTimer,
    events_tx: RecorderEventSender,
    events_rx: Option<RecorderEventReceiver>,
}

impl CaptureSession {
    /// Create a session. The recording format is negotiated here and stays
    /// fixed for the lifetime of the session.
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn RecorderFactory>,
        capabilities: &dyn CapabilityQuery,
    ) -> Self {
        let format = FormatNegotiator::new(config.preferences.clone()).negotiate(capabilities);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            format,
            config,
            factory,
            clock: Arc::new(MonotonicClock::new()),
            notifier: Arc::new(NullNotifier),
            listeners: Vec::new(),
            state: CaptureSessionState::Idle,
            recorder: None,
            source: None,
            chunks: Vec::new(),
            timer: ActiveTimer::default(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn LifecycleNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> CaptureSessionState {
        self.state
    }

    /// The negotiated recording format.
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }

    /// Active recording time so far, excluding pauses.
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed(self.clock.now_ns())
    }

    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            state: self.state,
            duration: self.elapsed(),
            format: self.format.clone(),
        }
    }

    /// Hand the recorder event stream to an external pump.
    ///
    /// Once taken, the caller is responsible for feeding every event to
    /// [`Self::handle_recorder_event`] and for stopping through
    /// [`Self::stop_with`].
    pub fn take_event_receiver(&mut self) -> Option<RecorderEventReceiver> {
        self.events_rx.take()
    }

    /// Start recording `source`.
    ///
    /// A no-op unless the session is idle. Recorder construction or start
    /// failures are returned as acquisition errors (permission and device
    /// errors unchanged) and leave the session idle with the source untouched.
    pub fn start(&mut self, source: MediaSource) -> QamrecResult<()> {
        if self.state != CaptureSessionState::Idle {
            tracing::debug!(state = ?self.state, "start ignored");
            return Ok(());
        }

        tracing::info!(
            format = %self.format,
            video_tracks = source.video_tracks().count(),
            audio_tracks = source.audio_tracks().count(),
            "Starting capture session"
        );

        let mut recorder = self
            .factory
            .create(
                &source,
                &self.format,
                &self.config.recorder,
                self.events_tx.clone(),
            )
            .map_err(QamrecError::into_acquisition)?;
        recorder
            .start(self.config.recorder.timeslice)
            .map_err(QamrecError::into_acquisition)?;

        self.recorder = Some(recorder);
        self.source = Some(source);
        self.chunks.clear();
        self.timer.start(self.clock.now_ns());
        self.state = CaptureSessionState::Recording;

        self.notify(LifecycleEvent::started(&self.format));
        self.publish_elapsed(Duration::ZERO);
        Ok(())
    }

    /// Pause recording. A no-op unless recording. A recorder that cannot
    /// pause aborts the session like any other recorder failure.
    pub fn pause(&mut self) -> QamrecResult<()> {
        if self.state != CaptureSessionState::Recording {
            return Ok(());
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.pause() {
                return Err(self.fail(format!("recorder failed to pause: {e}")));
            }
        }
        self.timer.pause(self.clock.now_ns());
        self.state = CaptureSessionState::Paused;

        let elapsed = self.elapsed();
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Recording paused");
        self.notify(LifecycleEvent::Paused {
            duration_ms: elapsed.as_millis() as u64,
        });
        self.publish_elapsed(elapsed);
        Ok(())
    }

    pub fn resume(&mut self) -> QamrecResult<()> {
        if self.state != CaptureSessionState::Paused {
            return Ok(());
        }
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.resume() {
                return Err(self.fail(format!("recorder failed to resume: {e}")));
            }
        }
        self.timer.resume(self.clock.now_ns());
        self.state = CaptureSessionState::Recording;

        let elapsed = self.elapsed();
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Recording resumed");
        self.notify(LifecycleEvent::Resumed {
            duration_ms: elapsed.as_millis() as u64,
        });
        Ok(())
    }

    /// Republish elapsed time. Only publishes while recording.
    pub fn tick(&mut self) {
        if self.state == CaptureSessionState::Recording {
            self.publish_elapsed(self.elapsed());
        }
    }

    /// Feed one recorder event into the session.
    ///
    /// Recorder errors abort the recording: tracks are released, buffered
    /// chunks are discarded, the session returns to idle and the error is
    /// returned (and reported to listeners).
    pub fn handle_recorder_event(&mut self, event: RecorderEvent) -> QamrecResult<()> {
        match event {
            RecorderEvent::Data(chunk) => {
                self.push_chunk(chunk);
                Ok(())
            }
            RecorderEvent::Error(message) if self.state.is_active() => Err(self.fail(message)),
            RecorderEvent::Error(message) => {
                tracing::debug!(%message, state = ?self.state, "Ignoring late recorder error");
                Ok(())
            }
        }
    }

    /// Drain events still queued on the session's own receiver.
    pub fn pump_events(&mut self) -> QamrecResult<()> {
        let mut events = self.events_rx.take();
        let result = self.drain_events(events.as_mut());
        self.events_rx = events;
        result
    }

    /// Stop recording and assemble the artifact.
    ///
    /// Returns `Ok(None)` when there is nothing to stop, which makes repeated
    /// calls harmless: only the first one produces an artifact.
    pub fn stop(&mut self) -> QamrecResult<Option<RecordingArtifact>> {
        let mut events = self.events_rx.take();
        let result = self.finish(events.as_mut());
        self.events_rx = events;
        result
    }

    /// [`Self::stop`] for a session whose event receiver was taken with
    /// [`Self::take_event_receiver`]. Chunks the recorder emits while
    /// flushing are read from `events` and kept in emission order.
    pub fn stop_with(
        &mut self,
        events: &mut RecorderEventReceiver,
    ) -> QamrecResult<Option<RecordingArtifact>> {
        self.finish(Some(events))
    }

    fn finish(
        &mut self,
        mut events: Option<&mut RecorderEventReceiver>,
    ) -> QamrecResult<Option<RecordingArtifact>> {
        if !self.state.is_active() {
            tracing::debug!(state = ?self.state, "stop ignored");
            return Ok(None);
        }

        tracing::info!("Stopping capture session");
        self.timer.pause(self.clock.now_ns());
        self.drain_events(events.as_deref_mut())?;

        let trailing = match self.recorder.take() {
            Some(mut recorder) => match recorder.stop() {
                Ok(trailing) => trailing,
                Err(e) => return Err(self.fail(format!("recorder failed to finalize: {e}"))),
            },
            None => Vec::new(),
        };
        // Chunks sent during the flush come before what the recorder still held.
        self.drain_events(events.as_deref_mut())?;
        for chunk in trailing {
            self.push_chunk(chunk);
        }

        if let Some(source) = self.source.take() {
            source.stop_all();
        }

        let total: usize = self.chunks.iter().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            payload.extend_from_slice(&chunk);
        }

        let duration = self.elapsed();
        let artifact = RecordingArtifact::new(payload.freeze(), self.format.clone(), duration);
        self.state = CaptureSessionState::Stopped;

        tracing::info!(
            duration_ms = duration.as_millis() as u64,
            size_bytes = artifact.size_bytes(),
            format = %artifact.format,
            "Recording stopped"
        );

        for listener in &self.listeners {
            listener.on_complete(&artifact);
        }
        self.notify(LifecycleEvent::Stopped {
            duration_ms: duration.as_millis() as u64,
            size_bytes: artifact.size_bytes(),
            format: artifact.format.mime_type.clone(),
        });

        Ok(Some(artifact))
    }

    /// A track of the recorded stream ended outside our control.
    pub fn on_track_ended(&mut self) -> QamrecResult<Option<RecordingArtifact>> {
        if self.state.is_active() {
            tracing::info!("Captured track ended; stopping");
        }
        self.stop()
    }

    fn drain_events(&mut self, events: Option<&mut RecorderEventReceiver>) -> QamrecResult<()> {
        let Some(rx) = events else {
            return Ok(());
        };
        while let Ok(event) = rx.try_recv() {
            if let Err(e) = self.handle_recorder_event(event) {
                // Whatever the failed recorder still queued must not leak into a later start.
                while rx.try_recv().is_ok() {}
                return Err(e);
            }
        }
        Ok(())
    }

    fn push_chunk(&mut self, chunk: Bytes) {
        if !self.state.is_active() {
            tracing::trace!(len = chunk.len(), state = ?self.state, "Dropping chunk outside recording");
            return;
        }
        if chunk.is_empty() {
            return;
        }
        self.chunks.push(chunk);
    }

    fn fail(&mut self, message: String) -> QamrecError {
        tracing::error!(%message, "Recording failed");

        if let Some(mut recorder) = self.recorder.take() {
            if let Err(e) = recorder.stop() {
                tracing::debug!(error = %e, "Recorder stop after failure");
            }
        }
        if let Some(source) = self.source.take() {
            source.stop_all();
        }
        if let Some(rx) = self.events_rx.as_mut() {
            while rx.try_recv().is_ok() {}
        }
        self.chunks.clear();
        self.timer = ActiveTimer::default();
        self.state = CaptureSessionState::Idle;

        let error = QamrecError::recording(message);
        for listener in &self.listeners {
            listener.on_error(&error);
        }
        error
    }

    fn publish_elapsed(&self, elapsed: Duration) {
        for listener in &self.listeners {
            listener.on_elapsed(elapsed);
        }
    }

    fn notify(&self, event: LifecycleEvent) {
        if let Err(e) = self.notifier.notify(&event) {
            tracing::warn!(error = %e, ?event, "Lifecycle notification failed");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            tracing::warn!(state = ?self.state, "Capture session dropped while recording; discarding");
            if let Err(e) = recorder.stop() {
                tracing::warn!(error = %e, "Recorder did not stop cleanly");
            }
        }
        if let Some(source) = self.source.take() {
            source.stop_all();
        }
    }
}
