use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;
use qamrec_capture_engine::{
    CaptureSession, CaptureSessionState, ChannelNotifier, LifecycleEvent, Recorder, RecorderEvent,
    RecorderEventSender, RecorderFactory, RecorderOptions, SessionCommand, SessionConfig,
    SessionDriver, SessionListener,
};
use qamrec_common::clock::ManualClock;
use qamrec_common::error::{ErrorKind, QamrecError, QamrecResult};
use qamrec_media_model::{
    FormatDescriptor, MediaSource, MediaTrack, RecordingArtifact, TrackKind, TrackOrigin,
    TrackSettings,
};

#[derive(Default)]
struct RecorderLog {
    started: usize,
    paused: usize,
    resumed: usize,
    stopped: usize,
}

#[derive(Default)]
struct FakeFactory {
    sender: Mutex<Option<RecorderEventSender>>,
    log: Arc<Mutex<RecorderLog>>,
    trailing: Vec<Bytes>,
    /// Sent on the event channel while stopping, as a muxer flushes on EOS.
    flushed: Vec<Bytes>,
    refuse_with: Option<fn() -> QamrecError>,
    fail_pause: bool,
}

impl FakeFactory {
    fn with_trailing(trailing: &[&'static [u8]]) -> Self {
        Self {
            trailing: trailing.iter().map(|b| Bytes::from_static(b)).collect(),
            ..Default::default()
        }
    }

    fn emit(&self, event: RecorderEvent) {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .expect("recorder was created")
            .send(event)
            .unwrap();
    }

    fn data(&self, bytes: &'static [u8]) {
        self.emit(RecorderEvent::Data(Bytes::from_static(bytes)));
    }
}

struct FakeRecorder {
    log: Arc<Mutex<RecorderLog>>,
    events: RecorderEventSender,
    trailing: Vec<Bytes>,
    flushed: Vec<Bytes>,
    fail_pause: bool,
}

impl Recorder for FakeRecorder {
    fn start(&mut self, timeslice: Duration) -> QamrecResult<()> {
        assert_eq!(timeslice, Duration::from_secs(1));
        self.log.lock().unwrap().started += 1;
        Ok(())
    }

    fn pause(&mut self) -> QamrecResult<()> {
        if self.fail_pause {
            return Err(QamrecError::Other(anyhow::anyhow!("pipeline refused PAUSED")));
        }
        self.log.lock().unwrap().paused += 1;
        Ok(())
    }

    fn resume(&mut self) -> QamrecResult<()> {
        self.log.lock().unwrap().resumed += 1;
        Ok(())
    }

    fn stop(&mut self) -> QamrecResult<Vec<Bytes>> {
        self.log.lock().unwrap().stopped += 1;
        for chunk in self.flushed.drain(..) {
            self.events.send(RecorderEvent::Data(chunk)).unwrap();
        }
        Ok(std::mem::take(&mut self.trailing))
    }
}

impl RecorderFactory for FakeFactory {
    fn create(
        &self,
        _source: &MediaSource,
        _format: &FormatDescriptor,
        options: &RecorderOptions,
        events: RecorderEventSender,
    ) -> QamrecResult<Box<dyn Recorder>> {
        assert_eq!(options.audio_bits_per_second, 128_000);
        assert_eq!(options.video_bits_per_second, 2_500_000);
        if let Some(refuse) = self.refuse_with {
            return Err(refuse());
        }
        *self.sender.lock().unwrap() = Some(events.clone());
        Ok(Box::new(FakeRecorder {
            log: self.log.clone(),
            events,
            trailing: self.trailing.clone(),
            flushed: self.flushed.clone(),
            fail_pause: self.fail_pause,
        }))
    }
}

#[derive(Default)]
struct CountingListener {
    completed: AtomicUsize,
    errors: AtomicUsize,
    last_elapsed: Mutex<Option<Duration>>,
}

impl SessionListener for CountingListener {
    fn on_elapsed(&self, elapsed: Duration) {
        *self.last_elapsed.lock().unwrap() = Some(elapsed);
    }

    fn on_complete(&self, _artifact: &RecordingArtifact) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _error: &QamrecError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn screen_source() -> MediaSource {
    MediaSource::new(vec![
        MediaTrack::new(
            "screen",
            TrackKind::Video,
            "Screen",
            TrackSettings::video(1920, 1080, 30),
            TrackOrigin::Opaque,
        ),
        MediaTrack::new(
            "mic",
            TrackKind::Audio,
            "Microphone",
            TrackSettings::default(),
            TrackOrigin::Opaque,
        ),
    ])
}

fn webm_only(mime: &str) -> bool {
    mime.starts_with("video/webm")
}

fn session(
    factory: Arc<FakeFactory>,
    clock: Arc<ManualClock>,
) -> (CaptureSession, Arc<CountingListener>) {
    let listener = Arc::new(CountingListener::default());
    let mut session = CaptureSession::new(SessionConfig::default(), factory, &webm_only)
        .with_clock(clock);
    session.add_listener(listener.clone());
    (session, listener)
}

#[test]
fn five_second_screen_recording_produces_artifact() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::with_trailing(&[b"tail"]));
    let (mut session, listener) = session(factory.clone(), clock.clone());

    assert_eq!(session.format().mime_type, "video/webm;codecs=vp9,opus");
    session.start(screen_source()).unwrap();
    assert_eq!(session.state(), CaptureSessionState::Recording);

    for (second, chunk) in [b"one-" as &[u8], b"two-", b"three-"].into_iter().enumerate() {
        clock.set(Duration::from_secs(second as u64 + 1));
        factory.emit(RecorderEvent::Data(Bytes::copy_from_slice(chunk)));
        session.pump_events().unwrap();
        session.tick();
    }
    clock.set(Duration::from_millis(5000));

    let artifact = session.stop().unwrap().expect("artifact on first stop");
    assert_eq!(artifact.duration, Duration::from_millis(5000));
    assert_eq!(&artifact.payload[..], b"one-two-three-tail");
    assert_eq!(artifact.format.mime_type, "video/webm;codecs=vp9,opus");
    assert_eq!(session.state(), CaptureSessionState::Stopped);
    assert_eq!(listener.completed.load(Ordering::SeqCst), 1);
    assert_eq!(factory.log.lock().unwrap().stopped, 1);
}

#[test]
fn paused_interval_is_excluded_from_duration() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, listener) = session(factory.clone(), clock.clone());

    session.start(screen_source()).unwrap();
    clock.set(Duration::from_millis(2000));
    session.pause().unwrap();
    assert_eq!(session.state(), CaptureSessionState::Paused);

    clock.advance(Duration::from_millis(3000));
    session.tick();
    assert_eq!(
        *listener.last_elapsed.lock().unwrap(),
        Some(Duration::from_millis(2000))
    );

    session.resume().unwrap();
    clock.advance(Duration::from_millis(1000));
    let artifact = session.stop().unwrap().unwrap();
    assert_eq!(artifact.duration, Duration::from_millis(3000));

    let log = factory.log.lock().unwrap();
    assert_eq!((log.paused, log.resumed), (1, 1));
}

#[test]
fn invalid_transitions_are_no_ops() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, _listener) = session(factory.clone(), clock);

    session.pause().unwrap();
    session.resume().unwrap();
    assert_eq!(session.state(), CaptureSessionState::Idle);
    assert!(session.stop().unwrap().is_none());

    session.start(screen_source()).unwrap();
    session.resume().unwrap();
    assert_eq!(session.state(), CaptureSessionState::Recording);
    session.start(screen_source()).unwrap();
    assert_eq!(factory.log.lock().unwrap().started, 1);
}

#[test]
fn stop_is_idempotent() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, listener) = session(factory.clone(), clock);

    session.start(screen_source()).unwrap();
    factory.data(b"chunk");
    assert!(session.stop().unwrap().is_some());
    assert!(session.stop().unwrap().is_none());
    assert!(session.on_track_ended().unwrap().is_none());
    assert_eq!(listener.completed.load(Ordering::SeqCst), 1);
}

#[test]
fn track_ended_is_indistinguishable_from_stop() {
    let run = |end_by_track: bool| {
        let clock = Arc::new(ManualClock::new());
        let factory = Arc::new(FakeFactory::with_trailing(&[b"!"]));
        let (mut session, _listener) = session(factory.clone(), clock.clone());
        let source = screen_source();
        session.start(source.clone()).unwrap();
        factory.data(b"frames");
        clock.advance(Duration::from_millis(1500));
        let artifact = if end_by_track {
            session.on_track_ended()
        } else {
            session.stop()
        }
        .unwrap()
        .unwrap();
        assert!(source.tracks().iter().all(MediaTrack::is_ended));
        (artifact, session.state())
    };

    assert_eq!(run(true), run(false));
}

fn flushing_factory() -> FakeFactory {
    FakeFactory {
        flushed: vec![Bytes::from_static(b"[mid]")],
        trailing: vec![Bytes::from_static(b"[tail]")],
        ..Default::default()
    }
}

#[test]
fn chunks_flushed_while_stopping_keep_emission_order() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(flushing_factory());
    let (mut session, _listener) = session(factory.clone(), clock);

    session.start(screen_source()).unwrap();
    factory.data(b"[head]");
    let artifact = session.stop().unwrap().unwrap();
    assert_eq!(&artifact.payload[..], b"[head][mid][tail]");
}

#[test]
fn late_and_empty_chunks_are_ignored() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, _listener) = session(factory.clone(), clock);

    session.start(screen_source()).unwrap();
    factory.data(b"");
    factory.data(b"kept");
    let artifact = session.stop().unwrap().unwrap();
    assert_eq!(&artifact.payload[..], b"kept");

    session
        .handle_recorder_event(RecorderEvent::Data(Bytes::from_static(b"late")))
        .unwrap();
    session
        .handle_recorder_event(RecorderEvent::Error("late".into()))
        .unwrap();
    assert_eq!(session.state(), CaptureSessionState::Stopped);
}

#[test]
fn recorder_failure_releases_tracks_and_returns_to_idle() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, listener) = session(factory.clone(), clock);
    let source = screen_source();

    session.start(source.clone()).unwrap();
    factory.data(b"partial");
    factory.emit(RecorderEvent::Error("encoder crashed".into()));

    let err = session.pump_events().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recording);
    assert_eq!(session.state(), CaptureSessionState::Idle);
    assert!(source.tracks().iter().all(MediaTrack::is_ended));
    assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
    assert_eq!(listener.completed.load(Ordering::SeqCst), 0);
    assert!(session.stop().unwrap().is_none());

    // A fresh source can be recorded after the failure.
    session.start(screen_source()).unwrap();
    assert_eq!(session.state(), CaptureSessionState::Recording);
}

#[test]
fn recorder_pause_failure_aborts_the_recording() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory {
        fail_pause: true,
        ..Default::default()
    });
    let (mut session, listener) = session(factory.clone(), clock);
    let source = screen_source();

    session.start(source.clone()).unwrap();
    factory.data(b"partial");
    let err = session.pause().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Recording);
    assert_eq!(session.state(), CaptureSessionState::Idle);
    assert!(source.tracks().iter().all(MediaTrack::is_ended));
    assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
    assert_eq!(factory.log.lock().unwrap().stopped, 1);
    assert!(session.stop().unwrap().is_none());
}

#[test]
fn dropping_a_recording_session_releases_recorder_and_tracks() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, _listener) = session(factory.clone(), clock);
    let source = screen_source();

    session.start(source.clone()).unwrap();
    drop(session);

    assert_eq!(factory.log.lock().unwrap().stopped, 1);
    assert!(source.tracks().iter().all(MediaTrack::is_ended));
}

#[test]
fn start_failure_surfaces_permission_error_verbatim() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory {
        refuse_with: Some(|| QamrecError::permission_denied("screen capture refused")),
        ..Default::default()
    });
    let (mut session, _listener) = session(factory, clock);
    let source = screen_source();

    let err = session.start(source.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(session.state(), CaptureSessionState::Idle);
    assert!(!source.tracks()[0].is_ended());
}

#[test]
fn start_failure_from_recorder_is_acquisition_error() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory {
        refuse_with: Some(|| QamrecError::unsupported("no muxer")),
        ..Default::default()
    });
    let (mut session, _listener) = session(factory, clock);
    let err = session.start(screen_source()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Acquisition);
}

#[test]
fn unreachable_notifier_never_blocks_transitions() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (notifier, rx) = ChannelNotifier::channel();
    drop(rx);
    let mut session = CaptureSession::new(SessionConfig::default(), factory, &webm_only)
        .with_clock(clock)
        .with_notifier(Arc::new(notifier));

    session.start(screen_source()).unwrap();
    session.pause().unwrap();
    session.resume().unwrap();
    assert!(session.stop().unwrap().is_some());
}

#[test]
fn notifier_sees_lifecycle_in_order() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (notifier, mut rx) = ChannelNotifier::channel();
    let mut session = CaptureSession::new(SessionConfig::default(), factory, &webm_only)
        .with_clock(clock.clone())
        .with_notifier(Arc::new(notifier));

    session.start(screen_source()).unwrap();
    clock.advance(Duration::from_millis(400));
    session.pause().unwrap();
    session.resume().unwrap();
    session.stop().unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(match event {
            LifecycleEvent::Started { .. } => "start",
            LifecycleEvent::Paused { duration_ms } => {
                assert_eq!(duration_ms, 400);
                "pause"
            }
            LifecycleEvent::Resumed { .. } => "resume",
            LifecycleEvent::Stopped { .. } => "stop",
        });
    }
    assert_eq!(names, vec!["start", "pause", "resume", "stop"]);
}

#[test]
fn status_reports_state_duration_and_format() {
    let clock = Arc::new(ManualClock::new());
    let factory = Arc::new(FakeFactory::default());
    let (mut session, _listener) = session(factory, clock.clone());

    session.start(screen_source()).unwrap();
    clock.advance(Duration::from_millis(1200));
    let status = session.status();
    assert_eq!(status.state, CaptureSessionState::Recording);
    assert_eq!(status.duration, Duration::from_millis(1200));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["state"], "recording");
    assert_eq!(json["duration"], 1200);
}

proptest! {
    #[test]
    fn immediate_pause_resume_leaves_duration_unchanged(
        before_ms in 0u64..10_000,
        cycles in 1usize..8,
    ) {
        let clock = Arc::new(ManualClock::new());
        let factory = Arc::new(FakeFactory::default());
        let (mut session, _listener) = session(factory, clock.clone());

        session.start(screen_source()).unwrap();
        clock.advance(Duration::from_millis(before_ms));
        let before = session.elapsed();
        for _ in 0..cycles {
            session.pause().unwrap();
            session.resume().unwrap();
        }
        prop_assert_eq!(session.elapsed(), before);
    }
}

#[tokio::test]
async fn driver_stops_when_screen_track_ends() {
    let factory = Arc::new(FakeFactory::with_trailing(&[b"-end"]));
    let session = CaptureSession::new(SessionConfig::default(), factory.clone(), &webm_only);
    let source = screen_source();
    let screen = source.first_video().cloned().unwrap();

    let (driver, _control) = SessionDriver::new(session).unwrap();
    let driver = driver.stop_when_ended(&screen);
    let task = tokio::spawn(driver.run(source));

    while factory.sender.lock().unwrap().is_none() {
        tokio::task::yield_now().await;
    }
    factory.data(b"body");
    screen.stop();

    let artifact = task.await.unwrap().unwrap().expect("artifact");
    assert_eq!(&artifact.payload[..], b"body-end");
}

#[tokio::test]
async fn driver_follows_commands() {
    let factory = Arc::new(FakeFactory::default());
    let session = CaptureSession::new(SessionConfig::default(), factory.clone(), &webm_only);
    let (driver, control) = SessionDriver::new(session).unwrap();
    let task = tokio::spawn(driver.run(screen_source()));

    assert!(control.pause());
    assert!(control.resume());
    assert!(control.send(SessionCommand::Stop));

    let artifact = task.await.unwrap().unwrap();
    assert!(artifact.is_some());
    assert!(!control.stop());

    let log = factory.log.lock().unwrap();
    assert_eq!((log.started, log.paused, log.resumed, log.stopped), (1, 1, 1, 1));
}

#[tokio::test]
async fn driver_surfaces_recording_errors() {
    let factory = Arc::new(FakeFactory::default());
    let session = CaptureSession::new(SessionConfig::default(), factory.clone(), &webm_only);
    let (driver, _control) = SessionDriver::new(session).unwrap();
    let task = tokio::spawn(driver.run(screen_source()));

    while factory.sender.lock().unwrap().is_none() {
        tokio::task::yield_now().await;
    }
    factory.emit(RecorderEvent::Error("disk full".into()));

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Recording);
}

#[tokio::test]
async fn driver_keeps_chunks_flushed_while_stopping() {
    let factory = Arc::new(flushing_factory());
    let session = CaptureSession::new(SessionConfig::default(), factory.clone(), &webm_only);
    let (driver, control) = SessionDriver::new(session).unwrap();
    let task = tokio::spawn(driver.run(screen_source()));

    while factory.sender.lock().unwrap().is_none() {
        tokio::task::yield_now().await;
    }
    factory.data(b"[head]");
    control.stop();

    let artifact = task.await.unwrap().unwrap().expect("artifact");
    assert_eq!(&artifact.payload[..], b"[head][mid][tail]");
}

#[tokio::test]
async fn driver_stops_when_any_recorded_track_ends() {
    let factory = Arc::new(FakeFactory::default());
    let session = CaptureSession::new(SessionConfig::default(), factory.clone(), &webm_only);
    let source = screen_source();
    let microphone = source.audio_tracks().next().cloned().unwrap();

    let (driver, _control) = SessionDriver::new(session).unwrap();
    let task = tokio::spawn(driver.run(source));

    while factory.sender.lock().unwrap().is_none() {
        tokio::task::yield_now().await;
    }
    factory.data(b"body");
    microphone.stop();

    let artifact = task.await.unwrap().unwrap().expect("artifact");
    assert_eq!(&artifact.payload[..], b"body");
    assert_eq!(factory.log.lock().unwrap().stopped, 1);
}
