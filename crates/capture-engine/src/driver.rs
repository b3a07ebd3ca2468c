//! Async driver for a [`CaptureSession`].
//!
//! The driver owns the session for the duration of a recording and
//! multiplexes four inputs onto it: recorder events, the elapsed-time
//! ticker, track-ended signals and user commands.

use qamrec_common::error::{QamrecError, QamrecResult};
use qamrec_media_model::{MediaSource, MediaTrack, RecordingArtifact};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::recorder::RecorderEventReceiver;
use crate::session::CaptureSession;

/// User-issued control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Pause,
    Resume,
    Stop,
}

/// Cloneable remote control for a running driver.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionControl {
    /// Returns false once the driver has finished.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.send(SessionCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(SessionCommand::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send(SessionCommand::Stop)
    }
}

pub struct SessionDriver {
    session: CaptureSession,
    events: RecorderEventReceiver,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    end_tracks: Vec<MediaTrack>,
}

impl SessionDriver {
    /// Take ownership of `session` and its recorder event stream.
    pub fn new(mut session: CaptureSession) -> QamrecResult<(Self, SessionControl)> {
        let events = session
            .take_event_receiver()
            .ok_or_else(|| QamrecError::recording("session events are already being pumped"))?;
        let (tx, commands) = mpsc::unbounded_channel();
        Ok((
            Self {
                session,
                events,
                commands,
                end_tracks: Vec::new(),
            },
            SessionControl { tx },
        ))
    }

    /// Also stop when `track` ends, for tracks that feed the recording
    /// indirectly, e.g. the screen behind a composited canvas.
    pub fn stop_when_ended(mut self, track: &MediaTrack) -> Self {
        self.end_tracks.push(track.clone());
        self
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Start recording `source` and run until stopped.
    ///
    /// Resolves to the artifact on a normal stop (command, dropped control
    /// handles, or an ended track of `source` or of [`Self::stop_when_ended`])
    /// and to the error on start or recording failure.
    pub async fn run(self, source: MediaSource) -> QamrecResult<Option<RecordingArtifact>> {
        let Self {
            session,
            mut events,
            mut commands,
            end_tracks,
        } = self;

        let mut ended = JoinSet::new();
        for track in source.tracks().iter().chain(&end_tracks) {
            let mut signal = track.ended();
            let label = track.label().to_string();
            ended.spawn(async move {
                let fired = signal.wait_for(|ended| *ended).await.is_ok();
                fired.then_some(label)
            });
        }

        let mut session = blocking(move || {
            let mut session = session;
            session.start(source)?;
            Ok(session)
        })
        .await?;

        let mut ticker = tokio::time::interval(session.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    session.handle_recorder_event(event)?;
                }
                _ = ticker.tick() => session.tick(),
                Some(Ok(Some(track))) = ended.join_next() => {
                    tracing::info!(%track, "Captured track ended; stopping");
                    return finish(session, events).await;
                }
                command = commands.recv() => match command {
                    Some(SessionCommand::Pause) => session.pause()?,
                    Some(SessionCommand::Resume) => session.resume()?,
                    Some(SessionCommand::Stop) | None => return finish(session, events).await,
                },
            }
        }
    }
}

async fn finish(
    mut session: CaptureSession,
    mut events: RecorderEventReceiver,
) -> QamrecResult<Option<RecordingArtifact>> {
    blocking(move || session.stop_with(&mut events)).await
}

/// Recorder start and stop wait on the media pipeline.
async fn blocking<T, F>(f: F) -> QamrecResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> QamrecResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QamrecError::recording(format!("session task failed: {e}")))?
}
