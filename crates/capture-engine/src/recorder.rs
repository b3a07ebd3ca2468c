//! Recorder abstraction.
//!
//! A recorder turns a live [`MediaSource`] into muxed chunks of the
//! negotiated container. Chunks are delivered asynchronously through an
//! event channel at each timeslice boundary; the session owns the receiving
//! end and the recorder only ever sends.

use std::time::Duration;

use bytes::Bytes;
use qamrec_common::config::CaptureDefaults;
use qamrec_common::error::QamrecResult;
use qamrec_media_model::{FormatDescriptor, MediaSource};
use tokio::sync::mpsc;

/// Asynchronous output of a running recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A muxed chunk, in emission order.
    Data(Bytes),
    /// Internal failure; the recorder is unusable afterwards.
    Error(String),
}

pub type RecorderEventSender = mpsc::UnboundedSender<RecorderEvent>;
pub type RecorderEventReceiver = mpsc::UnboundedReceiver<RecorderEvent>;

/// Encoder parameters handed to the recorder factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderOptions {
    pub timeslice: Duration,
    pub audio_bits_per_second: u32,
    pub video_bits_per_second: u32,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self::from(&CaptureDefaults::default())
    }
}

impl From<&CaptureDefaults> for RecorderOptions {
    fn from(d: &CaptureDefaults) -> Self {
        Self {
            timeslice: Duration::from_millis(d.timeslice_ms),
            audio_bits_per_second: d.audio_bits_per_second,
            video_bits_per_second: d.video_bits_per_second,
        }
    }
}

/// A live recorder bound to one source.
pub trait Recorder: Send {
    /// Begin emitting chunks every `timeslice`.
    fn start(&mut self, timeslice: Duration) -> QamrecResult<()>;

    fn pause(&mut self) -> QamrecResult<()>;

    fn resume(&mut self) -> QamrecResult<()>;

    /// Stop and flush. Returns any trailing chunks produced by the flush
    /// that were not already sent on the event channel.
    fn stop(&mut self) -> QamrecResult<Vec<Bytes>>;
}

/// Constructs recorders for a negotiated format.
pub trait RecorderFactory: Send + Sync {
    fn create(
        &self,
        source: &MediaSource,
        format: &FormatDescriptor,
        options: &RecorderOptions,
        events: RecorderEventSender,
    ) -> QamrecResult<Box<dyn Recorder>>;
}
