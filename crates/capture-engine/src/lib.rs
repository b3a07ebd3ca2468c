//! Qamrec Capture Engine
//!
//! Records live media sources into a single container payload. The engine
//! negotiates a container/codec once per session, drives an injected
//! recorder through start/pause/resume/stop, accounts active recording time
//! and assembles the emitted chunks into a [`RecordingArtifact`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  SessionDriver                   │
//! │  commands ─┐   ticker ─┐   track ended ─┐        │
//! │            ▼           ▼                ▼        │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │               CaptureSession               │  │
//! │  │  FormatNegotiator   ActiveTimer   chunks   │  │
//! │  └──────┬──────────────────────▲──────────────┘  │
//! │         │ create/start/stop    │ RecorderEvent   │
//! │         ▼                      │                 │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │       Recorder (platform implementation)   │  │
//! │  └────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! [`RecordingArtifact`]: qamrec_media_model::RecordingArtifact

pub mod capture;
pub mod driver;
pub mod negotiator;
pub mod notifier;
pub mod recorder;
pub mod session;

pub use capture::*;
pub use driver::*;
pub use negotiator::*;
pub use notifier::*;
pub use recorder::*;
pub use session::*;
