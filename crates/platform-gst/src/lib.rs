//! Qamrec GStreamer Platform
//!
//! GStreamer implementations of the engine collaborators:
//! - **Acquisition:** X11 / PipeWire screen, V4L2 camera, PulseAudio microphone
//! - **Capabilities:** recording format support from the element registry
//! - **Recorder:** muxed chunks streamed out of an `appsink`
//! - **Surfaces:** live frames for the picture-in-picture compositor
//! - **Decoder / Encoder:** accurate seeking and canvas re-encoding for the transcoder

pub mod acquisition;
pub mod caps;
pub mod decoder;
pub mod elements;
pub mod encoder;
pub mod pipeline;
pub mod recorder;
pub mod surface;

pub use acquisition::{detect_display_server, AcquisitionConfig, DisplayServer, GstAcquisition};
pub use caps::GstCapabilities;
pub use decoder::{GstDecoder, GstDecoderFactory};
pub use encoder::{GstEncoder, GstEncoderFactory};
pub use pipeline::init_gstreamer;
pub use recorder::{GstRecorder, GstRecorderFactory};
pub use surface::{GstSurfaceFactory, PipelineSurface};
