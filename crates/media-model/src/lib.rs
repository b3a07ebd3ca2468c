//! Qamrec Media Model
//!
//! Defines the data contracts shared by the capture and render engines:
//! - **Streams:** Live media sources, their tracks, and decoded video frames
//! - **Formats:** Container/codec descriptors and negotiation preferences
//! - **Layout:** Picture-in-picture inset geometry
//! - **Artifacts:** Finished recordings and download naming
//! - **Conversion:** Target resolutions and progress reports
//!
//! All pixel geometry is expressed in unsigned output-canvas pixels.

pub mod artifact;
pub mod format;
pub mod layout;
pub mod progress;
pub mod resolution;
pub mod stream;

pub use artifact::*;
pub use format::*;
pub use layout::*;
pub use progress::*;
pub use resolution::*;
pub use stream::*;
