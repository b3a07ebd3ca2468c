//! Qamrec Render Engine
//!
//! Pixel work for live compositing and offline conversion.
//!
//! # Live compositing
//!
//! ```text
//! primary source ──► surface ──┐
//!                              ├── draw full canvas ── rounded inset ── border
//! overlay source ──► surface ──┘                                          │
//!                                               rate-limited publish ◄────┘
//!                                                        │
//!                                                        ▼
//!                                     canvas track + original audio tracks
//! ```
//!
//! # Offline conversion
//!
//! ```text
//! artifact ── plan_export ──┬── direct copy
//!                           ├── resample: playback ─► 30fps grid ─► video encoder
//!                           └── animated: seek @15fps ─► quantize ─► GIF
//! ```

pub mod animated;
pub mod compositor;
pub mod draw;
pub mod progress;
pub mod quantize;
pub mod resample;
pub mod transcode;

pub use animated::GifWriter;
pub use compositor::{Compositor, DecodeSurface, MergeRenderer, RenderConfig, SurfaceFactory};
pub use progress::{ProgressCallback, ProgressReporter};
pub use quantize::{quantize, IndexedFrame};
pub use transcode::*;
