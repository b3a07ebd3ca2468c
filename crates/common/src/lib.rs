//! Qamrec Common Utilities
//!
//! Shared infrastructure for all Qamrec crates:
//! - Error types and result aliases
//! - Clocks and active-time accounting for capture sessions
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
