//! Finished recordings and download naming.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone};

use crate::format::FormatDescriptor;

/// A finished recording: the muxed payload plus its metadata.
///
/// Artifacts are immutable. The payload is reference counted, so clones are
/// cheap and the backing memory is released when the last clone is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    pub payload: Bytes,
    pub format: FormatDescriptor,
    /// Active recording time, excluding pauses.
    pub duration: Duration,
}

impl RecordingArtifact {
    pub fn new(payload: Bytes, format: FormatDescriptor, duration: Duration) -> Self {
        Self {
            payload,
            format,
            duration,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Suggested file name for saving this artifact.
    pub fn suggested_filename<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        generate_filename("recording", self.format.container.extension(), at)
    }
}

/// `{prefix}-YYYY-MM-DD_HH-MM-SS.{extension}`
pub fn generate_filename<Tz: TimeZone>(prefix: &str, extension: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{prefix}-{}.{extension}", at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Human-readable size with up to two decimals, e.g. `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}
