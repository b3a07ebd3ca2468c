//! Target resolutions for conversion.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Output size request for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the source dimensions.
    #[default]
    Original,
    /// Limit the longer edge to this many pixels.
    MaxEdge(u32),
}

impl Resolution {
    /// Build a long-edge limit; zero is not a valid target.
    pub fn max_edge(pixels: u32) -> Option<Self> {
        (pixels > 0).then_some(Self::MaxEdge(pixels))
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Self::Original)
    }

    /// Output dimensions for a `width`×`height` source.
    ///
    /// The longer edge is scaled down to the target, the shorter edge
    /// follows proportionally, and both are floored. Sources already
    /// within the target are returned unchanged.
    pub fn scale(&self, width: u32, height: u32) -> (u32, u32) {
        let target = match *self {
            Self::Original => return (width, height),
            Self::MaxEdge(target) => target,
        };
        let long = width.max(height);
        if long <= target {
            return (width, height);
        }
        let scaled = |edge: u32| ((edge as u64 * target as u64) / long as u64).max(1) as u32;
        (scaled(width), scaled(height))
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "original" {
            return Ok(Self::Original);
        }
        let digits = s.strip_suffix('p').unwrap_or(&s);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Self::max_edge)
            .ok_or_else(|| format!("invalid resolution '{s}' (expected original, 1080, 720, 480, ...)"))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::MaxEdge(px) => write!(f, "{px}p"),
        }
    }
}
