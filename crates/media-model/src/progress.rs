//! Conversion progress reports.

use serde::{Deserialize, Serialize};

/// Stage of a conversion. Ordering follows the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionPhase {
    Extracting,
    Encoding,
    Done,
}

/// A single progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionProgress {
    pub phase: ConversionPhase,
    /// Overall completion in `[0, 100]`.
    pub percent: u8,
}

impl ConversionProgress {
    pub fn new(phase: ConversionPhase, percent: u8) -> Self {
        Self {
            phase,
            percent: percent.min(100),
        }
    }

    pub fn done() -> Self {
        Self::new(ConversionPhase::Done, 100)
    }
}

impl std::fmt::Display for ConversionProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.phase {
            ConversionPhase::Extracting => "extracting",
            ConversionPhase::Encoding => "encoding",
            ConversionPhase::Done => "done",
        };
        write!(f, "{label} {}%", self.percent)
    }
}
