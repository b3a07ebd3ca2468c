//! Progress reporting for conversions.

use qamrec_media_model::{ConversionPhase, ConversionProgress};

/// Progress callback for conversions.
pub type ProgressCallback = Box<dyn FnMut(ConversionProgress) + Send>;

/// Wraps an optional callback and keeps the reported sequence well-formed:
/// phases only move forward, and percent never decreases within a phase.
/// Repeated identical reports are suppressed.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    last: Option<ConversionProgress>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    pub fn report(&mut self, phase: ConversionPhase, percent: u8) {
        let mut next = ConversionProgress::new(phase, percent);
        if let Some(last) = self.last {
            if phase < last.phase {
                tracing::trace!(?phase, last = ?last.phase, "Dropping out-of-order progress");
                return;
            }
            if phase == last.phase {
                next.percent = next.percent.max(last.percent);
                if next == last {
                    return;
                }
            }
        }
        self.last = Some(next);
        if let Some(callback) = self.callback.as_mut() {
            callback(next);
        }
    }

    pub fn done(&mut self) {
        self.report(ConversionPhase::Done, 100);
    }

    pub fn last(&self) -> Option<ConversionProgress> {
        self.last
    }
}

/// `round(index / total × span)`, as a whole percentage.
pub fn fraction_percent(index: usize, total: usize, span: u8) -> u8 {
    if total == 0 {
        return 0;
    }
    ((index as f64 / total as f64) * span as f64).round().min(span as f64) as u8
}
