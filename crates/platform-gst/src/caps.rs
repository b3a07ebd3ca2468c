//! Format support probing against the GStreamer element registry.

use std::collections::HashMap;
use std::sync::Mutex;

use qamrec_capture_engine::CapabilityQuery;
use qamrec_media_model::FormatDescriptor;

use crate::elements::CodecPlan;
use crate::pipeline::element_available;

/// Reports a MIME type as supported when every element needed to record it
/// is installed. Lookups are cached per element name.
#[derive(Debug, Default)]
pub struct GstCapabilities {
    cache: Mutex<HashMap<&'static str, bool>>,
}

impl GstCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_element(&self, name: &'static str) -> bool {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *cache.entry(name).or_insert_with(|| element_available(name))
    }

    /// Supported MIME types among `candidates`, for diagnostics.
    pub fn supported<'a>(&self, candidates: impl IntoIterator<Item = &'a FormatDescriptor>) -> Vec<&'a FormatDescriptor> {
        candidates
            .into_iter()
            .filter(|f| self.is_type_supported(&f.mime_type))
            .collect()
    }
}

impl CapabilityQuery for GstCapabilities {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        let Some(plan) = FormatDescriptor::parse(mime_type).and_then(|f| CodecPlan::for_format(&f)) else {
            return false;
        };
        let supported = plan.required_elements().into_iter().all(|e| self.has_element(e));
        tracing::debug!(mime_type, supported, "Checked recording format");
        supported
    }
}
