//! Container/codec negotiation.

use qamrec_media_model::{FormatDescriptor, FormatPreferences};

/// Runtime capability lookup, e.g. a muxer/encoder registry lookup.
pub trait CapabilityQuery {
    fn is_type_supported(&self, mime_type: &str) -> bool;
}

impl<F> CapabilityQuery for F
where
    F: Fn(&str) -> bool,
{
    fn is_type_supported(&self, mime_type: &str) -> bool {
        self(mime_type)
    }
}

/// Picks the best supported format from ordered preferences.
#[derive(Debug, Clone, Default)]
pub struct FormatNegotiator {
    preferences: FormatPreferences,
}

impl FormatNegotiator {
    pub fn new(preferences: FormatPreferences) -> Self {
        Self { preferences }
    }

    pub fn preferences(&self) -> &FormatPreferences {
        &self.preferences
    }

    /// First supported preferred descriptor, then first supported baseline
    /// descriptor, then the generic baseline member. Never fails.
    pub fn negotiate(&self, capabilities: &dyn CapabilityQuery) -> FormatDescriptor {
        let chosen = self
            .preferences
            .preferred
            .iter()
            .chain(self.preferences.baseline.iter())
            .find(|candidate| capabilities.is_type_supported(&candidate.mime_type))
            .cloned();

        match chosen {
            Some(format) => {
                tracing::debug!(format = %format, "Negotiated recording format");
                format
            }
            None => {
                let fallback = self.preferences.fallback();
                tracing::warn!(format = %fallback, "No supported recording format; using fallback");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qamrec_media_model::Container;

    #[test]
    fn prefers_mp4_when_supported() {
        let negotiator = FormatNegotiator::default();
        let format = negotiator.negotiate(&|_: &str| true);
        assert_eq!(format.mime_type, "video/mp4;codecs=avc1.42E01E,mp4a.40.2");
    }

    #[test]
    fn falls_through_to_first_supported_webm() {
        let negotiator = FormatNegotiator::default();
        let supported = |m: &str| m == "video/webm;codecs=vp8,opus" || m == "video/webm";
        let format = negotiator.negotiate(&supported);
        assert_eq!(format.mime_type, "video/webm;codecs=vp8,opus");
    }

    #[test]
    fn nothing_supported_yields_generic_webm() {
        let negotiator = FormatNegotiator::default();
        let format = negotiator.negotiate(&|_: &str| false);
        assert_eq!(format, FormatDescriptor::generic(Container::Webm));
    }

    #[test]
    fn mp4_skipped_when_not_preferred() {
        let negotiator = FormatNegotiator::new(FormatPreferences::recorder_defaults(false));
        let format = negotiator.negotiate(&|_: &str| true);
        assert_eq!(format.mime_type, "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn negotiation_is_deterministic() {
        let negotiator = FormatNegotiator::default();
        let supported = |m: &str| m.starts_with("video/mp4;codecs=avc1");
        let first = negotiator.negotiate(&supported);
        for _ in 0..5 {
            assert_eq!(negotiator.negotiate(&supported), first);
        }
        assert_eq!(first.mime_type, "video/mp4;codecs=avc1.42E01E,mp4a.40.2");
    }
}
