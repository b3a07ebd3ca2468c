//! Container and codec descriptors.

use serde::{Deserialize, Serialize};

/// Output container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    /// MIME type without codec parameters.
    pub fn base_mime(&self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
        }
    }

    /// Detect the container from a MIME type such as `video/webm;codecs=vp9`.
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let base = mime_type.split(';').next().unwrap_or_default().trim();
        match base.to_ascii_lowercase().as_str() {
            "video/mp4" => Some(Container::Mp4),
            "video/webm" => Some(Container::Webm),
            _ => None,
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// A concrete container/codec combination a recorder can be asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub container: Container,
    pub mime_type: String,
}

impl FormatDescriptor {
    /// Parse a MIME type; returns `None` for unknown containers.
    pub fn parse(mime_type: &str) -> Option<Self> {
        Container::from_mime(mime_type).map(|container| Self {
            container,
            mime_type: mime_type.trim().to_string(),
        })
    }

    /// The most generic descriptor for a container (no codec parameters).
    pub fn generic(container: Container) -> Self {
        Self {
            container,
            mime_type: container.base_mime().to_string(),
        }
    }

    /// Codec identifiers listed in the `codecs=` parameter, in order.
    pub fn codecs(&self) -> Vec<&str> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                (key.trim().eq_ignore_ascii_case("codecs")).then_some(value)
            })
            .flat_map(|value| value.trim().trim_matches('"').split(','))
            .map(str::trim)
            .filter(|codec| !codec.is_empty())
            .collect()
    }
}

impl std::fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mime_type)
    }
}

/// Ordered container/codec preferences used by format negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPreferences {
    /// Tried first, in order.
    pub preferred: Vec<FormatDescriptor>,
    /// Guaranteed-baseline family; its last entry is the unconditional fallback.
    pub baseline: Vec<FormatDescriptor>,
}

const MP4_TYPES: &[&str] = &[
    "video/mp4;codecs=avc1.42E01E,mp4a.40.2",
    "video/mp4;codecs=avc1",
    "video/mp4",
];

const WEBM_TYPES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
];

impl FormatPreferences {
    /// MP4 candidates (when `prefer_mp4`) followed by the WebM baseline.
    pub fn recorder_defaults(prefer_mp4: bool) -> Self {
        let preferred = if prefer_mp4 {
            MP4_TYPES.iter().filter_map(|t| FormatDescriptor::parse(t)).collect()
        } else {
            Vec::new()
        };
        Self {
            preferred,
            baseline: WEBM_TYPES
                .iter()
                .filter_map(|t| FormatDescriptor::parse(t))
                .collect(),
        }
    }

    /// The descriptor returned when nothing at all is supported.
    pub fn fallback(&self) -> FormatDescriptor {
        self.baseline
            .last()
            .cloned()
            .unwrap_or_else(|| FormatDescriptor::generic(Container::Webm))
    }
}

impl Default for FormatPreferences {
    fn default() -> Self {
        Self::recorder_defaults(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codec_list() {
        let format = FormatDescriptor::parse("video/webm;codecs=vp9,opus").unwrap();
        assert_eq!(format.container, Container::Webm);
        assert_eq!(format.codecs(), vec!["vp9", "opus"]);
    }

    #[test]
    fn parses_quoted_codecs_with_spaces() {
        let format = FormatDescriptor::parse(r#"video/mp4; codecs="avc1.42E01E, mp4a.40.2""#)
            .unwrap();
        assert_eq!(format.container, Container::Mp4);
        assert_eq!(format.codecs(), vec!["avc1.42E01E", "mp4a.40.2"]);
    }

    #[test]
    fn generic_descriptor_has_no_codecs() {
        let format = FormatDescriptor::generic(Container::Webm);
        assert_eq!(format.mime_type, "video/webm");
        assert!(format.codecs().is_empty());
    }

    #[test]
    fn unknown_container_is_rejected() {
        assert!(FormatDescriptor::parse("video/x-matroska").is_none());
    }

    #[test]
    fn defaults_put_mp4_first_and_end_on_generic_webm() {
        let prefs = FormatPreferences::default();
        assert_eq!(prefs.preferred.len(), 3);
        assert_eq!(prefs.preferred[0].container, Container::Mp4);
        assert_eq!(prefs.fallback(), FormatDescriptor::generic(Container::Webm));

        let webm_only = FormatPreferences::recorder_defaults(false);
        assert!(webm_only.preferred.is_empty());
        assert_eq!(webm_only.baseline.len(), 5);
    }
}
