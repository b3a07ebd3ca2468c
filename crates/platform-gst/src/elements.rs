//! Element selection and launch-string construction.
//!
//! Everything here is pure string building so it can be tested without a
//! GStreamer installation.

use std::time::Duration;

use qamrec_media_model::{Container, FormatDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp8,
    Vp9,
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Aac,
}

impl VideoCodec {
    fn from_codec_id(id: &str) -> Option<Self> {
        let id = id.to_ascii_lowercase();
        if id.starts_with("vp09") || id.starts_with("vp9") {
            Some(Self::Vp9)
        } else if id.starts_with("vp8") {
            Some(Self::Vp8)
        } else if id.starts_with("avc1") || id.starts_with("h264") {
            Some(Self::H264)
        } else {
            None
        }
    }

    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Vp8 => "vp8enc",
            Self::Vp9 => "vp9enc",
            Self::H264 => "x264enc",
        }
    }

    /// Encoder fragment targeting `bits_per_second`.
    pub fn encoder(&self, bits_per_second: u32, frame_rate: u32) -> String {
        let keyint = frame_rate.saturating_mul(2).max(2);
        match self {
            Self::Vp8 => format!(
                "vp8enc deadline=1 cpu-used=8 target-bitrate={bits_per_second} keyframe-max-dist={keyint}"
            ),
            Self::Vp9 => format!(
                "vp9enc deadline=1 cpu-used=8 row-mt=true target-bitrate={bits_per_second} keyframe-max-dist={keyint}"
            ),
            Self::H264 => format!(
                "x264enc tune=zerolatency speed-preset=veryfast bitrate={} key-int-max={keyint} ! h264parse",
                (bits_per_second / 1000).max(1)
            ),
        }
    }

    fn fits(&self, container: Container) -> bool {
        matches!(
            (self, container),
            (Self::Vp8 | Self::Vp9, Container::Webm) | (Self::H264, Container::Mp4)
        )
    }
}

impl AudioCodec {
    fn from_codec_id(id: &str) -> Option<Self> {
        let id = id.to_ascii_lowercase();
        if id == "opus" {
            Some(Self::Opus)
        } else if id.starts_with("mp4a") || id == "aac" {
            Some(Self::Aac)
        } else {
            None
        }
    }

    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Opus => "opusenc",
            Self::Aac => "avenc_aac",
        }
    }

    pub fn encoder(&self, bits_per_second: u32) -> String {
        match self {
            Self::Opus => format!("opusenc bitrate={bits_per_second}"),
            Self::Aac => format!("avenc_aac bitrate={bits_per_second} ! aacparse"),
        }
    }

    fn fits(&self, container: Container) -> bool {
        matches!(
            (self, container),
            (Self::Opus, Container::Webm) | (Self::Aac, Container::Mp4)
        )
    }
}

/// Concrete encoders and muxer for one negotiated format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecPlan {
    pub container: Container,
    pub video: VideoCodec,
    pub audio: AudioCodec,
}

impl CodecPlan {
    /// Resolve the `codecs=` list of `format`. Unlisted streams get the
    /// container default (VP8/Opus for WebM, H.264/AAC for MP4). Returns
    /// `None` for codecs this platform cannot produce or that do not fit
    /// the container.
    pub fn for_format(format: &FormatDescriptor) -> Option<Self> {
        let container = format.container;
        let (mut video, mut audio) = (None, None);
        for id in format.codecs() {
            if let Some(codec) = VideoCodec::from_codec_id(id) {
                video = Some(codec);
            } else if let Some(codec) = AudioCodec::from_codec_id(id) {
                audio = Some(codec);
            } else {
                return None;
            }
        }

        let plan = Self {
            container,
            video: video.unwrap_or(match container {
                Container::Webm => VideoCodec::Vp8,
                Container::Mp4 => VideoCodec::H264,
            }),
            audio: audio.unwrap_or(match container {
                Container::Webm => AudioCodec::Opus,
                Container::Mp4 => AudioCodec::Aac,
            }),
        };
        (plan.video.fits(container) && plan.audio.fits(container)).then_some(plan)
    }

    pub fn muxer_name(&self) -> &'static str {
        match self.container {
            Container::Webm => "webmmux",
            Container::Mp4 => "mp4mux",
        }
    }

    /// Streaming muxer fragment. MP4 is fragmented at `fragment` so chunks
    /// can leave the pipeline before it is finalized.
    pub fn muxer(&self, fragment: Duration) -> String {
        match self.container {
            Container::Webm => "webmmux streamable=true".to_string(),
            Container::Mp4 => format!(
                "mp4mux fragment-duration={} streamable=true",
                fragment.as_millis().max(1)
            ),
        }
    }

    /// Element factories that must be installed for this plan.
    pub fn required_elements(&self) -> [&'static str; 4] {
        [
            self.video.element_name(),
            self.audio.element_name(),
            self.muxer_name(),
            "appsink",
        ]
    }
}

/// Launch for a recording: one branch per source track, all into one muxer
/// whose output streams into `appsink name=out`.
pub fn recorder_launch(
    plan: &CodecPlan,
    video_source: &str,
    audio_sources: &[String],
    frame_rate: u32,
    video_bits_per_second: u32,
    audio_bits_per_second: u32,
    timeslice: Duration,
) -> String {
    let mut launch = format!(
        "{video_source} ! queue max-size-buffers=200 leaky=downstream ! videoconvert ! videorate ! video/x-raw,framerate={frame_rate}/1 ! {} ! queue ! mux. ",
        plan.video.encoder(video_bits_per_second, frame_rate)
    );
    for audio in audio_sources {
        launch.push_str(&format!(
            "{audio} ! queue ! audioconvert ! audioresample ! {} ! queue ! mux. ",
            plan.audio.encoder(audio_bits_per_second)
        ));
    }
    launch.push_str(&format!(
        "{} name=mux ! appsink name=out sync=false",
        plan.muxer(timeslice)
    ));
    launch
}

/// Launch for re-encoding RGBA frames pushed into `appsrc name=src`.
pub fn encoder_launch(plan: &CodecPlan, frame_rate: u32, video_bits_per_second: u32) -> String {
    format!(
        "appsrc name=src format=time ! videoconvert ! {} ! {} ! appsink name=out sync=false",
        plan.video.encoder(video_bits_per_second, frame_rate),
        plan.muxer(Duration::from_secs(1))
    )
}

/// Launch for decoding a file to RGBA frames on `appsink name=frames`.
pub fn file_decoder_launch(location: &str) -> String {
    format!(
        "filesrc location=\"{location}\" ! decodebin ! videoconvert ! video/x-raw,format=RGBA ! appsink name=frames sync=false max-buffers=4"
    )
}

/// Launch for a live preview surface: latest frame only.
pub fn surface_launch(video_source: &str) -> String {
    format!(
        "{video_source} ! queue leaky=downstream max-size-buffers=2 ! videoconvert ! video/x-raw,format=RGBA ! appsink name=frames sync=false max-buffers=1 drop=true"
    )
}

/// Placeholder appsrc fragment for an in-process canvas track.
pub fn canvas_source(name: &str) -> String {
    format!("appsrc name={name} is-live=true format=time do-timestamp=true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(mime: &str) -> Option<CodecPlan> {
        CodecPlan::for_format(&FormatDescriptor::parse(mime).unwrap())
    }

    #[test]
    fn resolves_listed_codecs() {
        let p = plan("video/webm;codecs=vp9,opus").unwrap();
        assert_eq!((p.video, p.audio), (VideoCodec::Vp9, AudioCodec::Opus));

        let p = plan("video/mp4;codecs=avc1.42E01E,mp4a.40.2").unwrap();
        assert_eq!((p.video, p.audio), (VideoCodec::H264, AudioCodec::Aac));
    }

    #[test]
    fn generic_mimes_use_container_defaults() {
        let p = plan("video/webm").unwrap();
        assert_eq!((p.video, p.audio), (VideoCodec::Vp8, AudioCodec::Opus));
        assert_eq!(p.required_elements(), ["vp8enc", "opusenc", "webmmux", "appsink"]);
    }

    #[test]
    fn rejects_unknown_or_mismatched_codecs() {
        assert!(plan("video/webm;codecs=av1").is_none());
        assert!(plan("video/webm;codecs=avc1").is_none());
        assert!(plan("video/mp4;codecs=vp8").is_none());
    }

    #[test]
    fn recorder_launch_muxes_every_audio_track() {
        let p = plan("video/webm;codecs=vp9,opus").unwrap();
        let launch = recorder_launch(
            &p,
            "ximagesrc use-damage=false",
            &["pulsesrc".to_string(), "pulsesrc device=mon".to_string()],
            30,
            2_500_000,
            128_000,
            Duration::from_secs(1),
        );
        assert!(launch.starts_with("ximagesrc use-damage=false ! queue"));
        assert!(launch.contains("vp9enc deadline=1 cpu-used=8 row-mt=true target-bitrate=2500000"));
        assert_eq!(launch.matches("opusenc bitrate=128000").count(), 2);
        assert!(launch.ends_with("webmmux streamable=true name=mux ! appsink name=out sync=false"));
    }

    #[test]
    fn mp4_is_fragmented_at_the_timeslice() {
        let p = plan("video/mp4").unwrap();
        assert_eq!(
            p.muxer(Duration::from_millis(1000)),
            "mp4mux fragment-duration=1000 streamable=true"
        );
        assert!(p.video.encoder(2_500_000, 30).contains("bitrate=2500 key-int-max=60"));
    }

    #[test]
    fn encoder_launch_reads_from_appsrc() {
        let p = plan("video/webm;codecs=vp9").unwrap();
        let launch = encoder_launch(&p, 30, 2_500_000);
        assert!(launch.starts_with("appsrc name=src format=time ! videoconvert ! vp9enc"));
        assert!(launch.ends_with("appsink name=out sync=false"));
    }
}
