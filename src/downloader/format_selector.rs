// FormatSelector - maps a requested output kind + quality to a yt-dlp format spec
//
// Handles:
// - Standard resolution strings (2160p ... 360p, "4k", "best")
// - Per-source height ceilings (an adapter's max quality caps the request)
// - Audio-only and video-only selection
// - Codec preferences (H.264/AAC for sources whose output must play everywhere)

use super::extractors::ExtendedFormat;
use super::models::OutputKind;

/// Format selector with per-source quality ceilings
pub struct FormatSelector;

impl FormatSelector {
    /// Parse "1080p" / "1080" / "4k" into a pixel height. `best` and unknown
    /// strings mean "no explicit ceiling".
    pub fn parse_height(quality: &str) -> Option<u32> {
        let q = quality.trim().to_lowercase();
        match q.as_str() {
            "4k" | "uhd" => Some(2160),
            "2k" => Some(1440),
            "fhd" => Some(1080),
            "hd" => Some(720),
            _ => q.trim_end_matches('p').parse::<u32>().ok().filter(|h| *h > 0),
        }
    }

    /// Height limit actually applied: the request, capped by the source ceiling.
    /// A `max_height` of 0 means the source has no video at all.
    pub fn effective_height(quality: &str, max_height: u32) -> Option<u32> {
        match (Self::parse_height(quality), max_height) {
            (_, 0) => None,
            (Some(h), max) => Some(h.min(max)),
            (None, max) => Some(max),
        }
    }

    /// Get format spec for yt-dlp
    pub fn format_spec(kind: OutputKind, quality: &str, max_height: u32, prefer_h264: bool) -> String {
        let height = Self::effective_height(quality, max_height);

        match kind {
            OutputKind::Audio => {
                if prefer_h264 {
                    "ba[acodec^=mp4a]/ba/b".to_string()
                } else {
                    "ba/b".to_string()
                }
            }
            OutputKind::Video => match (height, prefer_h264) {
                (Some(h), true) => format!("bv*[height<={h}][vcodec^=avc1]/bv*[height<={h}]/bv*"),
                (Some(h), false) => format!("bv*[height<={h}]/bv*"),
                (None, true) => "bv*[vcodec^=avc1]/bv*".to_string(),
                (None, false) => "bv*".to_string(),
            },
            OutputKind::Muxed => match (height, prefer_h264) {
                (Some(h), true) => format!(
                    "bv*[height<={h}][vcodec^=avc1]+ba[acodec^=mp4a]/bv*[height<={h}]+ba/b[height<={h}]/bv*+ba/best"
                ),
                (Some(h), false) => format!("bv*[height<={h}]+ba/b[height<={h}]/bv*+ba/best"),
                (None, true) => "bv*[vcodec^=avc1]+ba[acodec^=mp4a]/bv*+ba/best".to_string(),
                (None, false) => "bv*+ba/best".to_string(),
            },
        }
    }

    /// Get recommended quality for a described video
    pub fn recommend_quality(formats: &[ExtendedFormat]) -> &'static str {
        let max_height = formats
            .iter()
            .filter_map(|f| f.height)
            .max()
            .unwrap_or(0);

        if max_height >= 1080 {
            "1080p" // Good balance of quality and size
        } else if max_height >= 720 {
            "720p"
        } else if max_height >= 480 {
            "480p"
        } else {
            "best"
        }
    }
}
