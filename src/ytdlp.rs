//! yt-dlp stdout parsing.
//!
//! This is the only place that knows what yt-dlp prints. The supervisor feeds
//! every stdout line through [`parse_line`] and forwards the structured result;
//! nothing downstream looks at raw text. When a yt-dlp release changes its
//! output format, the golden transcript in the tests is what should break.

use regex::Regex;

/// Structured view of one stdout line
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// Transfer progress. `percent` is already clamped to 0..=100.
    Progress {
        percent: f32,
        /// Current transfer speed in KiB/s when yt-dlp printed one
        speed_kib: Option<f64>,
        status: String,
    },
    /// A new file is being written
    Destination(String),
    /// The target already exists, nothing to transfer
    AlreadyDownloaded(String),
    /// Muxing / conversion / fixup step. Informational only, never progress.
    PostProcessing {
        stage: String,
        target: Option<String>,
    },
}

impl OutputLine {
    /// File path carried by the line, if any
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Destination(path) | Self::AlreadyDownloaded(path) => Some(path),
            Self::PostProcessing { target, .. } => target.as_deref(),
            Self::Progress { .. } => None,
        }
    }
}

lazy_static::lazy_static! {
    // [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    // [download] 100% of   12.34MiB in 00:00:03 at 3.45MiB/s
    static ref PROGRESS_RE: Regex = Regex::new(
        r"^\[download\]\s+(\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*(\d+(?:\.\d+)?\s*[KMGT]?i?B))?(?:\s+in\s+\S+)?(?:\s+at\s+(Unknown B/s|\S+/s))?(?:\s+ETA\s+(\S+))?(?:\s+\(frag\s+(\d+)/(\d+)\))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"^\[download\]\s+Destination:\s+(.+)$").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"^\[download\]\s+(.+?) has already been downloaded").unwrap();
    static ref POSTPROCESS_RE: Regex = Regex::new(
        r"^\[(Merger|ffmpeg|ExtractAudio|VideoConvertor|VideoRemuxer|Fixup\w*|EmbedThumbnail|Metadata|ModifyChapters|SplitChapters)\]\s+(.*)$"
    ).unwrap();
    static ref MERGE_TARGET_RE: Regex = Regex::new(r#"Merging formats into "(.+)"$"#).unwrap();
    static ref PP_DEST_RE: Regex = Regex::new(r"Destination:\s+(.+)$").unwrap();
    static ref SPEED_RE: Regex = Regex::new(r"^(\d+(?:\.\d+)?)\s*([KMGT]?)i?B/s$").unwrap();
}

/// Parse a single stdout line. Returns `None` for lines that carry nothing
/// the orchestrator cares about.
pub fn parse_line(line: &str) -> Option<OutputLine> {
    let line = line.trim();

    if let Some(caps) = DEST_RE.captures(line) {
        return Some(OutputLine::Destination(caps[1].trim().to_string()));
    }

    if let Some(caps) = ALREADY_RE.captures(line) {
        return Some(OutputLine::AlreadyDownloaded(caps[1].trim().to_string()));
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let percent = percent.clamp(0.0, 100.0);
        let size = caps.get(2).map(|m| m.as_str()).unwrap_or("?");
        let speed = caps.get(3).map(|m| m.as_str());
        let eta = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        let frags = caps.get(5).zip(caps.get(6));

        let mut status = format!("⬇️ {:.1}% of {}", percent, size);
        if let Some(speed) = speed {
            status.push_str(&format!(" @ {}", speed));
        }
        if !eta.is_empty() {
            status.push_str(&format!(" ETA {}", eta));
        }
        if let Some((current, total)) = frags {
            status.push_str(&format!(" (frag {}/{})", current.as_str(), total.as_str()));
        }

        return Some(OutputLine::Progress {
            percent,
            speed_kib: speed.and_then(parse_speed_kib),
            status,
        });
    }

    if let Some(caps) = POSTPROCESS_RE.captures(line) {
        let stage = caps[1].to_string();
        let rest = &caps[2];
        let target = MERGE_TARGET_RE
            .captures(rest)
            .or_else(|| PP_DEST_RE.captures(rest))
            .map(|c| c[1].trim().to_string());
        return Some(OutputLine::PostProcessing { stage, target });
    }

    None
}

/// Convert a yt-dlp speed token ("374.36KiB/s", "1.2MiB/s") to KiB/s
pub fn parse_speed_kib(token: &str) -> Option<f64> {
    let caps = SPEED_RE.captures(token.trim())?;
    let value: f64 = caps[1].parse().ok()?;
    let factor = match &caps[2] {
        "" => 1.0 / 1024.0,
        "K" => 1.0,
        "M" => 1024.0,
        "G" => 1024.0 * 1024.0,
        "T" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(value * factor)
}

/// First `ERROR:` line of stderr, or the last non-empty one, trimmed for display
pub fn error_preview(stderr: &str) -> String {
    let line = stderr
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().map(str::trim).rev().find(|l| !l.is_empty()))
        .unwrap_or("Unknown error");
    line.chars().take(200).collect()
}
