// Error classifier - turns yt-dlp stderr into one failure kind
//
// Rules are checked in order, first match wins. A per-source override table is
// consulted before the generic rules so site-specific wording (Instagram's
// "rate-limit reached or login required" really means "log in") lands in the
// right bucket.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DownloadError;
use super::sources::SourceTag;
use crate::ytdlp::error_preview;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset, 403, generic "unable to download"
    TransientNetwork,
    /// HTTP 429 and friends; retrying right away makes it worse
    RateLimited,
    /// Deleted, private, region-blocked
    ContentUnavailable,
    /// Login / cookies needed
    AuthRequired,
    /// ffmpeg missing or similar; nothing a retry can fix
    EnvironmentBroken,
    /// yt-dlp could not make sense of the page or its own output
    ParseFailure,
    /// Killed by the supervisor after its deadline
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::Timeout)
    }

    /// How many automatic retries this kind may consume
    pub fn retry_cap(self, max_retries: u32) -> u32 {
        match self {
            Self::TransientNetwork => max_retries,
            Self::Timeout => max_retries.min(1),
            _ => 0,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::TransientNetwork => "Transient network error",
            Self::RateLimited => "Rate limited",
            Self::ContentUnavailable => "Content unavailable",
            Self::AuthRequired => "Authentication required",
            Self::EnvironmentBroken => "Missing tool",
            Self::ParseFailure => "Unexpected output",
            Self::Timeout => "Timed out",
            Self::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Result of classifying one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub is_recoverable: bool,
    /// Short human-readable explanation
    pub message: String,
    /// Suggested remedy, when there is one
    pub hint: Option<String>,
    /// Most relevant stderr line
    pub detail: Option<String>,
}

impl Classification {
    fn from_rule(rule: &Rule, detail: Option<String>) -> Self {
        Self {
            kind: rule.kind,
            is_recoverable: rule.kind.is_recoverable(),
            message: rule.message.to_string(),
            hint: rule.hint.map(str::to_string),
            detail,
        }
    }
}

/// One row of the classification table. Patterns are lowercase substrings.
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: ErrorKind,
    pub patterns: &'static [&'static str],
    pub message: &'static str,
    pub hint: Option<&'static str>,
}

impl Rule {
    fn matches(&self, lower: &str) -> bool {
        self.patterns.iter().any(|p| lower.contains(p))
    }
}

const GENERIC_RULES: &[Rule] = &[
    Rule {
        kind: ErrorKind::EnvironmentBroken,
        patterns: &[
            "ffmpeg not found",
            "ffprobe and ffmpeg not found",
            "ffmpeg is not installed",
            "ffmpeg: not found",
            "ffprobe not found",
        ],
        message: "ffmpeg is required for this download but was not found",
        hint: Some("Install ffmpeg and make sure it is on PATH, or set ffmpeg_path in the config"),
    },
    Rule {
        kind: ErrorKind::RateLimited,
        patterns: &["http error 429", "too many requests", "rate-limit", "rate limit"],
        message: "The site is rate-limiting requests from this address",
        hint: Some("Wait 10-15 minutes before retrying, or switch to a different network/proxy"),
    },
    Rule {
        kind: ErrorKind::AuthRequired,
        patterns: &[
            "sign in to confirm",
            "login required",
            "requires authentication",
            "only available for registered users",
            "members only",
            "members-only",
            "join this channel",
            "age-restricted",
            "use --cookies",
        ],
        message: "This content requires signing in",
        hint: Some("Supply cookies from a logged-in browser session (--cookies or --cookies-from-browser)"),
    },
    Rule {
        kind: ErrorKind::ContentUnavailable,
        patterns: &[
            "private video",
            "video is private",
            "video unavailable",
            "video is unavailable",
            "has been removed",
            "no longer available",
            "not available in your country",
            "blocked it in your country",
            "geo restricted",
            "geo-restricted",
            "http error 404",
            "does not exist",
            "drm",
        ],
        message: "The content is unavailable (deleted, private, DRM-protected or region-blocked)",
        hint: Some("Open the URL in a browser to confirm; region-blocked content needs a proxy in an allowed country"),
    },
    Rule {
        kind: ErrorKind::TransientNetwork,
        patterns: &[
            "http error 403",
            "forbidden",
            "connection reset",
            "connection aborted",
            "connection refused",
            "remote end closed connection",
            "incomplete read",
            "temporary failure in name resolution",
            "network is unreachable",
            "http error 500",
            "http error 502",
            "http error 503",
            "unable to download",
        ],
        message: "Transient network error",
        hint: Some("Retrying automatically"),
    },
    Rule {
        kind: ErrorKind::Timeout,
        patterns: &["timed out", "timeout"],
        message: "The transfer timed out",
        hint: Some("Check the connection; a slow link may need a longer timeout"),
    },
    Rule {
        kind: ErrorKind::ParseFailure,
        patterns: &["unable to extract", "failed to parse", "json", "unsupported url"],
        message: "yt-dlp could not understand the page",
        hint: Some("Update yt-dlp; the site may have changed its layout"),
    },
];

const UNKNOWN_RULE: Rule = Rule {
    kind: ErrorKind::Unknown,
    patterns: &[],
    message: "Download failed",
    hint: Some("Check the URL and try again"),
};

fn builtin_overrides(tag: SourceTag) -> Vec<Rule> {
    match tag {
        SourceTag::YouTube => vec![
            Rule {
                kind: ErrorKind::AuthRequired,
                patterns: &["confirm you're not a bot", "confirm you\u{2019}re not a bot"],
                message: "YouTube wants to confirm this is not a bot",
                hint: Some("Use cookies from a logged-in browser, or try again later from another network"),
            },
            Rule {
                kind: ErrorKind::ContentUnavailable,
                patterns: &["requested format is not available"],
                message: "The requested quality is not available for this video",
                hint: Some("Pick a lower quality or \"best\""),
            },
            Rule {
                kind: ErrorKind::TransientNetwork,
                patterns: &["sabr", "po token"],
                message: "YouTube refused the stream for this client",
                hint: Some("Retrying automatically; cookies or a proxy help if it persists"),
            },
        ],
        SourceTag::Instagram => vec![
            Rule {
                kind: ErrorKind::AuthRequired,
                patterns: &["rate-limit reached or login required", "login required", "checkpoint required"],
                message: "Instagram requires a logged-in session for this post",
                hint: Some("Supply cookies from a browser logged in to Instagram"),
            },
            Rule {
                kind: ErrorKind::ContentUnavailable,
                patterns: &["there is no video in this post"],
                message: "This Instagram post has no video",
                hint: None,
            },
        ],
        SourceTag::TikTok => vec![Rule {
            kind: ErrorKind::ContentUnavailable,
            patterns: &["video currently unavailable", "unable to find video in feed"],
            message: "This TikTok video is unavailable",
            hint: None,
        }],
        SourceTag::Twitter => vec![
            Rule {
                kind: ErrorKind::AuthRequired,
                patterns: &["nsfw tweet", "age-restricted"],
                message: "X/Twitter requires a logged-in session for this post",
                hint: Some("Supply cookies from a browser logged in to X"),
            },
            Rule {
                kind: ErrorKind::ContentUnavailable,
                patterns: &["no video could be found in this tweet"],
                message: "This post has no video",
                hint: None,
            },
        ],
        SourceTag::Twitch => vec![Rule {
            kind: ErrorKind::AuthRequired,
            patterns: &["subscriber-only", "only available to subscribers"],
            message: "This Twitch video is subscriber-only",
            hint: Some("Supply cookies from a subscribed account"),
        }],
        SourceTag::SoundCloud => vec![Rule {
            kind: ErrorKind::AuthRequired,
            patterns: &["go+", "preview only"],
            message: "This track needs a SoundCloud Go+ subscription",
            hint: None,
        }],
        SourceTag::Vimeo => vec![Rule {
            kind: ErrorKind::AuthRequired,
            patterns: &["protected by a password", "video-password", "logged-in"],
            message: "This Vimeo video is password-protected or private",
            hint: Some("Pass the video password or cookies to yt-dlp"),
        }],
    }
}

/// Priority-ordered classification table with per-source overrides
pub struct ErrorClassifier {
    overrides: HashMap<SourceTag, Vec<Rule>>,
}

impl ErrorClassifier {
    /// Classifier with only the generic rules
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut classifier = Self::new();
        for tag in SourceTag::ALL {
            classifier.overrides.insert(tag, builtin_overrides(tag));
        }
        classifier
    }

    /// Append an override rule for a source; it is tried after the existing ones
    pub fn add_override(&mut self, tag: SourceTag, rule: Rule) {
        self.overrides.entry(tag).or_default().push(rule);
    }

    /// Classify stderr text. Always returns exactly one result.
    pub fn classify(&self, stderr: &str, source: Option<SourceTag>) -> Classification {
        let lower = stderr.to_lowercase();
        let detail = if stderr.trim().is_empty() {
            None
        } else {
            Some(error_preview(stderr))
        };

        let overrides = source
            .and_then(|tag| self.overrides.get(&tag))
            .map(|rules| rules.as_slice())
            .unwrap_or(&[]);

        let rule = overrides
            .iter()
            .chain(GENERIC_RULES.iter())
            .find(|rule| rule.matches(&lower))
            .unwrap_or(&UNKNOWN_RULE);

        Classification::from_rule(rule, detail)
    }

    /// Classify a failure that may not have come from stderr
    pub fn classify_error(&self, err: &DownloadError, source: Option<SourceTag>) -> Classification {
        let kind = match err {
            DownloadError::ProcessFailed(c) => return c.clone(),
            DownloadError::Timeout(_) => ErrorKind::Timeout,
            DownloadError::ToolNotFound(_) => ErrorKind::EnvironmentBroken,
            DownloadError::ParseError(_) | DownloadError::Json(_) => ErrorKind::ParseFailure,
            _ => return self.classify(&err.diagnostic_text(), source),
        };

        let rule = GENERIC_RULES
            .iter()
            .find(|r| r.kind == kind)
            .unwrap_or(&UNKNOWN_RULE);
        Classification::from_rule(rule, Some(err.to_string()))
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(stderr: &str) -> Classification {
        ErrorClassifier::with_defaults().classify(stderr, None)
    }

    #[test]
    fn http_429_is_fatal_rate_limit() {
        let c = classify("ERROR: unable to download video data: HTTP Error 429: Too Many Requests");
        assert_eq!(c.kind, ErrorKind::RateLimited);
        assert!(!c.is_recoverable);
        assert!(c.message.contains("rate-limiting"));
        assert!(c.hint.unwrap().contains("Wait"));
    }

    #[test]
    fn http_403_is_recoverable() {
        let c = classify("ERROR: unable to download video data: HTTP Error 403: Forbidden");
        assert_eq!(c.kind, ErrorKind::TransientNetwork);
        assert!(c.is_recoverable);
    }

    #[test]
    fn connection_reset_and_generic_download_failures_are_recoverable() {
        assert!(classify("[Errno 104] Connection reset by peer").is_recoverable);
        assert!(classify("ERROR: Unable to download webpage").is_recoverable);
    }

    #[test]
    fn missing_ffmpeg_is_environment_broken() {
        let c = classify(
            "ERROR: Postprocessing: ffprobe and ffmpeg not found. Please install or provide the path using --ffmpeg-location",
        );
        assert_eq!(c.kind, ErrorKind::EnvironmentBroken);
        assert!(!c.is_recoverable);
        assert!(c.hint.unwrap().contains("Install ffmpeg"));
    }

    #[test]
    fn private_video_is_fatal() {
        let c = classify("ERROR: [youtube] abc: Private video. Sign in if you've been granted access");
        assert_eq!(c.kind, ErrorKind::ContentUnavailable);
        assert!(!c.is_recoverable);
        assert_eq!(c.detail.as_deref(), Some("ERROR: [youtube] abc: Private video. Sign in if you've been granted access"));
    }

    #[test]
    fn auth_required_has_cookie_hint() {
        let c = classify("ERROR: Sign in to confirm your age. This video may be inappropriate");
        assert_eq!(c.kind, ErrorKind::AuthRequired);
        assert!(c.hint.unwrap().contains("cookies"));
    }

    #[test]
    fn unknown_is_fatal() {
        let c = classify("ERROR: something nobody has seen before");
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(!c.is_recoverable);
    }

    #[test]
    fn first_match_wins() {
        // Both 429 and "unable to download" appear; rate limiting is checked first
        let c = classify("Unable to download JSON metadata: HTTP Error 429");
        assert_eq!(c.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn source_override_takes_priority() {
        let classifier = ErrorClassifier::with_defaults();
        let stderr = "ERROR: [Instagram] abc: Requested content is not available, rate-limit reached or login required";

        let generic = classifier.classify(stderr, None);
        assert_eq!(generic.kind, ErrorKind::RateLimited);

        let insta = classifier.classify(stderr, Some(SourceTag::Instagram));
        assert_eq!(insta.kind, ErrorKind::AuthRequired);
    }

    #[test]
    fn custom_override() {
        let mut classifier = ErrorClassifier::new();
        classifier.add_override(
            SourceTag::Vimeo,
            Rule {
                kind: ErrorKind::TransientNetwork,
                patterns: &["cdn hiccup"],
                message: "Vimeo CDN hiccup",
                hint: None,
            },
        );
        assert!(classifier.classify("CDN hiccup", Some(SourceTag::Vimeo)).is_recoverable);
        assert!(!classifier.classify("CDN hiccup", Some(SourceTag::TikTok)).is_recoverable);
    }

    #[test]
    fn classify_error_kinds() {
        let classifier = ErrorClassifier::with_defaults();
        let timeout = classifier.classify_error(&DownloadError::Timeout(3600), None);
        assert_eq!(timeout.kind, ErrorKind::Timeout);
        assert!(timeout.is_recoverable);

        let tool = classifier.classify_error(&DownloadError::ToolNotFound("yt-dlp".into()), None);
        assert_eq!(tool.kind, ErrorKind::EnvironmentBroken);

        let parse = classifier.classify_error(&DownloadError::ParseError("bad".into()), None);
        assert_eq!(parse.kind, ErrorKind::ParseFailure);
    }

    #[test]
    fn retry_caps() {
        assert_eq!(ErrorKind::TransientNetwork.retry_cap(3), 3);
        assert_eq!(ErrorKind::Timeout.retry_cap(3), 1);
        assert_eq!(ErrorKind::Timeout.retry_cap(0), 0);
        assert_eq!(ErrorKind::RateLimited.retry_cap(3), 0);
    }
}
