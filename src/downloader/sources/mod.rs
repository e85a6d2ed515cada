// Source registry - maps a URL to the adapter that knows how to talk to its site
//
// Adapters form a closed set keyed by `SourceTag`. The registry holds them in
// registration order and `detect` returns the first whose URL rules match.

mod adapters;

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::DownloadError;
use super::format_selector::FormatSelector;
use super::models::{Job, JobRequest, NetworkConfig, OutputKind};
use super::utils::{get_proxy_args, get_timeout_args};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    YouTube,
    Vimeo,
    TikTok,
    Instagram,
    Twitter,
    SoundCloud,
    Twitch,
}

impl SourceTag {
    pub const ALL: [SourceTag; 7] = [
        Self::YouTube,
        Self::Vimeo,
        Self::TikTok,
        Self::Instagram,
        Self::Twitter,
        Self::SoundCloud,
        Self::Twitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Vimeo => "Vimeo",
            Self::TikTok => "TikTok",
            Self::Instagram => "Instagram",
            Self::Twitter => "X/Twitter",
            Self::SoundCloud => "SoundCloud",
            Self::Twitch => "Twitch",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a source can deliver
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Highest video height offered; 0 for audio-only sources
    pub max_height: u32,
    /// Containers a job may request
    pub containers: &'static [&'static str],
    pub audio_only: bool,
    pub video_only: bool,
    pub live: bool,
    pub clips: bool,
    pub playlists: bool,
    pub auth: bool,
    /// Downloads from this source always go through ffmpeg (stream merging)
    pub requires_ffmpeg: bool,
    /// Output may use codecs that common players reject (HEVC/VP9/AV1)
    pub needs_compat_reencode: bool,
}

/// Inputs to argument building that do not come from the job itself
#[derive(Debug, Clone, Default)]
pub struct ArgContext {
    /// Passed as `--ffmpeg-location` when known
    pub ffmpeg_location: Option<String>,
    pub network: NetworkConfig,
    /// Output of the bandwidth controller (`--limit-rate N` or empty)
    pub rate_limit: Vec<String>,
}

/// One registered source: tag, URL grammar and capability record
pub struct SourceAdapter {
    tag: SourceTag,
    capabilities: Capabilities,
    url_rules: Vec<Regex>,
    playlist_rules: Vec<Regex>,
    live_rules: Vec<Regex>,
}

impl SourceAdapter {
    pub fn new(
        tag: SourceTag,
        capabilities: Capabilities,
        url_rules: Vec<Regex>,
        playlist_rules: Vec<Regex>,
        live_rules: Vec<Regex>,
    ) -> Self {
        Self {
            tag,
            capabilities,
            url_rules,
            playlist_rules,
            live_rules,
        }
    }

    /// Built-in adapter for a tag
    pub fn builtin(tag: SourceTag) -> Self {
        adapters::builtin(tag)
    }

    pub fn tag(&self) -> SourceTag {
        self.tag
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn matches(&self, url: &str) -> bool {
        self.url_rules.iter().any(|r| r.is_match(url))
    }

    pub fn is_playlist_url(&self, url: &str) -> bool {
        self.playlist_rules.iter().any(|r| r.is_match(url))
    }

    pub fn is_live_stream(&self, url: &str) -> bool {
        self.live_rules.iter().any(|r| r.is_match(url))
    }

    pub fn supports_auth(&self) -> bool {
        self.capabilities.auth
    }

    fn unsupported(&self, operation: impl Into<String>) -> DownloadError {
        DownloadError::UnsupportedOperation {
            platform: self.tag,
            operation: operation.into(),
        }
    }

    /// Reject requests this source cannot serve before anything is spawned
    pub fn validate(&self, request: &JobRequest, ffmpeg_available: bool) -> Result<(), DownloadError> {
        let caps = &self.capabilities;
        let url = request.url.trim();

        match request.kind {
            OutputKind::Audio if !caps.audio_only => return Err(self.unsupported("audio-only downloads")),
            OutputKind::Video if !caps.video_only => return Err(self.unsupported("video-only downloads")),
            OutputKind::Muxed if caps.max_height == 0 => return Err(self.unsupported("video downloads")),
            _ => {}
        }

        if self.is_playlist_url(url) && !caps.playlists {
            return Err(self.unsupported("playlist downloads"));
        }
        if self.is_live_stream(url) && !caps.live {
            return Err(self.unsupported("live streams"));
        }

        if let Some(clip) = &request.clip {
            if !caps.clips {
                return Err(self.unsupported("clip extraction"));
            }
            if !clip.is_valid() {
                return Err(DownloadError::InvalidRequest(format!(
                    "clip end must come after its start ({:?})",
                    clip
                )));
            }
        }

        if let Some(container) = &request.container {
            let container = container.to_lowercase();
            if !caps.containers.contains(&container.as_str()) {
                return Err(self.unsupported(format!("the {} container", container)));
            }
        }

        let needs_ffmpeg = caps.requires_ffmpeg
            || request.kind == OutputKind::Audio
            || request.clip.is_some();
        if needs_ffmpeg && !ffmpeg_available {
            return Err(DownloadError::ToolNotFound(format!(
                "ffmpeg (required for {} {} downloads)",
                self.tag, request.kind
            )));
        }

        Ok(())
    }

    /// Download arguments for a job. The URL is always the last token.
    pub fn build_args(&self, job: &Job, ffmpeg_location: Option<&str>) -> Vec<String> {
        let caps = &self.capabilities;
        let playlist = caps.playlists && self.is_playlist_url(&job.url);

        let template = if playlist {
            "%(playlist_index)s - %(title)s.%(ext)s"
        } else {
            "%(title)s.%(ext)s"
        };

        let mut args = vec![
            "-f".to_string(),
            FormatSelector::format_spec(job.kind, &job.quality, caps.max_height, caps.needs_compat_reencode),
            if playlist { "--yes-playlist" } else { "--no-playlist" }.to_string(),
            "--newline".to_string(),
            "--no-update".to_string(),
            "--retries".to_string(),
            "5".to_string(),
            "--fragment-retries".to_string(),
            "50".to_string(),
            "--skip-unavailable-fragments".to_string(),
            "-P".to_string(),
            job.output_dir.to_string_lossy().to_string(),
            "-o".to_string(),
            template.to_string(),
        ];

        match job.kind {
            OutputKind::Audio => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push(job.container.clone().unwrap_or_else(|| "mp3".to_string()));
                args.push("--audio-quality".to_string());
                args.push("0".to_string());
            }
            OutputKind::Muxed => {
                args.push("--merge-output-format".to_string());
                args.push(job.container.clone().unwrap_or_else(|| "mp4".to_string()));
            }
            OutputKind::Video => {
                if let Some(container) = &job.container {
                    args.push("--remux-video".to_string());
                    args.push(container.clone());
                }
            }
        }

        if let Some(clip) = &job.clip {
            args.push("--download-sections".to_string());
            args.push(clip.section_spec());
            args.push("--force-keyframes-at-cuts".to_string());
        }

        if let Some(location) = ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(location.to_string());
        }

        args.extend(adapters::download_fragments(self, job));
        args.push(job.url.clone());
        args
    }

    /// Arguments for a metadata-only describe call
    pub fn describe_args(&self, url: &str, collection: bool) -> Vec<String> {
        let mut args = if collection {
            vec![
                "--flat-playlist".to_string(),
                "--dump-single-json".to_string(),
                "--yes-playlist".to_string(),
            ]
        } else {
            vec!["--dump-json".to_string(), "--no-playlist".to_string()]
        };
        args.push("--no-warnings".to_string());
        args.extend(adapters::describe_fragments(self.tag));
        args.push(url.to_string());
        args
    }
}

/// Splice `fragment` in front of the URL token (the last occurrence of `url`).
/// Appends when the URL is missing.
pub fn insert_before_url(args: &mut Vec<String>, url: &str, fragment: Vec<String>) {
    if fragment.is_empty() {
        return;
    }
    let at = args.iter().rposition(|a| a == url).unwrap_or(args.len());
    args.splice(at..at, fragment);
}

/// Registered adapters in registration order
pub struct SourceRegistry {
    adapters: Vec<SourceAdapter>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry with every built-in adapter
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for tag in SourceTag::ALL {
            registry.register(SourceAdapter::builtin(tag));
        }
        registry
    }

    /// Register an adapter; a second adapter for the same tag replaces the
    /// first in place, keeping its detection position.
    pub fn register(&mut self, adapter: SourceAdapter) {
        match self.adapters.iter_mut().find(|a| a.tag == adapter.tag) {
            Some(slot) => *slot = adapter,
            None => self.adapters.push(adapter),
        }
    }

    /// First adapter whose URL rules match
    pub fn detect(&self, url: &str) -> Option<&SourceAdapter> {
        let url = url.trim();
        let parsed = url::Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        self.adapters.iter().find(|a| a.matches(url))
    }

    pub fn get(&self, tag: SourceTag) -> Option<&SourceAdapter> {
        self.adapters.iter().find(|a| a.tag == tag)
    }

    pub fn tags(&self) -> Vec<SourceTag> {
        self.adapters.iter().map(|a| a.tag).collect()
    }

    /// Full argument list for a job: adapter arguments plus the cross-cutting
    /// fragments (proxy, socket timeout, rate limit) spliced before the URL.
    pub fn build_args(&self, job: &Job, ctx: &ArgContext) -> Result<Vec<String>, DownloadError> {
        let adapter = self
            .get(job.source)
            .ok_or_else(|| DownloadError::UnsupportedSource(job.url.clone()))?;

        let mut args = adapter.build_args(job, ctx.ffmpeg_location.as_deref());

        let mut fragment = get_proxy_args(&ctx.network);
        fragment.extend(get_timeout_args(&ctx.network));
        fragment.extend(ctx.rate_limit.iter().cloned());
        insert_before_url(&mut args, &job.url, fragment);

        Ok(args)
    }

    /// Describe-call arguments with the proxy fragment spliced in
    pub fn describe_args(
        &self,
        url: &str,
        collection: bool,
        network: &NetworkConfig,
    ) -> Result<Vec<String>, DownloadError> {
        let adapter = self
            .detect(url)
            .ok_or_else(|| DownloadError::UnsupportedSource(url.to_string()))?;
        if collection && !adapter.capabilities.playlists {
            return Err(adapter.unsupported("playlist downloads"));
        }

        let url = url.trim();
        let mut args = adapter.describe_args(url, collection);
        let mut fragment = get_proxy_args(network);
        fragment.extend(get_timeout_args(network));
        insert_before_url(&mut args, url, fragment);
        Ok(args)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{ClipRange, JobId};
    use std::path::PathBuf;
    use time::OffsetDateTime;

    fn job_for(registry: &SourceRegistry, request: JobRequest) -> Job {
        let tag = registry.detect(&request.url).expect("detected").tag();
        Job::from_request(JobId(7), request, tag, PathBuf::from("/downloads"), OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn detects_each_builtin_source() {
        let registry = SourceRegistry::with_defaults();
        let cases = [
            ("https://www.youtube.com/watch?v=jNQXAC9IVRw", SourceTag::YouTube),
            ("https://youtu.be/jNQXAC9IVRw", SourceTag::YouTube),
            ("https://vimeo.com/76979871", SourceTag::Vimeo),
            ("https://www.tiktok.com/@scout2015/video/6718335390845095173", SourceTag::TikTok),
            ("https://www.instagram.com/reel/Cabc123/", SourceTag::Instagram),
            ("https://x.com/nasa/status/1712345678901234567", SourceTag::Twitter),
            ("https://soundcloud.com/artist/track-name", SourceTag::SoundCloud),
            ("https://www.twitch.tv/videos/123456789", SourceTag::Twitch),
        ];
        for (url, tag) in cases {
            assert_eq!(registry.detect(url).map(|a| a.tag()), Some(tag), "{}", url);
        }
    }

    #[test]
    fn unknown_and_non_http_urls_are_not_detected() {
        let registry = SourceRegistry::with_defaults();
        assert!(registry.detect("https://example.com/video.mp4").is_none());
        assert!(registry.detect("ftp://youtube.com/watch?v=abc").is_none());
        assert!(registry.detect("not a url").is_none());
    }

    #[test]
    fn empty_registry_detects_nothing() {
        let registry = SourceRegistry::new();
        assert!(registry.detect("https://youtu.be/abc").is_none());
    }

    #[test]
    fn args_end_with_url_and_fragments_precede_it() {
        let registry = SourceRegistry::with_defaults();
        let job = job_for(&registry, JobRequest::new("https://youtu.be/jNQXAC9IVRw"));
        let ctx = ArgContext {
            ffmpeg_location: Some("/usr/bin/ffmpeg".to_string()),
            network: NetworkConfig {
                proxy: Some("socks5h://127.0.0.1:1080".to_string()),
                timeout: Some(30),
            },
            rate_limit: vec!["--limit-rate".to_string(), "500K".to_string()],
        };

        let args = registry.build_args(&job, &ctx).unwrap();
        assert_eq!(args.last().unwrap(), "https://youtu.be/jNQXAC9IVRw");

        let n = args.len();
        assert_eq!(
            &args[n - 7..n - 1],
            &["--proxy", "socks5h://127.0.0.1:1080", "--socket-timeout", "30", "--limit-rate", "500K"]
        );
        assert!(args.windows(2).any(|w| w == ["--ffmpeg-location", "/usr/bin/ffmpeg"]));
        assert!(args.contains(&"--no-playlist".to_string()));
    }

    #[test]
    fn insert_before_url_appends_when_url_missing() {
        let mut args = vec!["-f".to_string(), "best".to_string()];
        insert_before_url(&mut args, "https://x", vec!["--proxy".to_string(), "p".to_string()]);
        assert_eq!(args, vec!["-f", "best", "--proxy", "p"]);
    }

    #[test]
    fn audio_clip_args() {
        let registry = SourceRegistry::with_defaults();
        let request = JobRequest::new("https://www.youtube.com/watch?v=abc123")
            .with_kind(OutputKind::Audio)
            .with_container("m4a")
            .with_clip(ClipRange::new(10.0, Some(20.0)));
        let job = job_for(&registry, request);
        let args = registry.build_args(&job, &ArgContext::default()).unwrap();

        assert!(args.windows(2).any(|w| w == ["--audio-format", "m4a"]));
        assert!(args.windows(2).any(|w| w == ["--download-sections", "*10-20"]));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn playlist_urls() {
        let registry = SourceRegistry::with_defaults();
        let yt = registry.get(SourceTag::YouTube).unwrap();
        assert!(yt.is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(!yt.is_playlist_url("https://www.youtube.com/watch?v=abc"));

        let job = job_for(&registry, JobRequest::new("https://www.youtube.com/playlist?list=PL123"));
        let args = registry.build_args(&job, &ArgContext::default()).unwrap();
        assert!(args.contains(&"--yes-playlist".to_string()));
    }

    #[test]
    fn rejects_unsupported_operations_early() {
        let registry = SourceRegistry::with_defaults();

        let tiktok = registry.get(SourceTag::TikTok).unwrap();
        let err = tiktok
            .validate(
                &JobRequest::new("https://www.tiktok.com/@user/video/1").with_clip(ClipRange::new(1.0, Some(2.0))),
                true,
            )
            .unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedOperation { platform: SourceTag::TikTok, .. }));

        let soundcloud = registry.get(SourceTag::SoundCloud).unwrap();
        assert!(soundcloud
            .validate(&JobRequest::new("https://soundcloud.com/a/b"), true)
            .is_err());
        assert!(soundcloud
            .validate(&JobRequest::new("https://soundcloud.com/a/b").with_kind(OutputKind::Audio), true)
            .is_ok());

        let instagram = registry.get(SourceTag::Instagram).unwrap();
        assert!(instagram
            .validate(&JobRequest::new("https://www.instagram.com/p/abc/").with_container("webm"), true)
            .is_err());
    }

    #[test]
    fn live_streams_rejected_where_unsupported() {
        let registry = SourceRegistry::with_defaults();
        let url = "https://www.tiktok.com/@someone/live";
        let adapter = registry.detect(url).unwrap();
        assert_eq!(adapter.tag(), SourceTag::TikTok);
        assert!(adapter.is_live_stream(url));
        assert!(adapter.validate(&JobRequest::new(url), true).is_err());

        let twitch = "https://www.twitch.tv/somechannel";
        let adapter = registry.detect(twitch).unwrap();
        assert!(adapter.is_live_stream(twitch));
        assert!(adapter.validate(&JobRequest::new(twitch), true).is_ok());
    }

    #[test]
    fn missing_ffmpeg_is_an_environment_error() {
        let registry = SourceRegistry::with_defaults();
        let yt = registry.get(SourceTag::YouTube).unwrap();
        let err = yt
            .validate(&JobRequest::new("https://youtu.be/abc"), false)
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));

        // TikTok serves progressive files, ffmpeg is optional for video
        let tiktok = registry.get(SourceTag::TikTok).unwrap();
        assert!(tiktok
            .validate(&JobRequest::new("https://www.tiktok.com/@u/video/1"), false)
            .is_ok());
    }

    #[test]
    fn describe_args_shape() {
        let registry = SourceRegistry::with_defaults();
        let net = NetworkConfig {
            proxy: Some("http://proxy:8080".to_string()),
            timeout: None,
        };
        let args = registry
            .describe_args("https://vimeo.com/76979871", false, &net)
            .unwrap();
        assert_eq!(args[0], "--dump-json");
        assert_eq!(&args[args.len() - 3..], &["--proxy", "http://proxy:8080", "https://vimeo.com/76979871"]);

        assert!(registry
            .describe_args("https://www.instagram.com/p/abc/", true, &net)
            .is_err());
    }

    #[test]
    fn register_replaces_same_tag() {
        let mut registry = SourceRegistry::with_defaults();
        let before = registry.tags();
        registry.register(SourceAdapter::builtin(SourceTag::Vimeo));
        assert_eq!(registry.tags(), before);
    }
}
