// Built-in source adapters: URL grammar, capabilities, per-site argument fragments

use regex::Regex;

use super::{Capabilities, SourceAdapter, SourceTag};
use crate::downloader::models::Job;

lazy_static::lazy_static! {
    static ref YOUTUBE_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|m\.|music\.)?youtube\.com/(?:watch\?|shorts/|live/|playlist\?|embed/|@|channel/|c/)").unwrap(),
        Regex::new(r"(?i)^https?://youtu\.be/[\w-]+").unwrap(),
    ];
    static ref YOUTUBE_PLAYLISTS: Vec<Regex> = vec![
        Regex::new(r"[?&]list=[\w-]+").unwrap(),
        Regex::new(r"(?i)youtube\.com/(?:channel/|c/|@[^/?]+/?(?:videos|shorts|streams)?/?$)").unwrap(),
    ];
    static ref YOUTUBE_LIVE: Vec<Regex> = vec![
        Regex::new(r"(?i)youtube\.com/(?:live/|@[^/?]+/live/?$)").unwrap(),
    ];

    static ref VIMEO_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|player\.)?vimeo\.com/(?:video/)?\d+").unwrap(),
        Regex::new(r"(?i)^https?://(?:www\.)?vimeo\.com/(?:showcase|album|channels)/[\w-]+").unwrap(),
    ];
    static ref VIMEO_PLAYLISTS: Vec<Regex> = vec![
        Regex::new(r"(?i)vimeo\.com/(?:showcase|album|channels)/").unwrap(),
    ];

    static ref TIKTOK_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|m\.)?tiktok\.com/@[\w.-]+/(?:video/\d+|live)").unwrap(),
        Regex::new(r"(?i)^https?://(?:vm|vt)\.tiktok\.com/\w+").unwrap(),
    ];
    static ref TIKTOK_LIVE: Vec<Regex> = vec![
        Regex::new(r"(?i)tiktok\.com/@[\w.-]+/live").unwrap(),
    ];

    static ref INSTAGRAM_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.)?instagram\.com/(?:p|reel|reels|tv|stories)/[\w.-]+").unwrap(),
    ];

    static ref TWITTER_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|mobile\.)?(?:twitter|x)\.com/\w+/status/\d+").unwrap(),
    ];

    static ref SOUNDCLOUD_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|m\.)?soundcloud\.com/[\w-]+/[\w-]+").unwrap(),
    ];
    static ref SOUNDCLOUD_PLAYLISTS: Vec<Regex> = vec![
        Regex::new(r"(?i)soundcloud\.com/[\w-]+/sets/").unwrap(),
    ];

    static ref TWITCH_URLS: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|m\.)?twitch\.tv/videos/\d+").unwrap(),
        Regex::new(r"(?i)^https?://clips\.twitch\.tv/[\w-]+").unwrap(),
        Regex::new(r"(?i)^https?://(?:www\.|m\.)?twitch\.tv/\w+/clip/[\w-]+").unwrap(),
        Regex::new(r"(?i)^https?://(?:www\.|m\.)?twitch\.tv/\w+/?$").unwrap(),
    ];
    static ref TWITCH_LIVE: Vec<Regex> = vec![
        Regex::new(r"(?i)^https?://(?:www\.|m\.)?twitch\.tv/\w+/?$").unwrap(),
    ];
}

pub(super) fn builtin(tag: SourceTag) -> SourceAdapter {
    match tag {
        SourceTag::YouTube => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 2160,
                containers: &["mp4", "webm", "mkv", "mp3", "m4a", "opus"],
                audio_only: true,
                video_only: true,
                live: true,
                clips: true,
                playlists: true,
                auth: true,
                requires_ffmpeg: true,
                needs_compat_reencode: false,
            },
            YOUTUBE_URLS.clone(),
            YOUTUBE_PLAYLISTS.clone(),
            YOUTUBE_LIVE.clone(),
        ),
        SourceTag::Vimeo => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 2160,
                containers: &["mp4", "mkv", "mp3", "m4a"],
                audio_only: true,
                video_only: true,
                live: false,
                clips: true,
                playlists: true,
                auth: true,
                requires_ffmpeg: true,
                needs_compat_reencode: false,
            },
            VIMEO_URLS.clone(),
            VIMEO_PLAYLISTS.clone(),
            Vec::new(),
        ),
        SourceTag::TikTok => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 1080,
                containers: &["mp4", "mp3", "m4a"],
                audio_only: true,
                video_only: false,
                live: false,
                clips: false,
                playlists: false,
                auth: false,
                requires_ffmpeg: false,
                needs_compat_reencode: true,
            },
            TIKTOK_URLS.clone(),
            Vec::new(),
            TIKTOK_LIVE.clone(),
        ),
        SourceTag::Instagram => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 1080,
                containers: &["mp4", "mp3", "m4a"],
                audio_only: true,
                video_only: false,
                live: false,
                clips: false,
                playlists: false,
                auth: true,
                requires_ffmpeg: true,
                needs_compat_reencode: true,
            },
            INSTAGRAM_URLS.clone(),
            Vec::new(),
            Vec::new(),
        ),
        SourceTag::Twitter => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 1080,
                containers: &["mp4", "mp3", "m4a"],
                audio_only: true,
                video_only: false,
                live: false,
                clips: true,
                playlists: false,
                auth: true,
                requires_ffmpeg: true,
                needs_compat_reencode: false,
            },
            TWITTER_URLS.clone(),
            Vec::new(),
            Vec::new(),
        ),
        SourceTag::SoundCloud => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 0,
                containers: &["mp3", "m4a", "opus"],
                audio_only: true,
                video_only: false,
                live: false,
                clips: false,
                playlists: true,
                auth: true,
                requires_ffmpeg: true,
                needs_compat_reencode: false,
            },
            SOUNDCLOUD_URLS.clone(),
            SOUNDCLOUD_PLAYLISTS.clone(),
            Vec::new(),
        ),
        SourceTag::Twitch => SourceAdapter::new(
            tag,
            Capabilities {
                max_height: 1080,
                containers: &["mp4", "mkv"],
                audio_only: true,
                video_only: true,
                live: true,
                clips: true,
                playlists: false,
                auth: false,
                requires_ffmpeg: true,
                needs_compat_reencode: false,
            },
            TWITCH_URLS.clone(),
            Vec::new(),
            TWITCH_LIVE.clone(),
        ),
    }
}

/// Site-specific download arguments, placed before the URL
pub(super) fn download_fragments(adapter: &SourceAdapter, job: &Job) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match adapter.tag() {
        SourceTag::YouTube => {
            // Several clients in one call gets around SABR-only responses
            args.push("--extractor-args".to_string());
            args.push("youtube:player_client=web,web_safari,ios".to_string());
            // IPv6 ranges get throttled more often
            args.push("--force-ipv4".to_string());
        }
        SourceTag::Vimeo => {
            args.push("--referer".to_string());
            args.push("https://vimeo.com/".to_string());
        }
        SourceTag::TikTok => {
            args.push("--add-header".to_string());
            args.push("Referer:https://www.tiktok.com/".to_string());
        }
        SourceTag::Instagram | SourceTag::Twitter => {
            args.push("--no-check-certificates".to_string());
        }
        SourceTag::SoundCloud => {
            args.push("--embed-thumbnail".to_string());
            args.push("--add-metadata".to_string());
        }
        SourceTag::Twitch => {
            if adapter.is_live_stream(&job.url) {
                args.push("--hls-use-mpegts".to_string());
                args.push("--live-from-start".to_string());
            }
        }
    }

    args
}

/// Site-specific describe-call arguments
pub(super) fn describe_fragments(tag: SourceTag) -> Vec<String> {
    match tag {
        SourceTag::YouTube => vec![
            "--extractor-args".to_string(),
            "youtube:player_client=web,web_safari,ios".to_string(),
        ],
        SourceTag::Vimeo => vec!["--referer".to_string(), "https://vimeo.com/".to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_has_url_rules() {
        for tag in SourceTag::ALL {
            let adapter = builtin(tag);
            assert_eq!(adapter.tag(), tag);
            assert!(!adapter.url_rules.is_empty(), "{} has no rules", tag);
        }
    }

    #[test]
    fn soundcloud_is_audio_only() {
        let caps = builtin(SourceTag::SoundCloud).capabilities;
        assert_eq!(caps.max_height, 0);
        assert!(caps.audio_only && !caps.video_only);
    }

    #[test]
    fn describe_fragments_only_where_needed() {
        assert!(describe_fragments(SourceTag::TikTok).is_empty());
        assert_eq!(describe_fragments(SourceTag::YouTube).len(), 2);
    }
}
