// InfoExtractor trait and describe-call result types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::NetworkConfig;

/// Configuration for describe calls
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Proxy and socket timeout passed to yt-dlp
    pub network: NetworkConfig,
    /// Deadline for the whole describe call, in seconds
    pub timeout_seconds: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            timeout_seconds: 30,
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.network.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Extended format information from yt-dlp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedFormat {
    /// Format ID (e.g., "137", "140")
    pub format_id: String,
    /// File extension (mp4, webm, m4a)
    pub ext: String,
    /// Resolution string (e.g., "1920x1080")
    pub resolution: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    /// Video codec (avc1, vp9, av01, none)
    pub vcodec: Option<String>,
    /// Audio codec (mp4a, opus, none)
    pub acodec: Option<String>,
    /// File size in bytes
    pub filesize: Option<u64>,
    /// Approximate file size (when exact is unknown)
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    pub format_note: Option<String>,
    pub video_only: bool,
    pub audio_only: bool,
}

impl ExtendedFormat {
    /// Get effective file size (exact or approximate)
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    pub fn is_h264(&self) -> bool {
        self.vcodec.as_ref().map_or(false, |v| v.starts_with("avc1"))
    }

    pub fn is_aac(&self) -> bool {
        self.acodec.as_ref().map_or(false, |a| a.starts_with("mp4a"))
    }
}

/// Single-item describe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedVideoInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_seconds: u64,
    pub thumbnail: String,
    pub webpage_url: String,
    pub is_live: bool,
    pub formats: Vec<ExtendedFormat>,
}

/// One entry of a flat collection listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration_seconds: Option<u64>,
}

/// Collection (playlist, set, channel) describe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub entries: Vec<PlaylistEntry>,
}

/// Describe-call seam: metadata only, never downloads media
#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    /// Describe a single item
    async fn describe(&self, url: &str) -> Result<ExtendedVideoInfo, DownloadError>;

    /// Describe a collection without resolving each entry
    async fn describe_collection(&self, url: &str) -> Result<PlaylistInfo, DownloadError>;
}
