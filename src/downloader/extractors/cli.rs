// CLI InfoExtractor - runs the yt-dlp binary in describe mode
//
// Arguments come from the source registry so site-specific describe fragments
// and the proxy live in one place. A non-zero exit is classified before it is
// returned; malformed JSON is a parse failure for this call only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::traits::{
    ExtendedFormat, ExtendedVideoInfo, ExtractorConfig, InfoExtractor, PlaylistEntry, PlaylistInfo,
};
use crate::downloader::classifier::ErrorClassifier;
use crate::downloader::errors::DownloadError;
use crate::downloader::sources::SourceRegistry;
use crate::downloader::utils::run_output_with_timeout;

/// CLI-based info extractor using yt-dlp binary
pub struct CliInfoExtractor {
    ytdlp_path: String,
    registry: Arc<SourceRegistry>,
    classifier: Arc<ErrorClassifier>,
    config: ExtractorConfig,
}

impl CliInfoExtractor {
    pub fn new(
        ytdlp_path: impl Into<String>,
        registry: Arc<SourceRegistry>,
        classifier: Arc<ErrorClassifier>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            registry,
            classifier,
            config,
        }
    }

    async fn run(&self, url: &str, collection: bool) -> Result<serde_json::Value, DownloadError> {
        let args = self
            .registry
            .describe_args(url, collection, &self.config.network)?;
        debug!(program = %self.ytdlp_path, args = %args.join(" "), "describe call");

        let output = run_output_with_timeout(&self.ytdlp_path, &args, self.config.timeout_seconds).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let source = self.registry.detect(url).map(|a| a.tag());
            let classification = self.classifier.classify(&stderr, source);
            warn!(url, kind = ?classification.kind, "describe call failed: {}", classification.message);
            return Err(DownloadError::ProcessFailed(classification));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON from yt-dlp: {}", e)))
    }
}

/// Parse a `--dump-json` document
pub(crate) fn parse_video_json(json: &serde_json::Value) -> Result<ExtendedVideoInfo, DownloadError> {
    if !json.is_object() {
        return Err(DownloadError::ParseError("describe output is not a JSON object".to_string()));
    }
    let formats = parse_formats(json)?;

    Ok(ExtendedVideoInfo {
        id: json["id"].as_str().unwrap_or("unknown").to_string(),
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        uploader: json["uploader"].as_str().unwrap_or("Unknown").to_string(),
        duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
        thumbnail: json["thumbnail"].as_str().unwrap_or("").to_string(),
        webpage_url: json["webpage_url"].as_str().unwrap_or("").to_string(),
        is_live: json["is_live"].as_bool().unwrap_or(false),
        formats,
    })
}

fn parse_formats(json: &serde_json::Value) -> Result<Vec<ExtendedFormat>, DownloadError> {
    let formats_array = json["formats"]
        .as_array()
        .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

    let formats = formats_array
        .iter()
        .map(|f| {
            let vcodec = f["vcodec"].as_str().map(|s| s.to_string());
            let acodec = f["acodec"].as_str().map(|s| s.to_string());

            let video_only = vcodec.as_ref().map_or(false, |v| v != "none")
                && acodec.as_ref().map_or(true, |a| a == "none");
            let audio_only = acodec.as_ref().map_or(false, |a| a != "none")
                && vcodec.as_ref().map_or(true, |v| v == "none");

            ExtendedFormat {
                format_id: f["format_id"].as_str().unwrap_or("").to_string(),
                ext: f["ext"].as_str().unwrap_or("").to_string(),
                resolution: f["resolution"].as_str().map(|s| s.to_string()),
                width: f["width"].as_u64().map(|w| w as u32),
                height: f["height"].as_u64().map(|h| h as u32),
                fps: f["fps"].as_f64().map(|fps| fps as f32),
                vcodec,
                acodec,
                filesize: f["filesize"].as_u64(),
                filesize_approx: f["filesize_approx"].as_u64(),
                tbr: f["tbr"].as_f64().map(|t| t as f32),
                format_note: f["format_note"].as_str().map(|s| s.to_string()),
                video_only,
                audio_only,
            }
        })
        .collect();

    Ok(formats)
}

/// Parse a `--flat-playlist --dump-single-json` document
pub(crate) fn parse_playlist_json(json: &serde_json::Value) -> Result<PlaylistInfo, DownloadError> {
    let entries = json["entries"]
        .as_array()
        .ok_or_else(|| DownloadError::ParseError("No entries array in playlist JSON".to_string()))?;

    let entries = entries
        .iter()
        .filter_map(|e| {
            let url = e["url"]
                .as_str()
                .or_else(|| e["webpage_url"].as_str())?
                .to_string();
            Some(PlaylistEntry {
                id: e["id"].as_str().unwrap_or("").to_string(),
                title: e["title"].as_str().unwrap_or("Unknown").to_string(),
                url,
                duration_seconds: e["duration"].as_f64().map(|d| d as u64),
            })
        })
        .collect();

    Ok(PlaylistInfo {
        id: json["id"].as_str().unwrap_or("unknown").to_string(),
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        uploader: json["uploader"]
            .as_str()
            .or_else(|| json["channel"].as_str())
            .unwrap_or("Unknown")
            .to_string(),
        entries,
    })
}

#[async_trait]
impl InfoExtractor for CliInfoExtractor {
    fn name(&self) -> &'static str {
        "cli-yt-dlp"
    }

    async fn describe(&self, url: &str) -> Result<ExtendedVideoInfo, DownloadError> {
        let json = self.run(url, false).await?;
        parse_video_json(&json)
    }

    async fn describe_collection(&self, url: &str) -> Result<PlaylistInfo, DownloadError> {
        let json = self.run(url, true).await?;
        parse_playlist_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_video_document() {
        let doc = json!({
            "id": "jNQXAC9IVRw",
            "title": "Me at the zoo",
            "uploader": "jawed",
            "duration": 19.0,
            "webpage_url": "https://www.youtube.com/watch?v=jNQXAC9IVRw",
            "formats": [
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "filesize": 300000},
                {"format_id": "134", "ext": "mp4", "vcodec": "avc1.4d401e", "acodec": "none", "height": 360},
                {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "height": 360}
            ]
        });

        let info = parse_video_json(&doc).unwrap();
        assert_eq!(info.title, "Me at the zoo");
        assert_eq!(info.duration_seconds, 19);
        assert!(!info.is_live);
        assert_eq!(info.formats.len(), 3);
        assert!(info.formats[0].audio_only && info.formats[0].is_aac());
        assert!(info.formats[1].video_only && info.formats[1].is_h264());
        assert!(!info.formats[2].video_only && !info.formats[2].audio_only);
    }

    #[test]
    fn missing_formats_is_parse_error() {
        let err = parse_video_json(&json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, DownloadError::ParseError(_)));
        assert!(parse_video_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn parses_flat_playlist() {
        let doc = json!({
            "id": "PL123",
            "title": "Mix",
            "channel": "someone",
            "entries": [
                {"id": "a", "title": "First", "url": "https://www.youtube.com/watch?v=a", "duration": 61.5},
                {"id": "b", "title": "No url"},
                {"id": "c", "webpage_url": "https://www.youtube.com/watch?v=c"}
            ]
        });

        let info = parse_playlist_json(&doc).unwrap();
        assert_eq!(info.uploader, "someone");
        assert_eq!(info.entries.len(), 2);
        assert_eq!(info.entries[0].duration_seconds, Some(61));
        assert_eq!(info.entries[1].title, "Unknown");
    }

    #[tokio::test]
    async fn unsupported_url_fails_before_spawning() {
        let extractor = CliInfoExtractor::new(
            "definitely-not-a-real-binary-xyz",
            Arc::new(SourceRegistry::with_defaults()),
            Arc::new(ErrorClassifier::with_defaults()),
            ExtractorConfig::default(),
        );
        let err = extractor.describe("https://example.com/v.mp4").await.unwrap_err();
        assert!(matches!(err, DownloadError::UnsupportedSource(_)));

        let err = extractor.describe("https://youtu.be/abc").await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
