// Completion hooks run before a job is marked completed

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::errors::DownloadError;
use super::models::{Job, OutputKind};
use super::sources::SourceRegistry;
use super::traits::{PostProcessor, ProcessOutput};
use super::utils::run_output_with_timeout;
use crate::ytdlp::error_preview;

const PROBE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REENCODE_TIMEOUT_SECS: u64 = 1800;

lazy_static::lazy_static! {
    // Stream #0:0[0x1](und): Video: hevc (Main) (hvc1 / 0x31637668), yuv420p ...
    static ref VIDEO_STREAM_RE: Regex = Regex::new(r"Stream #\d+:\d+.*?: Video: (\w+)").unwrap();
}

/// First video codec named in `ffmpeg -i` output
pub fn parse_video_codec(probe_stderr: &str) -> Option<String> {
    VIDEO_STREAM_RE
        .captures(probe_stderr)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Codecs that stock players on older devices refuse
pub fn needs_reencode(codec: &str) -> bool {
    matches!(codec, "hevc" | "h265" | "vp9" | "vp8" | "av1")
}

pub fn reencode_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "20".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Re-encodes HEVC/VP9/AV1 output from sources flagged with
/// `needs_compat_reencode` into H.264/AAC MP4.
pub struct CodecCompatibility {
    ffmpeg: Option<String>,
    registry: Arc<SourceRegistry>,
    timeout_secs: u64,
}

impl CodecCompatibility {
    pub fn new(ffmpeg: Option<String>, registry: Arc<SourceRegistry>) -> Self {
        Self {
            ffmpeg,
            registry,
            timeout_secs: DEFAULT_REENCODE_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn applies_to(&self, job: &Job) -> bool {
        job.kind != OutputKind::Audio
            && self
                .registry
                .get(job.source)
                .map_or(false, |adapter| adapter.capabilities().needs_compat_reencode)
    }
}

#[async_trait]
impl PostProcessor for CodecCompatibility {
    fn name(&self) -> &'static str {
        "codec-compat"
    }

    async fn process(&self, job: &Job, output: &ProcessOutput) -> Result<Option<PathBuf>, DownloadError> {
        let ffmpeg = match &self.ffmpeg {
            Some(ffmpeg) => ffmpeg,
            None => return Ok(None),
        };
        if !self.applies_to(job) {
            return Ok(None);
        }
        let input = match job.output_file.as_ref().or(output.output_file.as_ref()) {
            Some(path) if path.exists() => path.clone(),
            _ => return Ok(None),
        };

        let probe_args = vec![
            "-hide_banner".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
        ];
        // Exits non-zero without an output file; the stream table is still printed
        let probe = run_output_with_timeout(ffmpeg, &probe_args, PROBE_TIMEOUT_SECS).await?;
        let codec = match parse_video_codec(&String::from_utf8_lossy(&probe.stderr)) {
            Some(codec) => codec,
            None => {
                debug!(job = %job.id, file = %input.display(), "no video stream found");
                return Ok(None);
            }
        };
        if !needs_reencode(&codec) {
            debug!(job = %job.id, codec = %codec, "codec is compatible");
            return Ok(None);
        }

        info!(job = %job.id, codec = %codec, "re-encoding to H.264 for compatibility");
        let target = input.with_extension("mp4");
        let scratch = input.with_extension("compat.mp4");

        let result = match run_output_with_timeout(ffmpeg, &reencode_args(&input, &scratch), self.timeout_secs).await {
            Ok(result) => result,
            Err(e) => {
                let _ = std::fs::remove_file(&scratch);
                return Err(e);
            }
        };
        if !result.status.success() {
            let _ = std::fs::remove_file(&scratch);
            return Err(DownloadError::ExecutionError(format!(
                "ffmpeg re-encode failed: {}",
                error_preview(&String::from_utf8_lossy(&result.stderr))
            )));
        }

        std::fs::rename(&scratch, &target)?;
        if target != input {
            std::fs::remove_file(&input)?;
        }
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{JobId, JobRequest};
    use crate::downloader::sources::SourceTag;
    use time::OffsetDateTime;

    const PROBE: &str = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':
  Duration: 00:00:15.02, start: 0.000000, bitrate: 1830 kb/s
  Stream #0:0[0x1](und): Video: hevc (Main) (hvc1 / 0x31637668), yuv420p(tv), 720x1280, 1700 kb/s, 30 fps
  Stream #0:1[0x2](und): Audio: aac (LC) (mp4a / 0x6134706D), 44100 Hz, stereo, fltp, 128 kb/s
At least one output file must be specified";

    fn job(source: SourceTag, kind: OutputKind, file: Option<PathBuf>) -> Job {
        let mut job = Job::from_request(
            JobId(7),
            JobRequest::new("https://example.com/v").with_kind(kind),
            source,
            PathBuf::from("/tmp"),
            OffsetDateTime::UNIX_EPOCH,
        );
        job.output_file = file;
        job
    }

    #[test]
    fn parses_video_codec_from_probe() {
        assert_eq!(parse_video_codec(PROBE).as_deref(), Some("hevc"));
        assert_eq!(parse_video_codec("  Stream #0:0: Audio: mp3, 44100 Hz"), None);
    }

    #[test]
    fn reencode_codecs() {
        assert!(needs_reencode("hevc"));
        assert!(needs_reencode("vp9"));
        assert!(needs_reencode("av1"));
        assert!(!needs_reencode("h264"));
    }

    #[test]
    fn reencode_args_write_faststart_h264() {
        let args = reencode_args(Path::new("/in.webm"), Path::new("/out.mp4"));
        assert_eq!(args.first().map(String::as_str), Some("-hide_banner"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libx264"));
        assert!(args.windows(2).any(|w| w[0] == "-movflags" && w[1] == "+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
    }

    #[tokio::test]
    async fn skips_sources_audio_and_missing_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("clip.mp4");
        std::fs::write(&file, b"not really a video").unwrap();

        let registry = Arc::new(SourceRegistry::with_defaults());
        let pp = CodecCompatibility::new(Some("ffmpeg-that-does-not-exist".to_string()), registry.clone());
        let output = ProcessOutput::default();

        // YouTube output is never touched
        let yt = job(SourceTag::YouTube, OutputKind::Muxed, Some(file.clone()));
        assert_eq!(pp.process(&yt, &output).await.unwrap(), None);

        // Audio extraction has no video stream to fix
        let audio = job(SourceTag::TikTok, OutputKind::Audio, Some(file.clone()));
        assert_eq!(pp.process(&audio, &output).await.unwrap(), None);

        // Nothing on disk
        let missing = job(SourceTag::TikTok, OutputKind::Muxed, Some(tmp.path().join("gone.mp4")));
        assert_eq!(pp.process(&missing, &output).await.unwrap(), None);

        // No ffmpeg configured
        let no_ffmpeg = CodecCompatibility::new(None, registry);
        let tiktok = job(SourceTag::TikTok, OutputKind::Muxed, Some(file));
        assert_eq!(no_ffmpeg.process(&tiktok, &output).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_is_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();

        let pp = CodecCompatibility::new(
            Some("ffmpeg-that-does-not-exist".to_string()),
            Arc::new(SourceRegistry::with_defaults()),
        );
        let tiktok = job(SourceTag::TikTok, OutputKind::Muxed, Some(file));
        let err = pp.process(&tiktok, &ProcessOutput::default()).await.unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
