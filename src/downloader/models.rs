// Common data models for the download queue

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::errors::DownloadError;
use super::sources::SourceTag;

/// Queue-wide identity of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Allowed edges of the job state machine.
    /// `Error -> Pending` is the retry edge; the orchestrator enforces the cap.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Downloading)
                | (Self::Downloading, Self::Completed)
                | (Self::Downloading, Self::Error)
                | (Self::Downloading, Self::Cancelled)
                | (Self::Error, Self::Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What the user wants to end up with on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Video stream only, no audio track
    Video,
    /// Audio extracted to a standalone file
    Audio,
    /// Video and audio merged into one container
    #[default]
    Muxed,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Muxed => "video+audio",
        };
        f.write_str(s)
    }
}

/// Clip bounds in seconds; an open end runs to the end of the media
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    pub start_secs: f64,
    pub end_secs: Option<f64>,
}

impl ClipRange {
    pub fn new(start_secs: f64, end_secs: Option<f64>) -> Self {
        Self {
            start_secs: start_secs.max(0.0),
            end_secs,
        }
    }

    /// Section spec understood by `--download-sections`
    pub fn section_spec(&self) -> String {
        match self.end_secs {
            Some(end) => format!("*{}-{}", self.start_secs, end),
            None => format!("*{}-inf", self.start_secs),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start_secs.is_finite()
            && self.end_secs.map_or(true, |end| end.is_finite() && end > self.start_secs)
    }
}

/// Plain submission record accepted by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    #[serde(default)]
    pub kind: OutputKind,
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Falls back to the configured download directory
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub clip: Option<ClipRange>,
    /// Requested container (mp4, mkv, webm, mp3, m4a ...)
    #[serde(default)]
    pub container: Option<String>,
}

fn default_quality() -> String {
    "best".to_string()
}

impl JobRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: OutputKind::default(),
            quality: default_quality(),
            output_dir: None,
            clip: None,
            container: None,
        }
    }

    pub fn with_kind(mut self, kind: OutputKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_clip(mut self, clip: ClipRange) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// One user-requested download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub source: SourceTag,
    pub kind: OutputKind,
    pub quality: String,
    pub container: Option<String>,
    pub output_dir: PathBuf,
    pub clip: Option<ClipRange>,
    pub status: JobStatus,
    /// 0..=100, never decreases while downloading
    pub progress: f32,
    pub retry_count: u32,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    /// Most relevant raw line behind `error`
    pub error_detail: Option<String>,
    /// Suggested remedy attached to the last error
    pub hint: Option<String>,
    /// Last human-readable status line
    pub status_text: String,
    /// Final file reported by yt-dlp
    pub output_file: Option<PathBuf>,
    /// Set by `cancel`; honoured when the process exit event arrives
    #[serde(skip)]
    pub(crate) cancel_requested: bool,
    /// An automatic retry is waiting out its delay
    #[serde(skip)]
    pub(crate) retry_scheduled: bool,
}

impl Job {
    pub(crate) fn from_request(
        id: JobId,
        request: JobRequest,
        source: SourceTag,
        default_dir: PathBuf,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            url: request.url.trim().to_string(),
            source,
            kind: request.kind,
            quality: request.quality,
            container: request.container,
            output_dir: request.output_dir.unwrap_or(default_dir),
            clip: request.clip,
            status: JobStatus::Pending,
            progress: 0.0,
            retry_count: 0,
            created_at: now,
            completed_at: None,
            error: None,
            error_detail: None,
            hint: None,
            status_text: "Queued".to_string(),
            output_file: None,
            cancel_requested: false,
            retry_scheduled: false,
        }
    }

    /// Move along one edge of the state machine
    pub(crate) fn transition(&mut self, to: JobStatus) -> Result<(), DownloadError> {
        if !self.status.can_transition_to(to) {
            return Err(DownloadError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Not terminal, or terminal with an automatic retry still pending
    pub(crate) fn is_live(&self) -> bool {
        !self.status.is_terminal() || self.retry_scheduled
    }

    /// Record a progress report; returns false when the value was dropped
    /// because it would move progress backwards or the job is not running.
    pub(crate) fn advance_progress(&mut self, percent: f32) -> bool {
        if self.status != JobStatus::Downloading || !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent < self.progress {
            return false;
        }
        self.progress = percent;
        true
    }
}

/// Download progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub job_id: JobId,
    pub percent: f32,
    pub status: String,
}

/// Network configuration for argument builders
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// SOCKS5/HTTP proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Socket timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::from_request(
            JobId(1),
            JobRequest::new(" https://youtu.be/abc "),
            SourceTag::YouTube,
            PathBuf::from("/tmp"),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn state_machine_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Cancelled));
        assert!(Error.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Downloading));
        assert!(!Completed.can_transition_to(Error));
    }

    #[test]
    fn transition_rejects_illegal_edges() {
        let mut job = job();
        assert!(job.transition(JobStatus::Completed).is_err());
        job.transition(JobStatus::Downloading).unwrap();
        job.transition(JobStatus::Cancelled).unwrap();
        let err = job.transition(JobStatus::Pending).unwrap_err();
        assert!(matches!(
            err,
            DownloadError::InvalidTransition { from: JobStatus::Cancelled, to: JobStatus::Pending, .. }
        ));
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut job = job();
        assert!(!job.advance_progress(10.0), "pending jobs ignore progress");

        job.status = JobStatus::Downloading;
        assert!(job.advance_progress(40.0));
        assert!(!job.advance_progress(12.0));
        assert_eq!(job.progress, 40.0);
        assert!(job.advance_progress(250.0));
        assert_eq!(job.progress, 100.0);
        assert!(!job.advance_progress(f32::NAN));
    }

    #[test]
    fn request_defaults_and_trim() {
        let job = job();
        assert_eq!(job.url, "https://youtu.be/abc");
        assert_eq!(job.quality, "best");
        assert_eq!(job.kind, OutputKind::Muxed);
        assert_eq!(job.output_dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn clip_section_spec() {
        assert_eq!(ClipRange::new(5.0, Some(12.5)).section_spec(), "*5-12.5");
        assert_eq!(ClipRange::new(-3.0, None).section_spec(), "*0-inf");
        assert!(!ClipRange::new(10.0, Some(5.0)).is_valid());
    }
}
