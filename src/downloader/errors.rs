// Error types for the download core

use thiserror::Error;

use super::classifier::Classification;
use super::models::{JobId, JobStatus};
use super::sources::SourceTag;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// No registered adapter recognises the URL
    #[error("Unsupported URL: {0}")]
    UnsupportedSource(String),

    /// The adapter exists but declares no support for the requested operation
    #[error("{platform} does not support {operation}")]
    UnsupportedOperation {
        platform: SourceTag,
        operation: String,
    },

    /// The request itself is malformed (bad clip bounds, empty URL ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// yt-dlp or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Spawning or waiting on a command failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// The supervisor killed the process after its deadline
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The process was terminated on request
    #[error("Cancelled")]
    Cancelled,

    /// The process exited with a failure the classifier has already looked at
    #[error("{}", .0.message)]
    ProcessFailed(Classification),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DownloadError {
    /// Text handed to the error classifier when a failure did not come from stderr
    pub fn diagnostic_text(&self) -> String {
        match self {
            Self::ProcessFailed(c) => c.message.clone(),
            Self::Timeout(secs) => format!("timed out after {}s", secs),
            Self::ToolNotFound(tool) => format!("{} not found", tool),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_operation_names_the_platform() {
        let err = DownloadError::UnsupportedOperation {
            platform: SourceTag::SoundCloud,
            operation: "video-only downloads".to_string(),
        };
        assert_eq!(err.to_string(), "SoundCloud does not support video-only downloads");
    }

    #[test]
    fn timeout_text_is_classifiable() {
        assert_eq!(DownloadError::Timeout(30).diagnostic_text(), "timed out after 30s");
    }
}
