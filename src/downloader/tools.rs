// External tool discovery: yt-dlp and ffmpeg

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::DownloadError;
use super::utils::run_output_with_timeout;

const VERSION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }

    fn binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Resolved executables handed to the orchestrator
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub ytdlp: String,
    /// `None` disables everything that needs transcoding
    pub ffmpeg: Option<String>,
}

/// Pull the bare version out of `--version` / `-version` output
pub fn parse_version(tool_type: ToolType, stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    match tool_type {
        // "ffmpeg version 6.1.1 Copyright (c) 2000-2023 ..."
        ToolType::Ffmpeg => first
            .strip_prefix("ffmpeg version ")
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_string)
            .or_else(|| Some(first.to_string())),
        ToolType::YtDlp => Some(first.to_string()),
    }
}

pub struct ToolManager {
    ytdlp_override: Option<String>,
    ffmpeg_override: Option<String>,
}

impl ToolManager {
    pub fn new(ytdlp_override: Option<String>, ffmpeg_override: Option<String>) -> Self {
        Self {
            ytdlp_override,
            ffmpeg_override,
        }
    }

    fn override_for(&self, tool_type: ToolType) -> Option<&str> {
        match tool_type {
            ToolType::YtDlp => self.ytdlp_override.as_deref(),
            ToolType::Ffmpeg => self.ffmpeg_override.as_deref(),
        }
    }

    /// Configured path, then common install locations, then `PATH`
    pub fn locate(&self, tool_type: ToolType) -> Option<PathBuf> {
        if let Some(path) = self.override_for(tool_type) {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Some(path);
            }
            warn!(tool = tool_type.as_str(), path = %path.display(), "configured tool path does not exist");
        }

        let binary = tool_type.binary_name();
        let mut candidates: Vec<PathBuf> = ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"]
            .iter()
            .map(|dir| Path::new(dir).join(&binary))
            .collect();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".local/bin").join(&binary));
        }

        if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
            return Some(found);
        }

        std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(&binary))
                .find(|p| p.is_file())
        })
    }

    async fn version(&self, tool_type: ToolType, path: &Path) -> Option<String> {
        let program = path.to_string_lossy();
        let args = vec![tool_type.version_arg().to_string()];
        match run_output_with_timeout(&program, &args, VERSION_TIMEOUT_SECS).await {
            Ok(output) if output.status.success() => parse_version(tool_type, &String::from_utf8_lossy(&output.stdout)),
            Ok(output) => {
                debug!(tool = tool_type.as_str(), code = ?output.status.code(), "version query failed");
                None
            }
            Err(e) => {
                debug!(tool = tool_type.as_str(), error = %e, "version query failed");
                None
            }
        }
    }

    pub async fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let path = self.locate(tool_type);
        let version = match &path {
            Some(path) => self.version(tool_type, path).await,
            None => None,
        };

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            version,
            is_available: path.is_some(),
            path: path.map(|p| p.to_string_lossy().into_owned()),
        }
    }

    pub async fn get_all_tools(&self) -> Vec<ToolInfo> {
        vec![
            self.get_tool_info(ToolType::YtDlp).await,
            self.get_tool_info(ToolType::Ffmpeg).await,
        ]
    }

    /// yt-dlp is mandatory; a missing ffmpeg only narrows what can be requested
    pub fn resolve(&self) -> Result<ToolPaths, DownloadError> {
        let ytdlp = self
            .locate(ToolType::YtDlp)
            .ok_or_else(|| DownloadError::ToolNotFound(ToolType::YtDlp.as_str().to_string()))?;
        let ffmpeg = self.locate(ToolType::Ffmpeg);
        if ffmpeg.is_none() {
            warn!("ffmpeg not found, merging, clipping and audio extraction are unavailable");
        }

        Ok(ToolPaths {
            ytdlp: ytdlp.to_string_lossy().into_owned(),
            ffmpeg: ffmpeg.map(|p| p.to_string_lossy().into_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_versions() {
        assert_eq!(
            parse_version(ToolType::YtDlp, "2024.08.06\n").as_deref(),
            Some("2024.08.06")
        );
        assert_eq!(
            parse_version(
                ToolType::Ffmpeg,
                "ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers\nbuilt with clang"
            )
            .as_deref(),
            Some("6.1.1")
        );
        assert_eq!(parse_version(ToolType::Ffmpeg, "").as_deref(), None);
    }

    #[test]
    fn configured_path_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fake = tmp.path().join("my-yt-dlp");
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();

        let manager = ToolManager::new(Some(fake.to_string_lossy().into_owned()), None);
        assert_eq!(manager.locate(ToolType::YtDlp), Some(fake));
    }

    #[test]
    fn missing_configured_path_falls_through() {
        let manager = ToolManager::new(Some("/definitely/not/here/yt-dlp".to_string()), None);
        let found = manager.locate(ToolType::YtDlp);
        assert_ne!(found, Some(PathBuf::from("/definitely/not/here/yt-dlp")));
    }
}
