// Application configuration, stored as JSON under the user config directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::downloader::bandwidth::BandwidthSettings;
use crate::downloader::cache::CacheConfig;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::NetworkConfig;
use crate::downloader::monitor::MemoryThresholds;
use crate::downloader::orchestrator::{clamp_concurrency, OrchestratorConfig};
use crate::downloader::tools::ToolPaths;
use crate::downloader::utils::{auto_detect_proxy, NetworkClass};

const APP_DIR: &str = "media-downloader";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub video_ttl_secs: u64,
    pub collection_ttl_secs: u64,
    pub max_video_entries: usize,
    pub max_collection_entries: usize,
    /// Keep the cache across runs in the user cache directory
    pub persist: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            video_ttl_secs: 3600,
            collection_ttl_secs: 1800,
            max_video_entries: 100,
            max_collection_entries: 50,
            persist: true,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            video_ttl: Duration::from_secs(self.video_ttl_secs),
            collection_ttl: Duration::from_secs(self.collection_ttl_secs),
            max_video_entries: self.max_video_entries,
            max_collection_entries: self.max_collection_entries,
            ..CacheConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub download_timeout_secs: u64,
    pub describe_timeout_secs: u64,
    pub keep_history: bool,
    /// Falls back to the platform download directory
    pub output_dir: Option<PathBuf>,
    pub proxy: Option<String>,
    /// Probe for a local SOCKS5 proxy when `proxy` is unset
    pub auto_detect_proxy: bool,
    pub socket_timeout_secs: Option<u32>,
    pub ytdlp_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub bandwidth: BandwidthSettings,
    /// Skip interface detection and assume this link class
    pub network_class: Option<NetworkClass>,
    pub cache: CacheSettings,
    pub memory: MemoryThresholds,
    pub maintenance_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            retry_delay_secs: 5,
            download_timeout_secs: 3600,
            describe_timeout_secs: 30,
            keep_history: true,
            output_dir: None,
            proxy: None,
            auto_detect_proxy: true,
            socket_timeout_secs: Some(30),
            ytdlp_path: None,
            ffmpeg_path: None,
            bandwidth: BandwidthSettings::default(),
            network_class: None,
            cache: CacheSettings::default(),
            memory: MemoryThresholds::default(),
            maintenance_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// `<config dir>/media-downloader/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location; defaults when there is no file
    pub fn load() -> Result<Self, DownloadError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, DownloadError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, DownloadError> {
        let path = Self::default_path()
            .ok_or_else(|| DownloadError::ExecutionError("no config directory on this platform".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), DownloadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Explicit proxy, else an auto-detected one when enabled
    pub fn network_config(&self) -> NetworkConfig {
        let proxy = match &self.proxy {
            Some(proxy) if !proxy.trim().is_empty() => Some(proxy.trim().to_string()),
            _ if self.auto_detect_proxy => auto_detect_proxy(),
            _ => None,
        };
        NetworkConfig {
            proxy,
            timeout: self.socket_timeout_secs,
        }
    }

    pub fn orchestrator_config(&self, tools: &ToolPaths, network: NetworkConfig) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            max_concurrent: clamp_concurrency(self.max_concurrent),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            keep_history: self.keep_history,
            default_output_dir: self.output_dir.clone().unwrap_or(defaults.default_output_dir),
            ytdlp_path: tools.ytdlp.clone(),
            ffmpeg_path: tools.ffmpeg.clone(),
            network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load_from(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.download_timeout_secs, 3600);
        assert!(config.keep_history);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"max_concurrent": 5, "bandwidth": {"enabled": true, "manual_limit_kib": 512}}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_retries, 3);
        assert!(config.bandwidth.enabled);
        assert_eq!(config.bandwidth.manual_limit_kib, 512);
        assert_eq!(config.cache, CacheSettings::default());
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/config.json");
        let config = AppConfig {
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            network_class: Some(NetworkClass::Mobile),
            ..AppConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.proxy, config.proxy);
        assert_eq!(loaded.network_class, Some(NetworkClass::Mobile));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(DownloadError::Json(_))));
    }

    #[test]
    fn orchestrator_config_clamps_and_uses_tools() {
        let config = AppConfig {
            max_concurrent: 40,
            output_dir: Some(PathBuf::from("/data/media")),
            ..AppConfig::default()
        };
        let tools = ToolPaths {
            ytdlp: "/usr/bin/yt-dlp".to_string(),
            ffmpeg: None,
        };
        let orch = config.orchestrator_config(&tools, NetworkConfig::default());
        assert_eq!(orch.max_concurrent, 16);
        assert_eq!(orch.ytdlp_path, "/usr/bin/yt-dlp");
        assert_eq!(orch.ffmpeg_path, None);
        assert_eq!(orch.default_output_dir, PathBuf::from("/data/media"));
    }

    #[test]
    fn explicit_proxy_skips_detection() {
        let config = AppConfig {
            proxy: Some(" http://proxy:3128 ".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(config.network_config().proxy.as_deref(), Some("http://proxy:3128"));

        let direct = AppConfig {
            auto_detect_proxy: false,
            ..AppConfig::default()
        };
        assert_eq!(direct.network_config().proxy, None);
    }
}
