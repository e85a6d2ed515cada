// Helper functions shared by the extractor, post-processor and argument builders

use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::models::NetworkConfig;

/// Coarse class of the link the downloads go over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Wired,
    Wifi,
    Mobile,
    #[default]
    Unknown,
}

/// Network status information for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub proxy: Option<String>,
    pub mode: String, // "direct", "proxy"
    pub class: NetworkClass,
    pub external_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    ip: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimpleIp {
    ip: String,
}

/// Run a short command to completion with a deadline, collecting its output.
/// Used for describe calls and ffmpeg probes, not for downloads.
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DownloadError::ToolNotFound(program.to_string())
            } else {
                DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e))
            }
        })?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => {
            let status = status?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stderr task failed: {}", e)))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::Timeout(timeout_secs))
        }
    }
}

/// Get external IP address via HTTP services (robust with proxy support)
pub async fn get_external_ip(proxy: Option<&str>) -> Option<String> {
    debug!(?proxy, "checking external IP");

    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(10));
    if let Some(proxy_url) = proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(p) => builder = builder.proxy(p),
            Err(e) => warn!(proxy = proxy_url, error = %e, "invalid proxy URL, checking directly"),
        }
    }
    let client = match builder.build() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build HTTP client");
            return None;
        }
    };

    let services = [
        "https://ipinfo.io/json",
        "https://api.ipify.org?format=json",
    ];

    for service in services {
        let text = match client.get(service).send().await {
            Ok(response) => match response.text().await {
                Ok(text) => text,
                Err(_) => continue,
            },
            Err(e) => {
                debug!(service, error = %e, "IP service failed");
                continue;
            }
        };

        if let Ok(info) = serde_json::from_str::<IpInfoResponse>(&text) {
            if let Some(ip) = info.ip {
                return Some(match info.country {
                    Some(country) => format!("{} ({})", ip, country),
                    None => ip,
                });
            }
        }
        if let Ok(simple) = serde_json::from_str::<SimpleIp>(&text) {
            return Some(simple.ip);
        }
    }

    warn!("all IP services failed");
    None
}

/// Get current network status (proxy, class, external IP)
pub async fn get_network_status_info(user_proxy: Option<String>, probe_ip: bool) -> NetworkStatus {
    let proxy = user_proxy.or_else(auto_detect_proxy);
    let mode = if proxy.is_some() { "proxy" } else { "direct" }.to_string();
    let external_ip = if probe_ip {
        get_external_ip(proxy.as_deref()).await
    } else {
        None
    };

    NetworkStatus {
        proxy,
        mode,
        class: detect_network_class(),
        external_ip,
    }
}

/// Auto-detect a local SOCKS5 proxy: XRAY config first, then common ports
pub fn auto_detect_proxy() -> Option<String> {
    if let Some(port) = detect_xray_socks_port() {
        info!(port, "found XRAY SOCKS5 proxy");
        return Some(format!("socks5h://127.0.0.1:{}", port));
    }

    let common_ports = [
        1080,  // Standard SOCKS5
        7890,  // Clash
        10808, // V2RayN
        1081,
        7891,
    ];

    for port in common_ports {
        if test_socks5_port(port) {
            info!(port, "found SOCKS5 proxy on common port");
            return Some(format!("socks5h://127.0.0.1:{}", port));
        }
    }

    debug!("no SOCKS5 proxy detected");
    None
}

/// Detect XRAY SOCKS5 port from config file
fn detect_xray_socks_port() -> Option<u16> {
    let mut config_paths = vec![
        std::env::temp_dir().join("xray_config.json"),
        std::path::PathBuf::from("/tmp/xray_config.json"),
    ];
    if let Some(home) = dirs::home_dir() {
        config_paths.push(home.join(".config/xray/config.json"));
    }

    config_paths
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| socks_port_from_xray_config(&content))
}

fn socks_port_from_xray_config(content: &str) -> Option<u16> {
    let json: serde_json::Value = serde_json::from_str(content).ok()?;
    json["inbounds"]
        .as_array()?
        .iter()
        .find(|inbound| inbound["protocol"].as_str() == Some("socks"))
        .and_then(|inbound| inbound["port"].as_u64())
        .and_then(|port| u16::try_from(port).ok())
}

/// Test if something listens on a local port
fn test_socks5_port(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok()
}

/// Classify the active network from the interface table (Linux sysfs).
/// Falls back to `Unknown` elsewhere.
pub fn detect_network_class() -> NetworkClass {
    classify_interfaces(Path::new("/sys/class/net"))
}

fn classify_interfaces(root: &Path) -> NetworkClass {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return NetworkClass::Unknown,
    };

    let mut found = NetworkClass::Unknown;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "lo" {
            continue;
        }
        let path = entry.path();
        let up = std::fs::read_to_string(path.join("operstate"))
            .map(|s| s.trim() == "up")
            .unwrap_or(false);
        if !up {
            continue;
        }

        let class = if path.join("wireless").exists() || name.starts_with("wl") {
            NetworkClass::Wifi
        } else if name.starts_with("ww") || name.starts_with("rmnet") || name.starts_with("usb") {
            NetworkClass::Mobile
        } else if name.starts_with("en") || name.starts_with("eth") {
            NetworkClass::Wired
        } else {
            continue;
        };

        // Wired wins over anything else that is up
        if class == NetworkClass::Wired {
            return class;
        }
        if found == NetworkClass::Unknown || class == NetworkClass::Wifi {
            found = class;
        }
    }
    found
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(proxy) = &config.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    args
}

/// Build timeout arguments for yt-dlp
pub fn get_timeout_args(config: &NetworkConfig) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(timeout) = config.timeout {
        args.push("--socket-timeout".to_string());
        args.push(timeout.to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_iface(root: &Path, name: &str, state: &str, wireless: bool) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("operstate"), state).unwrap();
        if wireless {
            std::fs::create_dir_all(dir.join("wireless")).unwrap();
        }
    }

    #[test]
    fn wired_beats_wifi() {
        let tmp = tempfile::TempDir::new().unwrap();
        fake_iface(tmp.path(), "lo", "unknown", false);
        fake_iface(tmp.path(), "wlp2s0", "up\n", true);
        fake_iface(tmp.path(), "enp3s0", "up\n", false);
        assert_eq!(classify_interfaces(tmp.path()), NetworkClass::Wired);
    }

    #[test]
    fn down_interfaces_are_ignored() {
        let tmp = tempfile::TempDir::new().unwrap();
        fake_iface(tmp.path(), "enp3s0", "down", false);
        fake_iface(tmp.path(), "wwan0", "up", false);
        assert_eq!(classify_interfaces(tmp.path()), NetworkClass::Mobile);
    }

    #[test]
    fn missing_sysfs_is_unknown() {
        assert_eq!(
            classify_interfaces(Path::new("/definitely/not/here")),
            NetworkClass::Unknown
        );
    }

    #[test]
    fn xray_config_port() {
        let config = r#"{"inbounds":[{"protocol":"http","port":8080},{"protocol":"socks","port":10808}]}"#;
        assert_eq!(socks_port_from_xray_config(config), Some(10808));
        assert_eq!(socks_port_from_xray_config("{}"), None);
    }

    #[test]
    fn network_arg_fragments() {
        let config = NetworkConfig {
            proxy: Some("socks5h://127.0.0.1:1080".to_string()),
            timeout: Some(15),
        };
        assert_eq!(get_proxy_args(&config), vec!["--proxy", "socks5h://127.0.0.1:1080"]);
        assert_eq!(get_timeout_args(&config), vec!["--socket-timeout", "15"]);
        assert!(get_proxy_args(&NetworkConfig::default()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_output_times_out() {
        let err = run_output_with_timeout("sleep", &["5".to_string()], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Timeout(1)));
    }

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let err = run_output_with_timeout("definitely-not-a-real-binary-xyz", &[], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }
}
