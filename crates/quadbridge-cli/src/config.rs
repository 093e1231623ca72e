//! Bridge configuration – reads `~/.quadbridge/config.toml` and the robot's
//! IP file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quadbridge_link::{DEFAULT_COMMAND_PORT, DEFAULT_VIDEO_PORT, LinkConfig};
use quadbridge_server::DEFAULT_PORT;
use quadbridge_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Address used when no robot IP is configured anywhere.
pub const DEFAULT_ROBOT_IP: &str = "127.0.0.1";

/// Settings loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface the HTTP API binds to.
    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Robot control/telemetry port.
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Robot video stream port.
    #[serde(default = "default_video_port")]
    pub video_port: u16,

    /// File whose first line holds the robot's address.
    #[serde(default = "default_ip_file")]
    pub ip_file: PathBuf,

    /// Robot address. When set the IP file is not read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_ip: Option<String>,

    /// Upper bound on the wait for a requested sonic/power report.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Interval at which the video capture gate is re-armed.
    #[serde(default = "default_video_poll_ms")]
    pub video_poll_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// A command write stalled longer than this drops the robot session.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    DEFAULT_PORT
}
fn default_command_port() -> u16 {
    DEFAULT_COMMAND_PORT
}
fn default_video_port() -> u16 {
    DEFAULT_VIDEO_PORT
}
fn default_ip_file() -> PathBuf {
    PathBuf::from("IP.txt")
}
fn default_grace_period_ms() -> u64 {
    100
}
fn default_video_poll_ms() -> u64 {
    100
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_send_timeout_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            command_port: default_command_port(),
            video_port: default_video_port(),
            ip_file: default_ip_file(),
            robot_ip: None,
            grace_period_ms: default_grace_period_ms(),
            video_poll_ms: default_video_poll_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Config {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Link settings for a robot reachable at `host`.
    pub fn link_config(&self, host: String) -> LinkConfig {
        LinkConfig {
            host,
            command_port: self.command_port,
            video_port: self.video_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            video_poll_interval: Duration::from_millis(self.video_poll_ms),
        }
    }
}

/// Return `$QUADBRIDGE_CONFIG`, or `~/.quadbridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUADBRIDGE_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".quadbridge").join("config.toml")
}

/// Load the config with environment overrides applied. A missing file means
/// defaults.
pub fn load() -> Result<Config, BridgeError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("Failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw).map_err(|e| {
        BridgeError::Config(format!("Failed to parse config at {}: {e}", path.display()))
    })?;
    Ok(Some(cfg))
}

/// Apply `QUADBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `QUADBRIDGE_HTTP_PORT` | `http_port` |
/// | `QUADBRIDGE_COMMAND_PORT` | `command_port` |
/// | `QUADBRIDGE_VIDEO_PORT` | `video_port` |
/// | `QUADBRIDGE_IP_FILE` | `ip_file` |
/// | `QUADBRIDGE_ROBOT_IP` | `robot_ip` |
///
/// Unparseable port values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(port) = env_port("QUADBRIDGE_HTTP_PORT") {
        cfg.http_port = port;
    }
    if let Some(port) = env_port("QUADBRIDGE_COMMAND_PORT") {
        cfg.command_port = port;
    }
    if let Some(port) = env_port("QUADBRIDGE_VIDEO_PORT") {
        cfg.video_port = port;
    }
    if let Ok(v) = std::env::var("QUADBRIDGE_IP_FILE") {
        cfg.ip_file = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("QUADBRIDGE_ROBOT_IP")
        && !v.trim().is_empty()
    {
        cfg.robot_ip = Some(v.trim().to_string());
    }
}

fn env_port(name: &str) -> Option<u16> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// The robot address: `robot_ip` if set, otherwise the IP file.
pub fn resolve_robot_ip(cfg: &Config) -> Result<String, BridgeError> {
    match &cfg.robot_ip {
        Some(ip) => Ok(ip.clone()),
        None => read_ip_file(&cfg.ip_file),
    }
}

/// First line of `path`, trimmed. A missing file or blank first line falls
/// back to [`DEFAULT_ROBOT_IP`].
pub fn read_ip_file(path: &Path) -> Result<String, BridgeError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DEFAULT_ROBOT_IP.to_string()),
        Err(e) => {
            return Err(BridgeError::Config(format!(
                "Failed to read IP file {}: {e}",
                path.display()
            )));
        }
    };
    let first = raw.lines().next().unwrap_or_default().trim();
    if first.is_empty() {
        Ok(DEFAULT_ROBOT_IP.to_string())
    } else {
        Ok(first.to_string())
    }
}
