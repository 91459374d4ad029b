//! Configuration
//!
//! The window system reads the video-screen settings (monitor, windowed
//! size, HDR), window identity, presentation tuning and the platform flag
//! from a TOML file. Every section has defaults, so an empty file is a
//! valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::presentation::{DEFAULT_FRAME_WAIT_TIMEOUT, DEFAULT_LATENCY_WINDOW};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video_screen: VideoScreenConfig,
    pub window: WindowConfig,
    pub presentation: PresentationConfig,
    pub platform: PlatformConfig,
}

impl Config {
    /// Load configuration from `path`, or from the first config file found
    /// in the usual places. A missing file yields the defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config_path = path.map(PathBuf::from).or_else(Self::find_config_file);

        match config_path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {:?}", path);
                Self::from_file(&path)
            }
            Some(path) => {
                warn!("Config file not found at {:?}, using defaults", path);
                Ok(Self::default())
            }
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            dirs::config_dir().map(|p| p.join("cinewin/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/cinewin/config.toml")),
            dirs::home_dir().map(|p| p.join(".cinewin/config.toml")),
            Some(PathBuf::from("/etc/cinewin/config.toml")),
        ];

        candidates.into_iter().flatten().find(|p| p.exists())
    }

    /// Generate default configuration as a string
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

/// `videoscreen.*` settings of the media center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoScreenConfig {
    /// User-friendly name of the output to go fullscreen on; empty for
    /// "whatever the compositor picks".
    pub monitor: String,
    /// Buffer size used when windowed and the compositor has no preference.
    pub windowed_width: i32,
    pub windowed_height: i32,
    pub limited_range: bool,
    pub hdr_enabled: bool,
    /// Start fullscreen.
    pub fullscreen: bool,
}

impl Default for VideoScreenConfig {
    fn default() -> Self {
        Self {
            monitor: String::new(),
            windowed_width: 1280,
            windowed_height: 720,
            limited_range: false,
            hdr_enabled: true,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub app_id: String,
    /// Draw client-side decorations when windowed.
    pub decorations: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Cinewin".to_owned(),
            app_id: "cinewin".to_owned(),
            decorations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Longest wait for a frame callback before drawing anyway.
    pub frame_wait_timeout_ms: u64,
    /// Presented frames averaged into the display latency.
    pub latency_window: usize,
}

impl PresentationConfig {
    pub const fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            frame_wait_timeout_ms: DEFAULT_FRAME_WAIT_TIMEOUT.as_millis() as u64,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Running on webOS: use the webOS shell.
    pub webos: bool,
}
