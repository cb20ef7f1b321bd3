//! Configuration management for rtc-bridge

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Call session configuration
    #[serde(default)]
    pub call: CallConfig,

    /// Screen capture configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Demo binary configuration
    #[serde(default)]
    pub demo: DemoConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// How long a call may stay in Starting before it is abandoned (ms, 0 = wait forever)
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,

    /// How long a call may stay in Ending before it is torn down locally (ms, 0 = wait forever)
    #[serde(default = "default_end_timeout")]
    pub end_timeout_ms: u64,

    /// Capacity of the call action broadcast channel
    #[serde(default = "default_action_capacity")]
    pub action_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Application-group identifier shared with the recording extension.
    /// Capture cannot start without one.
    #[serde(default, alias = "RTCAppGroupIdentifier")]
    pub app_group_id: Option<String>,

    /// Root directory holding application-group containers
    /// (defaults to a directory under the system temp dir)
    #[serde(default)]
    pub group_container_root: Option<PathBuf>,

    /// How long to wait for the producer's ready signal (ms, 0 = wait forever)
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,

    /// Capacity of the capture event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Display name used for the demo call
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Whether the demo call is a video call
    #[serde(default = "default_true")]
    pub is_video: bool,

    /// Delay before the simulated authority confirms a request (ms)
    #[serde(default = "default_confirm_delay")]
    pub confirm_delay_ms: u64,
}

// Default value functions
fn default_start_timeout() -> u64 {
    10_000
}

fn default_end_timeout() -> u64 {
    5_000
}

fn default_ready_timeout() -> u64 {
    15_000
}

fn default_action_capacity() -> usize {
    32
}

fn default_event_capacity() -> usize {
    16
}

fn default_display_name() -> String {
    "rtc-bridge".to_string()
}

fn default_confirm_delay() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

/// Convert a millisecond setting into an optional timeout (0 disables it)
fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl CallConfig {
    pub fn start_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.start_timeout_ms)
    }

    pub fn end_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.end_timeout_ms)
    }
}

impl CaptureConfig {
    pub fn ready_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.ready_timeout_ms)
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout(),
            end_timeout_ms: default_end_timeout(),
            action_channel_capacity: default_action_capacity(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            app_group_id: None,
            group_container_root: None,
            ready_timeout_ms: default_ready_timeout(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            is_video: true,
            confirm_delay_ms: default_confirm_delay(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call: CallConfig::default(),
            capture: CaptureConfig::default(),
            demo: DemoConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config = Self::from_toml_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path);
            Ok(config)
        } else {
            // Create default config
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Invalid TOML configuration")?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "rtc-bridge", "rtc-bridge")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
