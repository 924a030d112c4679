//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/annote/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/annote/` (~/.config/annote/)
//! - State/Logs: `$XDG_STATE_HOME/annote/` (~/.local/state/annote/)
//!
//! Annotation data itself lives under a user-chosen data root (see
//! [`crate::persist`]), not in the XDG data directory.

use crate::error::{Error, Result};
use crate::layout::LaneOrder;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Default annotation data root (CLI flags take precedence)
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Playback synchronization tuning
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Timeline layout and drag behaviour
    #[serde(default)]
    pub timeline: TimelineConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Playback synchronization tuning.
///
/// The defaults are empirical; none of them is a correctness requirement.
#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackConfig {
    /// Reconciliation tick period while the time source plays
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_ms: u64,

    /// Follower drift tolerated before a forced seek
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold_ms: u64,

    /// Buffering gate polling period
    #[serde(default = "default_gate_poll_interval")]
    pub gate_poll_interval_ms: u64,

    /// Hard deadline after which a gated play fires regardless of readiness
    #[serde(default = "default_gate_deadline")]
    pub gate_deadline_ms: u64,

    /// Distance from the end that still counts as "at end"
    #[serde(default = "default_end_tolerance")]
    pub end_tolerance_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval(),
            drift_threshold_ms: default_drift_threshold(),
            gate_poll_interval_ms: default_gate_poll_interval(),
            gate_deadline_ms: default_gate_deadline(),
            end_tolerance_ms: default_end_tolerance(),
        }
    }
}

impl PlaybackConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval_ms == 0 {
            return Err(Error::Config(
                "playback.reconcile_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.gate_poll_interval_ms == 0 {
            return Err(Error::Config(
                "playback.gate_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.gate_deadline_ms < self.gate_poll_interval_ms {
            return Err(Error::Config(
                "playback.gate_deadline_ms must not be shorter than gate_poll_interval_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_reconcile_interval() -> u64 {
    200
}

fn default_drift_threshold() -> u64 {
    200
}

fn default_gate_poll_interval() -> u64 {
    80
}

fn default_gate_deadline() -> u64 {
    1200
}

fn default_end_tolerance() -> u64 {
    2
}

/// Timeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimelineConfig {
    /// Tie-break between intervals that start together
    #[serde(default)]
    pub lane_order: LaneOrder,

    /// Quiet period after the last drag event that ends a gesture
    #[serde(default = "default_drag_debounce")]
    pub drag_debounce_ms: u64,

    /// Resize handle width in front-end units
    #[serde(default = "default_handle_width")]
    pub handle_width: i32,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            lane_order: LaneOrder::default(),
            drag_debounce_ms: default_drag_debounce(),
            handle_width: default_handle_width(),
        }
    }
}

fn default_drag_debounce() -> u64 {
    160
}

fn default_handle_width() -> i32 {
    1
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.playback.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/annote/config.toml` (~/.config/annote/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("annote").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/annote/` (~/.local/state/annote/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("annote")
    }
}
