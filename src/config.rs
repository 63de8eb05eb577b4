use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{
    DEFAULT_COMPLETION_RATIO, DEFAULT_EVENT_CAPACITY, DEFAULT_EVENT_HISTORY,
    DEFAULT_RESUME_THRESHOLD_MS, DEFAULT_TEARDOWN_TIMEOUT_MS,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub resume: ResumeConfig,

    #[serde(default)]
    pub teardown: TeardownConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

/// What a session does when its media reaches the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfMediaPolicy {
    /// Report `Ended` and leave the backend at the end.
    Finish,
    /// Rewind to the start and hold there paused.
    #[default]
    RestartPaused,
    /// Rewind to the start and keep playing.
    RestartPlaying,
}

impl EndOfMediaPolicy {
    pub fn restarts(&self) -> bool {
        !matches!(self, EndOfMediaPolicy::Finish)
    }

    pub fn resumes(&self) -> bool {
        matches!(self, EndOfMediaPolicy::RestartPlaying)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub end_of_media: EndOfMediaPolicy,

    #[serde(default = "default_true")]
    pub autoplay: bool,

    #[serde(default)]
    pub auto_advance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_resume_threshold")]
    pub threshold_ms: u64,

    #[serde(default = "default_completion_ratio")]
    pub completion_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownConfig {
    #[serde(default = "default_teardown_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,

    #[serde(default = "default_event_history")]
    pub history_size: usize,
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            info!("No engine config found, using defaults");
            let config = EngineConfig::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading engine config from {:?}", path);
        let contents = fs::read_to_string(path).context("Failed to read engine config file")?;
        let config = Self::from_toml_str(&contents)?;
        info!("Engine config loaded successfully");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse engine config")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize engine config")?;
        fs::write(path, contents).context("Failed to write engine config file")?;

        debug!("Engine config saved to {:?}", path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("segue").join("engine.toml"))
    }
}

impl TeardownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ResumeConfig {
    /// Whether playback should resume from `saved_ms` of a `duration_ms` long media.
    ///
    /// Unknown durations only apply the threshold.
    pub fn should_resume(&self, saved_ms: u64, duration_ms: u64) -> bool {
        if !self.enabled || saved_ms < self.threshold_ms {
            return false;
        }

        if duration_ms == 0 {
            return true;
        }

        (saved_ms as f64 / duration_ms as f64) < self.completion_ratio
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            end_of_media: EndOfMediaPolicy::default(),
            autoplay: default_true(),
            auto_advance: false,
        }
    }
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            threshold_ms: default_resume_threshold(),
            completion_ratio: default_completion_ratio(),
        }
    }
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_teardown_timeout(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
            history_size: default_event_history(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_resume_threshold() -> u64 { DEFAULT_RESUME_THRESHOLD_MS }
fn default_completion_ratio() -> f64 { DEFAULT_COMPLETION_RATIO }
fn default_teardown_timeout() -> u64 { DEFAULT_TEARDOWN_TIMEOUT_MS }
fn default_event_capacity() -> usize { DEFAULT_EVENT_CAPACITY }
fn default_event_history() -> usize { DEFAULT_EVENT_HISTORY }
