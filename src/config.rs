//! Client settings.
//!
//! Values come from `<config_dir>/casecluster/config.json` when it exists, then from
//! command-line flags. Durations use humantime notation (`2s`, `500ms`).

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_THRESHOLD: f64 = 0.80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub default_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            default_threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Flag values that take precedence over the settings file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub poll_interval: Option<Duration>,
}

/// Default location of the settings file, if the platform has a config directory.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("casecluster").join("config.json"))
}

impl Settings {
    /// Load settings from `path`, or from [`config_path`] when `path` is `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                log::debug!("no settings file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ClientError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        let settings: Settings = serde_json::from_str(&text)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(url) = overrides.base_url {
            self.base_url = url;
        }
        if let Some(interval) = overrides.poll_interval {
            self.poll_interval = interval;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(ClientError::Config("poll_interval must be positive".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if !self.default_threshold.is_finite() {
            return Err(ClientError::Config("default_threshold must be a number".into()));
        }
        Ok(())
    }
}
