//! Settings loaded from a JSON document, with defaults for every field.
//!
//! A missing or unreadable settings file never stops the process; the
//! defaults are usable on their own.

use crate::retry::RetryPolicy;
use directories::ProjectDirs;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scraper: ScraperSettings,
    pub proxy: ProxySettings,
    pub pacing: PacingSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    pub request_timeout_secs: u64,
    pub use_proxy: bool,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub backoff_factor: f64,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            use_proxy: true,
            max_retries: 3,
            retry_delay_secs: 2,
            backoff_factor: 2.0,
        }
    }
}

impl ScraperSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay_secs),
            self.backoff_factor,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Vendor name; the API key is read from `<SERVICE>_API_KEY`.
    pub service: Option<String>,
    pub proxy_file: Option<PathBuf>,
    pub max_uses: u32,
    pub rotation_interval_secs: u64,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            service: None,
            proxy_file: None,
            max_uses: 10,
            rotation_interval_secs: 300,
            probe_url: "https://www.google.com".to_string(),
            probe_timeout_secs: 10,
        }
    }
}

impl ProxySettings {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    /// Minimum spacing between requests to the same domain.
    pub rate_limit_secs: u64,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            rate_limit_secs: 2,
            min_delay_secs: 1,
            max_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub feedback_dir: Option<PathBuf>,
    pub selector_dir: Option<PathBuf>,
}

impl Config {
    /// Load from the platform config dir (`settings.json`), or defaults.
    pub fn load() -> Config {
        match ProjectDirs::from("io", "quarry", "quarry") {
            Some(proj) => Self::load_from(&proj.config_dir().join("settings.json")),
            None => {
                warn!("could not resolve config dir, using default configuration");
                Config::default()
            }
        }
    }

    /// Load from an explicit path. Missing or invalid files fall back to
    /// the defaults rather than failing.
    pub fn load_from(path: &Path) -> Config {
        if !path.exists() {
            warn!(
                "configuration file {} not found, using default configuration",
                path.display()
            );
            return Config::default();
        }
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                error!("error reading configuration from {}: {e}", path.display());
                return Config::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => {
                info!("loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                error!("error parsing configuration from {}: {e}", path.display());
                Config::default()
            }
        }
    }
}
