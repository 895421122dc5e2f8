//! Settings loaded from a TOML file

use crate::error::{Error, Result};
use crate::proxy::crawler::{CrawlerConfig, DEFAULT_TIMEOUT_SECS as DEFAULT_CRAWL_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::proxy::models::Protocol;
use crate::proxy::probe::DEFAULT_ECHO_URL;
use crate::proxy::validator::{check_concurrency, ValidatorConfig, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub validator: ValidatorSettings,
    #[serde(default)]
    pub sources: SourceSettings,
}

/// `[validator]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorSettings {
    #[serde(default = "default_echo_url")]
    pub echo_url: String,
    /// Per-probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Known true origin; when set no direct probe is made
    #[serde(default)]
    pub baseline: Option<String>,
}

fn default_echo_url() -> String {
    DEFAULT_ECHO_URL.to_string()
}
fn default_probe_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS as f64
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            echo_url: default_echo_url(),
            timeout_secs: default_probe_timeout(),
            concurrency: default_concurrency(),
            baseline: None,
        }
    }
}

/// `[sources]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    /// Local proxy list files
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Remote proxy list URLs
    #[serde(default)]
    pub urls: Vec<String>,
    /// Also crawl the built-in list of free proxy sites
    #[serde(default)]
    pub common_sources: bool,
    /// Protocol assumed for entries that do not name one
    #[serde(default)]
    pub default_protocol: Protocol,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Crawl request timeout in seconds
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: f64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_crawl_timeout() -> f64 {
    DEFAULT_CRAWL_TIMEOUT_SECS as f64
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            urls: Vec::new(),
            common_sources: false,
            default_protocol: Protocol::default(),
            user_agent: default_user_agent(),
            timeout_secs: default_crawl_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file; missing keys take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let settings = Self::from_toml(&content)?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that cannot drive a validation pass
    pub fn validate(&self) -> Result<()> {
        check_concurrency(self.validator.concurrency)?;
        for (name, secs) in [
            ("validator.timeout_secs", self.validator.timeout_secs),
            ("sources.timeout_secs", self.sources.timeout_secs),
        ] {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(Error::Config(format!("{name} must be a positive number of seconds, got {secs}")));
            }
        }
        Ok(())
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        let v = &self.validator;
        let config = ValidatorConfig::new()
            .with_timeout(Duration::from_secs_f64(v.timeout_secs))
            .with_concurrency(v.concurrency)
            .with_echo_url(v.echo_url.clone());
        match &v.baseline {
            Some(origin) => config.with_baseline(origin.clone()),
            None => config,
        }
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new()
            .with_timeout(Duration::from_secs_f64(self.sources.timeout_secs))
            .with_user_agent(self.sources.user_agent.clone())
    }
}
