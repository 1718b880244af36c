//! Service settings discovery and loading
//!
//! Settings are read from the first file found in this hierarchy:
//! 1. Current directory: ./harvester.toml or ./.harvester/config.toml
//! 2. User config: ~/.harvester/config.toml
//! 3. System config: /etc/harvester/config.toml
//! 4. Built-in defaults
//!
//! Environment variables are applied on top of whichever source was used.

use crate::config::types::ConfigLayer;
use crate::cookies::CookieCacheConfig;
use crate::env;
use crate::login::LoginConfig;
use crate::task::OrchestratorConfig;
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Application-level settings for the harvesting service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub orchestrator: OrchestratorConfig,
    pub login: LoginConfig,
    pub cookies: CookieCacheConfig,
    /// Operator-provided crawl defaults; this is the environment layer of
    /// every resolved configuration.
    pub crawl_defaults: ConfigLayer,
}

impl ServiceSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content).context("Failed to parse settings TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|key| std_env::var(key).ok())
    }

    /// Apply overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env::vars::MAX_CONCURRENT_TASKS) {
            self.orchestrator.max_concurrent_tasks = parse_var(env::vars::MAX_CONCURRENT_TASKS, &v)?;
        }
        if let Some(v) = lookup(env::vars::TASK_TIMEOUT_SECS) {
            self.orchestrator.task_timeout_secs = parse_var(env::vars::TASK_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(env::vars::LOGIN_TIMEOUT_SECS) {
            self.login.default_timeout_secs = parse_var(env::vars::LOGIN_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(env::vars::COOKIE_DIR) {
            self.cookies.cache_dir = Some(PathBuf::from(v));
        }

        let layer = &mut self.crawl_defaults;
        if let Some(v) = lookup(env::vars::DEFAULT_HEADLESS) {
            layer.headless = Some(parse_bool(env::vars::DEFAULT_HEADLESS, &v)?);
        }
        if let Some(v) = lookup(env::vars::DEFAULT_ENABLE_PROXY) {
            layer.enable_proxy = Some(parse_bool(env::vars::DEFAULT_ENABLE_PROXY, &v)?);
        }
        if let Some(v) = lookup(env::vars::DEFAULT_PROXY_PROVIDER) {
            layer.proxy_provider = Some(v);
        }
        if let Some(v) = lookup(env::vars::DEFAULT_MAX_RETRIES) {
            layer.max_retries = Some(parse_var(env::vars::DEFAULT_MAX_RETRIES, &v)?);
        }
        if let Some(v) = lookup(env::vars::DEFAULT_TIMEOUT) {
            layer.timeout = Some(parse_var(env::vars::DEFAULT_TIMEOUT, &v)?);
        }

        self.validate()
    }

    /// Reject limits under which tasks or logins could never make progress.
    /// Crawl defaults are checked per request by the resolver.
    pub fn validate(&self) -> Result<()> {
        let orchestrator = &self.orchestrator;
        let login = &self.login;
        let checks = [
            ("orchestrator.max_concurrent_tasks", orchestrator.max_concurrent_tasks == 0),
            (
                "orchestrator.consecutive_failure_threshold",
                orchestrator.consecutive_failure_threshold == 0,
            ),
            (
                "orchestrator.total_failure_threshold",
                orchestrator.total_failure_threshold == 0,
            ),
            ("orchestrator.task_timeout_secs", orchestrator.task_timeout_secs == 0),
            ("orchestrator.page_size", orchestrator.page_size == 0),
            ("orchestrator.detail_batch_size", orchestrator.detail_batch_size == 0),
            ("login.default_timeout_secs", login.default_timeout_secs == 0),
            ("login.poll_interval_ms", login.poll_interval_ms == 0),
            ("login.adapter_timeout_secs", login.adapter_timeout_secs == 0),
        ];

        let invalid: Vec<&str> = checks
            .iter()
            .filter(|(_, zero)| *zero)
            .map(|(field, _)| *field)
            .collect();
        if !invalid.is_empty() {
            bail!("settings must be at least 1: {}", invalid.join(", "));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| anyhow!("{} has an invalid value: '{}'", key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} is not a boolean: '{}'", key, value)),
    }
}

/// Settings file discovery
pub struct SettingsDiscovery;

impl SettingsDiscovery {
    /// Load settings from the discovery hierarchy, then apply the environment
    pub fn discover() -> Result<ServiceSettings> {
        let mut settings = match Self::find_settings_file() {
            Some(path) => {
                info!("Loading settings from: {:?}", path);
                ServiceSettings::from_toml_file(path)?
            }
            None => {
                info!("No settings file found, using defaults");
                ServiceSettings::default()
            }
        };

        settings.apply_process_env()?;
        Ok(settings)
    }

    /// First existing file of the discovery hierarchy
    pub fn find_settings_file() -> Option<PathBuf> {
        for candidate in Self::candidates() {
            debug!("Checking for settings file: {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        debug!("No settings file found in discovery hierarchy");
        None
    }

    /// Settings file candidates in priority order
    pub fn candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/harvester/config.toml"));

        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Write default settings to `path` unless a file already exists there
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            warn!("Settings file already exists: {:?}", path);
            return Ok(false);
        }
        ServiceSettings::default().to_toml_file(path)?;
        info!("Created default settings file: {:?}", path);
        Ok(true)
    }

    /// Print the discovery hierarchy and the active file
    pub fn show_discovery_info() {
        println!("Settings discovery hierarchy:");
        for (i, candidate) in Self::candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "found"
            } else {
                "missing"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }
        match Self::find_settings_file() {
            Some(found) => println!("Active settings: {:?}", found),
            None => println!("Active settings: built-in defaults"),
        }
    }
}
