//! Environment constants and path utilities.
//!
//! Centralizes the directory names, file names and environment variable
//! names used throughout the crate.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const HARVESTER_DIR_NAME: &str = ".harvester";

/// Settings file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Settings file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "harvester.toml";

/// Default directory for cached platform cookies
pub const COOKIES_DIR_NAME: &str = "cookies";

/// Suffix of each per-platform cookie cache file
pub const COOKIE_FILE_SUFFIX: &str = "_cookies.json";

/// Environment variable names
pub mod vars {
    pub const MAX_CONCURRENT_TASKS: &str = "HARVESTER_MAX_CONCURRENT_TASKS";
    pub const TASK_TIMEOUT_SECS: &str = "HARVESTER_TASK_TIMEOUT_SECS";
    pub const LOGIN_TIMEOUT_SECS: &str = "HARVESTER_LOGIN_TIMEOUT_SECS";
    pub const COOKIE_DIR: &str = "HARVESTER_COOKIE_DIR";

    /// Crawl defaults forming the environment configuration layer
    pub const DEFAULT_HEADLESS: &str = "HARVESTER_DEFAULT_HEADLESS";
    pub const DEFAULT_ENABLE_PROXY: &str = "HARVESTER_DEFAULT_ENABLE_PROXY";
    pub const DEFAULT_PROXY_PROVIDER: &str = "HARVESTER_DEFAULT_PROXY_PROVIDER";
    pub const DEFAULT_MAX_RETRIES: &str = "HARVESTER_DEFAULT_MAX_RETRIES";
    pub const DEFAULT_TIMEOUT: &str = "HARVESTER_DEFAULT_TIMEOUT";
}

/// Build the application directory path from a root
pub fn harvester_dir_path(root: &Path) -> PathBuf {
    root.join(HARVESTER_DIR_NAME)
}

/// Build the settings file path in the user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    harvester_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build the settings file path nested in the current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    harvester_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

/// Build the default cookie cache directory under a root
pub fn cookies_dir_path(root: &Path) -> PathBuf {
    harvester_dir_path(root).join(COOKIES_DIR_NAME)
}

/// Build the cookie cache file path of one platform
pub fn cookie_file_path(cache_dir: &Path, platform_code: &str) -> PathBuf {
    cache_dir.join(format!("{}{}", platform_code, COOKIE_FILE_SUFFIX))
}
