use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::ValidationErrors;

pub const MAX_COUNT_RANGE: (i64, i64) = (1, 1000);
pub const MAX_COMMENTS_RANGE: (i64, i64) = (0, 500);
pub const MAX_RETRIES_RANGE: (i64, i64) = (0, 10);
pub const TIMEOUT_RANGE: (i64, i64) = (10, 300);

static WINDOW_SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+,\d+$").expect("window size pattern is valid"));

/// Supported content platforms, identified on the wire by a short code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Xhs,
    Douyin,
    Bilibili,
    Kuaishou,
    Weibo,
    Tieba,
    Zhihu,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Xhs,
        Platform::Douyin,
        Platform::Bilibili,
        Platform::Kuaishou,
        Platform::Weibo,
        Platform::Tieba,
        Platform::Zhihu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Xhs => "xhs",
            Platform::Douyin => "douyin",
            Platform::Bilibili => "bilibili",
            Platform::Kuaishou => "kuaishou",
            Platform::Weibo => "weibo",
            Platform::Tieba => "tieba",
            Platform::Zhihu => "zhihu",
        }
    }

    /// Abbreviated code used by collectors and cached cookie files
    pub fn short_code(&self) -> &'static str {
        match self {
            Platform::Xhs => "xhs",
            Platform::Douyin => "dy",
            Platform::Bilibili => "bili",
            Platform::Kuaishou => "ks",
            Platform::Weibo => "wb",
            Platform::Tieba => "tieba",
            Platform::Zhihu => "zhihu",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Xhs => "小红书",
            Platform::Douyin => "抖音",
            Platform::Bilibili => "哔哩哔哩",
            Platform::Kuaishou => "快手",
            Platform::Weibo => "微博",
            Platform::Tieba => "百度贴吧",
            Platform::Zhihu => "知乎",
        }
    }

    pub fn supported_codes() -> String {
        Self::ALL
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xhs" => Ok(Platform::Xhs),
            "douyin" | "dy" => Ok(Platform::Douyin),
            "bilibili" | "bili" => Ok(Platform::Bilibili),
            "kuaishou" | "ks" => Ok(Platform::Kuaishou),
            "weibo" | "wb" => Ok(Platform::Weibo),
            "tieba" => Ok(Platform::Tieba),
            "zhihu" => Ok(Platform::Zhihu),
            other => Err(format!(
                "unsupported platform '{}', expected one of: {}",
                other,
                Platform::supported_codes()
            )),
        }
    }
}

/// Kind of harvesting a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Search,
    Detail,
    Creator,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Search => "search",
            TaskType::Detail => "detail",
            TaskType::Creator => "creator",
        }
    }

    /// Request field holding the identifiers this task type needs
    pub fn identifier_field(&self) -> &'static str {
        match self {
            TaskType::Search => "keywords",
            TaskType::Detail => "content_ids",
            TaskType::Creator => "creator_ids",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(TaskType::Search),
            "detail" => Ok(TaskType::Detail),
            "creator" => Ok(TaskType::Creator),
            other => Err(format!(
                "unsupported task type '{}', expected one of: search, detail, creator",
                other
            )),
        }
    }
}

/// Where harvested records are persisted by the storage adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveDataOption {
    Db,
    Json,
    Csv,
}

impl SaveDataOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveDataOption::Db => "db",
            SaveDataOption::Json => "json",
            SaveDataOption::Csv => "csv",
        }
    }
}

impl fmt::Display for SaveDataOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveDataOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "db" => Ok(SaveDataOption::Db),
            "json" => Ok(SaveDataOption::Json),
            "csv" => Ok(SaveDataOption::Csv),
            other => Err(format!(
                "unsupported save option '{}', expected one of: db, json, csv",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for WindowSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !WINDOW_SIZE_PATTERN.is_match(s) {
            return Err(format!("'{}' does not match the format <width>,<height>", s));
        }
        let (width, height) = s
            .split_once(',')
            .ok_or_else(|| format!("'{}' does not match the format <width>,<height>", s))?;
        let width = width
            .parse::<u32>()
            .map_err(|_| format!("width '{}' is out of range", width))?;
        let height = height
            .parse::<u32>()
            .map_err(|_| format!("height '{}' is out of range", height))?;
        Ok(WindowSize { width, height })
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.width, self.height)
    }
}

/// Inclusive pause between batches, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u32,
    pub max_secs: u32,
}

impl DelayRange {
    pub fn is_zero(&self) -> bool {
        self.max_secs == 0
    }

    /// Pick a pause uniformly within the range
    pub fn sample(&self) -> Duration {
        if self.min_secs >= self.max_secs {
            return Duration::from_secs(self.min_secs as u64);
        }
        let millis = rand::random_range(
            (self.min_secs as u64 * 1000)..=(self.max_secs as u64 * 1000),
        );
        Duration::from_millis(millis)
    }
}

/// A partial set of crawl parameters. Every configuration layer (built-in
/// defaults, platform defaults, environment, request) is one of these; an
/// unset field falls through to the layer below.
///
/// Numeric fields are kept wide and signed so that out-of-range input can be
/// reported instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_proxy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_range: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_comments: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_sub_comments: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_comments: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_data_option: Option<String>,
}

impl ConfigLayer {
    /// Layer with every field set to the built-in default
    pub fn builtin_defaults() -> Self {
        Self {
            max_count: Some(100),
            start_page: Some(1),
            enable_proxy: Some(false),
            proxy_provider: None,
            headless: Some(true),
            user_agent: None,
            window_size: Some("1920,1080".to_string()),
            max_retries: Some(3),
            delay_range: Some(vec![1, 3]),
            timeout: Some(30),
            enable_comments: Some(true),
            enable_sub_comments: Some(false),
            max_comments: Some(50),
            save_data_option: Some("db".to_string()),
        }
    }

    /// Merge `higher` on top of `self`: set fields of `higher` win.
    pub fn overlay(&self, higher: &ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            max_count: higher.max_count.or(self.max_count),
            start_page: higher.start_page.or(self.start_page),
            enable_proxy: higher.enable_proxy.or(self.enable_proxy),
            proxy_provider: higher
                .proxy_provider
                .clone()
                .or_else(|| self.proxy_provider.clone()),
            headless: higher.headless.or(self.headless),
            user_agent: higher
                .user_agent
                .clone()
                .or_else(|| self.user_agent.clone()),
            window_size: higher
                .window_size
                .clone()
                .or_else(|| self.window_size.clone()),
            max_retries: higher.max_retries.or(self.max_retries),
            delay_range: higher
                .delay_range
                .clone()
                .or_else(|| self.delay_range.clone()),
            timeout: higher.timeout.or(self.timeout),
            enable_comments: higher.enable_comments.or(self.enable_comments),
            enable_sub_comments: higher.enable_sub_comments.or(self.enable_sub_comments),
            max_comments: higher.max_comments.or(self.max_comments),
            save_data_option: higher
                .save_data_option
                .clone()
                .or_else(|| self.save_data_option.clone()),
        }
    }

    /// Check every set field, reporting violations under `prefix`
    /// (e.g. `"config."` yields `config.timeout`).
    pub fn validate(&self, prefix: &str) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let path = |field: &str| format!("{}{}", prefix, field);

        if let Some(v) = self.max_count {
            check_range(&mut errors, path("max_count"), v, MAX_COUNT_RANGE);
        }
        if let Some(v) = self.start_page
            && v < 1
        {
            errors.push(path("start_page"), format!("must be at least 1, got {}", v));
        }
        if let Some(v) = self.max_retries {
            check_range(&mut errors, path("max_retries"), v, MAX_RETRIES_RANGE);
        }
        if let Some(v) = self.timeout {
            check_range(&mut errors, path("timeout"), v, TIMEOUT_RANGE);
        }
        if let Some(v) = self.max_comments {
            check_range(&mut errors, path("max_comments"), v, MAX_COMMENTS_RANGE);
        }
        if let Some(range) = &self.delay_range
            && let Err(reason) = parse_delay_range(range)
        {
            errors.push(path("delay_range"), reason);
        }
        if let Some(size) = &self.window_size
            && let Err(reason) = size.parse::<WindowSize>()
        {
            errors.push(path("window_size"), reason);
        }
        if let Some(option) = &self.save_data_option
            && let Err(reason) = option.parse::<SaveDataOption>()
        {
            errors.push(path("save_data_option"), reason);
        }

        errors
    }
}

fn check_range(errors: &mut ValidationErrors, field: String, value: i64, (min, max): (i64, i64)) {
    if value < min || value > max {
        errors.push(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        );
    }
}

fn parse_delay_range(values: &[i64]) -> Result<DelayRange, String> {
    let [first, second] = values else {
        return Err(format!(
            "must contain exactly two values, got {}",
            values.len()
        ));
    };
    if *first < 0 || *second < 0 {
        return Err("values must not be negative".to_string());
    }
    if first > second {
        return Err(format!(
            "first value must not exceed the second, got [{}, {}]",
            first, second
        ));
    }
    let min_secs = u32::try_from(*first).map_err(|_| "value is too large".to_string())?;
    let max_secs = u32::try_from(*second).map_err(|_| "value is too large".to_string())?;
    Ok(DelayRange { min_secs, max_secs })
}

/// Fully resolved, validated crawl configuration. Produced once per task and
/// shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub platform: Platform,
    pub max_count: u32,
    pub start_page: u32,
    pub enable_proxy: bool,
    pub proxy_provider: Option<String>,
    pub headless: bool,
    pub user_agent: Option<String>,
    pub window_size: WindowSize,
    pub max_retries: u32,
    pub delay_range: DelayRange,
    pub timeout_secs: u32,
    pub enable_comments: bool,
    pub enable_sub_comments: bool,
    pub max_comments: u32,
    pub save_data_option: SaveDataOption,
}

impl CrawlerConfig {
    /// Convert a merged layer. Fields left unset by every layer take the
    /// built-in default; any violation is reported in full.
    pub fn from_layer(platform: Platform, layer: &ConfigLayer) -> Result<Self, ValidationErrors> {
        let merged = ConfigLayer::builtin_defaults().overlay(layer);
        merged.validate("").into_result(())?;

        // Every set field passed validation above.
        let number = |value: Option<i64>| {
            value
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default()
        };

        Ok(CrawlerConfig {
            platform,
            max_count: number(merged.max_count),
            start_page: number(merged.start_page),
            enable_proxy: merged.enable_proxy.unwrap_or(false),
            proxy_provider: merged.proxy_provider.clone(),
            headless: merged.headless.unwrap_or(true),
            user_agent: merged.user_agent.clone(),
            window_size: merged
                .window_size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(WindowSize {
                    width: 1920,
                    height: 1080,
                }),
            max_retries: number(merged.max_retries),
            delay_range: merged
                .delay_range
                .as_deref()
                .and_then(|r| parse_delay_range(r).ok())
                .unwrap_or(DelayRange {
                    min_secs: 1,
                    max_secs: 3,
                }),
            timeout_secs: number(merged.timeout),
            enable_comments: merged.enable_comments.unwrap_or(true),
            enable_sub_comments: merged.enable_sub_comments.unwrap_or(false),
            max_comments: number(merged.max_comments),
            save_data_option: merged
                .save_data_option
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(SaveDataOption::Db),
        })
    }

    /// Per-call ceiling for platform adapter requests
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs as u64)
    }
}

/// Platform-specific defaults layered above the built-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub name: String,
    pub delay_range: [u32; 2],
    pub max_comments: u32,
    pub timeout_secs: u32,
}

impl PlatformProfile {
    pub fn new(platform: Platform, delay_range: [u32; 2], max_comments: u32, timeout_secs: u32) -> Self {
        Self {
            platform,
            name: platform.display_name().to_string(),
            delay_range,
            max_comments,
            timeout_secs,
        }
    }

    /// Built-in profile for every supported platform
    pub fn builtin(platform: Platform) -> Self {
        match platform {
            Platform::Xhs => Self::new(platform, [2, 4], 100, 45),
            Platform::Douyin => Self::new(platform, [1, 2], 50, 30),
            Platform::Bilibili => Self::new(platform, [1, 3], 80, 40),
            Platform::Kuaishou => Self::new(platform, [2, 3], 60, 35),
            Platform::Weibo => Self::new(platform, [1, 2], 50, 30),
            Platform::Tieba => Self::new(platform, [2, 4], 100, 50),
            Platform::Zhihu => Self::new(platform, [1, 3], 80, 40),
        }
    }

    pub fn as_layer(&self) -> ConfigLayer {
        ConfigLayer {
            delay_range: Some(self.delay_range.iter().map(|&v| v as i64).collect()),
            max_comments: Some(self.max_comments as i64),
            timeout: Some(self.timeout_secs as i64),
            ..Default::default()
        }
    }
}
