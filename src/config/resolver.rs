use crate::config::settings::ServiceSettings;
use crate::config::types::*;
use crate::error::ValidationErrors;
use crate::task::types::{TaskParameters, TaskRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Origin of a configuration layer, lowest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSource {
    Defaults,
    Platform,
    Environment,
    /// Top-level fields of a task request
    Request,
    /// The nested `config` object of a task request
    RequestConfig,
}

impl LayerSource {
    /// Prefix used for field paths in validation reports
    pub fn field_prefix(&self) -> &'static str {
        match self {
            LayerSource::Defaults => "defaults.",
            LayerSource::Platform => "platform.",
            LayerSource::Environment => "env.",
            LayerSource::Request => "",
            LayerSource::RequestConfig => "config.",
        }
    }
}

/// Merges the ordered configuration layers into one validated
/// [`CrawlerConfig`].
///
/// The resolver is built once from the defaults, the platform profiles and
/// the environment layer; after construction it only reads its own fields, so
/// identical requests always resolve to identical configurations.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    defaults: ConfigLayer,
    profiles: BTreeMap<Platform, PlatformProfile>,
    environment: ConfigLayer,
}

impl ConfigResolver {
    /// Resolver with the built-in defaults and platform profiles
    pub fn new(environment: ConfigLayer) -> Self {
        let profiles = Platform::ALL
            .iter()
            .map(|&p| (p, PlatformProfile::builtin(p)))
            .collect();

        Self {
            defaults: ConfigLayer::builtin_defaults(),
            profiles,
            environment,
        }
    }

    pub fn from_settings(settings: &ServiceSettings) -> Self {
        Self::new(settings.crawl_defaults.clone())
    }

    pub fn defaults(&self) -> &ConfigLayer {
        &self.defaults
    }

    pub fn environment(&self) -> &ConfigLayer {
        &self.environment
    }

    pub fn profile(&self, platform: Platform) -> Option<&PlatformProfile> {
        self.profiles.get(&platform)
    }

    /// Supported platforms with their specific defaults
    pub fn platforms(&self) -> Vec<PlatformProfile> {
        self.profiles.values().cloned().collect()
    }

    /// Build the configuration for `platform` with `request` as the
    /// highest-precedence layer. Violations in `request` are reported under
    /// `config.<field>`.
    pub fn build_config(
        &self,
        platform: Platform,
        request: &ConfigLayer,
    ) -> Result<CrawlerConfig, ValidationErrors> {
        self.resolve_layers(Some(platform), &[(LayerSource::RequestConfig, request)])
    }

    /// Validate a complete task request and resolve its parameters.
    /// Every violation in the request is reported in one error list.
    pub fn resolve_task(&self, request: &TaskRequest) -> Result<TaskParameters, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let platform = match request.platform.parse::<Platform>() {
            Ok(p) => Some(p),
            Err(reason) => {
                errors.push("platform", reason);
                None
            }
        };

        let task_type = match request.task_type.parse::<TaskType>() {
            Ok(t) => Some(t),
            Err(reason) => {
                errors.push("task_type", reason);
                None
            }
        };

        let keywords = non_blank(request.keywords.as_deref());
        let content_ids = non_blank(request.content_ids.as_deref());
        let creator_ids = non_blank(request.creator_ids.as_deref());

        if let Some(task_type) = task_type {
            let identifiers = match task_type {
                TaskType::Search => &keywords,
                TaskType::Detail => &content_ids,
                TaskType::Creator => &creator_ids,
            };
            if identifiers.is_empty() {
                errors.push(
                    task_type.identifier_field(),
                    format!("{} tasks require at least one value", task_type),
                );
            }
        }

        let top_level = request.top_level_layer();
        let nested = request.config.clone().unwrap_or_default();
        let request_layers = [
            (LayerSource::Request, &top_level),
            (LayerSource::RequestConfig, &nested),
        ];

        let config = match self.resolve_layers(platform, &request_layers) {
            Ok(config) => Some(config),
            Err(config_errors) => {
                errors.extend(config_errors);
                None
            }
        };

        match (platform, task_type, config) {
            (Some(_), Some(task_type), Some(config)) if errors.is_empty() => Ok(TaskParameters {
                task_type,
                keywords,
                content_ids,
                creator_ids,
                config,
                clear_cookies: request.clear_cookies,
            }),
            _ => Err(errors),
        }
    }

    /// Ordered layers that apply to `platform`, lowest precedence first
    pub fn base_layers(&self, platform: Option<Platform>) -> Vec<(LayerSource, ConfigLayer)> {
        let mut layers = vec![(LayerSource::Defaults, self.defaults.clone())];
        if let Some(profile) = platform.and_then(|p| self.profiles.get(&p)) {
            layers.push((LayerSource::Platform, profile.as_layer()));
        }
        layers.push((LayerSource::Environment, self.environment.clone()));
        layers
    }

    fn resolve_layers(
        &self,
        platform: Option<Platform>,
        request_layers: &[(LayerSource, &ConfigLayer)],
    ) -> Result<CrawlerConfig, ValidationErrors> {
        let base = self.base_layers(platform);
        let all_layers = base
            .iter()
            .map(|(source, layer)| (*source, layer))
            .chain(request_layers.iter().copied());

        let mut errors = ValidationErrors::new();
        let mut merged = ConfigLayer::default();
        for (source, layer) in all_layers {
            errors.extend(layer.validate(source.field_prefix()));
            merged = merged.overlay(layer);
        }

        let Some(platform) = platform else {
            return Err(errors);
        };
        errors.into_result(())?;

        let config = CrawlerConfig::from_layer(platform, &merged)?;
        debug!(
            "Resolved {} config: max_count={}, timeout={}s, delay={:?}",
            platform, config.max_count, config.timeout_secs, config.delay_range
        );
        Ok(config)
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(ConfigLayer::default())
    }
}

fn non_blank(values: Option<&[String]>) -> Vec<String> {
    values
        .unwrap_or_default()
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
