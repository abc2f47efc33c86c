use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::Value;

use crate::categories::NameLookup;
use crate::checks::CheckId;
use crate::model::WikiId;

pub const DEFAULT_USER_AGENT: &str = "autoreview/0.1";
pub const DEFAULT_ORES_URL: &str = "https://ores.wikimedia.org";
pub const DEFAULT_SUPERSEDED_SIMILARITY_THRESHOLD: f64 = 0.2;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HTTP_RETRIES: usize = 2;
pub const DEFAULT_HTTP_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_RATE_LIMIT_MS: u64 = 100;
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 1_000;
pub const DEFAULT_BLOCK_CACHE_TTL_SECS: u64 = 6 * 60 * 60;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct AutoreviewConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub ores: OresSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub code: Option<String>,
    pub family: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

/// Per-wiki review policy. Zero or absent ORES thresholds fall back to `[ores]`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PolicySection {
    #[serde(default)]
    pub auto_approved_groups: Vec<String>,
    #[serde(default)]
    pub blocking_categories: Vec<String>,
    #[serde(default)]
    pub redirect_aliases: Vec<String>,
    pub superseded_similarity_threshold: Option<f64>,
    pub ores_damaging_threshold: Option<f64>,
    pub ores_goodfaith_threshold: Option<f64>,
    pub ores_damaging_threshold_living: Option<f64>,
    pub ores_goodfaith_threshold_living: Option<f64>,
    #[serde(default)]
    pub enabled_checks: Vec<String>,
}

/// Global ORES defaults. A threshold of 0 disables that model.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct OresSection {
    pub base_url: Option<String>,
    #[serde(default)]
    pub damaging_threshold: f64,
    #[serde(default)]
    pub goodfaith_threshold: f64,
    #[serde(default)]
    pub damaging_threshold_living: f64,
    #[serde(default)]
    pub goodfaith_threshold_living: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CacheSection {
    pub block_capacity: Option<usize>,
    pub block_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { field: &'static str, value: f64 },
    #[error("unknown check id `{0}` in policy.enabled_checks")]
    UnknownCheck(String),
    #[error("wiki.code must not be empty")]
    EmptyWikiCode,
    #[error("cache.block_capacity must be at least 1")]
    ZeroCacheCapacity,
}

/// Thresholds after falling back to the global defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OresThresholds {
    pub damaging: f64,
    pub goodfaith: f64,
    pub damaging_living: f64,
    pub goodfaith_living: f64,
}

/// Resolved per-wiki policy handed to the checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPolicy {
    pub auto_groups: NameLookup,
    pub blocking_categories: NameLookup,
    pub redirect_aliases: Vec<String>,
    pub superseded_similarity_threshold: f64,
    pub ores: OresThresholds,
    pub enabled_checks: Vec<CheckId>,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            auto_groups: NameLookup::default(),
            blocking_categories: NameLookup::default(),
            redirect_aliases: Vec::new(),
            superseded_similarity_threshold: DEFAULT_SUPERSEDED_SIMILARITY_THRESHOLD,
            ores: OresThresholds::default(),
            enabled_checks: Vec::new(),
        }
    }
}

impl AutoreviewConfig {
    pub fn wiki_id(&self) -> WikiId {
        let defaults = WikiId::default();
        WikiId::new(
            self.wiki
                .code
                .as_deref()
                .map(str::trim)
                .unwrap_or(defaults.code.as_str()),
            self.wiki
                .family
                .as_deref()
                .map(str::trim)
                .filter(|family| !family.is_empty())
                .unwrap_or(defaults.family.as_str()),
        )
    }

    /// Resolve the API URL: env AUTOREVIEW_API_URL > config > derived from the wiki id.
    pub fn api_url(&self) -> String {
        env_value("AUTOREVIEW_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| {
                let wiki = self.wiki_id();
                format!("https://{}.{}.org/w/api.php", wiki.code, wiki.family)
            })
    }

    /// Resolve user agent: env AUTOREVIEW_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_value("AUTOREVIEW_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn ores_url(&self) -> String {
        env_value("AUTOREVIEW_ORES_URL")
            .or_else(|| self.ores.base_url.clone())
            .unwrap_or_else(|| DEFAULT_ORES_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.wiki.code.as_deref().is_some_and(|code| code.trim().is_empty()) {
            return Err(ConfigError::EmptyWikiCode);
        }
        let thresholds = [
            (
                "policy.superseded_similarity_threshold",
                self.policy.superseded_similarity_threshold,
            ),
            ("policy.ores_damaging_threshold", self.policy.ores_damaging_threshold),
            ("policy.ores_goodfaith_threshold", self.policy.ores_goodfaith_threshold),
            (
                "policy.ores_damaging_threshold_living",
                self.policy.ores_damaging_threshold_living,
            ),
            (
                "policy.ores_goodfaith_threshold_living",
                self.policy.ores_goodfaith_threshold_living,
            ),
            ("ores.damaging_threshold", Some(self.ores.damaging_threshold)),
            ("ores.goodfaith_threshold", Some(self.ores.goodfaith_threshold)),
            (
                "ores.damaging_threshold_living",
                Some(self.ores.damaging_threshold_living),
            ),
            (
                "ores.goodfaith_threshold_living",
                Some(self.ores.goodfaith_threshold_living),
            ),
        ];
        for (field, value) in thresholds {
            if let Some(value) = value
                && !(0.0..=1.0).contains(&value)
            {
                return Err(ConfigError::ThresholdOutOfRange { field, value });
            }
        }
        for id in &self.policy.enabled_checks {
            if CheckId::parse(id).is_err() {
                return Err(ConfigError::UnknownCheck(id.clone()));
            }
        }
        if self.cache.block_capacity == Some(0) {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        Ok(())
    }

    pub fn ores_thresholds(&self) -> OresThresholds {
        OresThresholds {
            damaging: non_zero_or(self.policy.ores_damaging_threshold, self.ores.damaging_threshold),
            goodfaith: non_zero_or(
                self.policy.ores_goodfaith_threshold,
                self.ores.goodfaith_threshold,
            ),
            damaging_living: non_zero_or(
                self.policy.ores_damaging_threshold_living,
                self.ores.damaging_threshold_living,
            ),
            goodfaith_living: non_zero_or(
                self.policy.ores_goodfaith_threshold_living,
                self.ores.goodfaith_threshold_living,
            ),
        }
    }

    /// Enabled checks in configuration order; unknown ids were rejected by `validate`.
    pub fn enabled_checks(&self) -> Vec<CheckId> {
        self.policy
            .enabled_checks
            .iter()
            .filter_map(|id| CheckId::parse(id).ok())
            .collect()
    }

    pub fn review_policy(&self) -> ReviewPolicy {
        ReviewPolicy {
            auto_groups: NameLookup::new(&self.policy.auto_approved_groups),
            blocking_categories: NameLookup::new(&self.policy.blocking_categories),
            redirect_aliases: self.policy.redirect_aliases.clone(),
            superseded_similarity_threshold: self
                .policy
                .superseded_similarity_threshold
                .unwrap_or(DEFAULT_SUPERSEDED_SIMILARITY_THRESHOLD),
            ores: self.ores_thresholds(),
            enabled_checks: self.enabled_checks(),
        }
    }

    pub fn http_timeout_ms(&self) -> u64 {
        self.http.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS)
    }

    pub fn block_cache_capacity(&self) -> usize {
        self.cache
            .block_capacity
            .unwrap_or(DEFAULT_BLOCK_CACHE_CAPACITY)
    }

    pub fn block_cache_ttl_secs(&self) -> u64 {
        self.cache
            .block_ttl_secs
            .unwrap_or(DEFAULT_BLOCK_CACHE_TTL_SECS)
    }
}

fn non_zero_or(value: Option<f64>, fallback: f64) -> f64 {
    value.filter(|value| *value > 0.0).unwrap_or(fallback)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load, parse and validate the configuration. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AutoreviewConfig> {
    if !config_path.exists() {
        return Ok(AutoreviewConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AutoreviewConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct EnabledChecksPatch {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub reset: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledChecksOutcome {
    pub wrote: bool,
    /// `None` when the list was cleared and the default catalog applies.
    pub enabled: Option<Vec<CheckId>>,
    pub unknown: Vec<String>,
}

/// Update `policy.enabled_checks` while preserving all other config sections.
pub fn patch_enabled_checks(
    config_path: &Path,
    patch: &EnabledChecksPatch,
) -> Result<EnabledChecksOutcome> {
    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;
    let policy_entry = root_table
        .entry("policy".to_string())
        .or_insert_with(|| Value::Table(Default::default()));
    let policy_table = policy_entry
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[policy] must be a table in {}", config_path.display()))?;

    let current = policy_table
        .get("enabled_checks")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|id| CheckId::parse(id).ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut unknown = Vec::new();
    let mut parse_ids = |ids: &[String]| {
        ids.iter()
            .filter_map(|id| match CheckId::parse(id) {
                Ok(check) => Some(check),
                Err(_) => {
                    unknown.push(id.clone());
                    None
                }
            })
            .collect::<Vec<_>>()
    };
    let enable = parse_ids(&patch.enable);
    let disable = parse_ids(&patch.disable);

    let enabled = if patch.reset && enable.is_empty() && disable.is_empty() {
        policy_table.remove("enabled_checks");
        None
    } else {
        let mut selected = if patch.reset || current.is_empty() {
            CheckId::default_catalog()
        } else {
            current
        };
        for check in enable {
            if !selected.contains(&check) {
                selected.push(check);
            }
        }
        selected.retain(|check| !disable.contains(check));
        selected.sort_by_key(|check| check.priority());
        policy_table.insert(
            "enabled_checks".to_string(),
            Value::Array(
                selected
                    .iter()
                    .map(|check| Value::String(check.as_str().to_string()))
                    .collect(),
            ),
        );
        Some(selected)
    };

    if root == original {
        return Ok(EnabledChecksOutcome {
            wrote: false,
            enabled,
            unknown,
        });
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(EnabledChecksOutcome {
        wrote: true,
        enabled,
        unknown,
    })
}
