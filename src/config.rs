//! Selector configuration.
//!
//! ```yaml
//! default_layout_key: default_home
//! areas: [home, dashboard]
//! area_defaults:
//!   dashboard: default_dashboard
//! cache_ttl_secs: 300
//! evaluation_budget_ms: 50
//! ```
//!
//! Every field but `default_layout_key` has a default. A missing default
//! layout is reported by [`SelectorConfig::validate`], so it fails at startup
//! rather than on the first request that needs it.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::predicate::{DEFAULT_MAX_DEPTH, PARSE_DEPTH_LIMIT};

pub const ENV_DEFAULT_KEY: &str = "LAYOUT_DEFAULT_KEY";
pub const ENV_CACHE_TTL_SECS: &str = "LAYOUT_CACHE_TTL_SECS";
pub const ENV_EVAL_BUDGET_MS: &str = "LAYOUT_EVAL_BUDGET_MS";

fn default_areas() -> Vec<String> {
    vec!["home".to_string()]
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    100_000
}

fn default_max_predicate_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_evaluation_budget_ms() -> u64 {
    50
}

fn default_monitor_capacity() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Fallback when no rule matches.
    #[serde(default)]
    pub default_layout_key: String,

    /// Per-area fallback, overriding `default_layout_key`.
    #[serde(default)]
    pub area_defaults: BTreeMap<String, String>,

    /// Known display areas.
    #[serde(default = "default_areas")]
    pub areas: Vec<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Zero disables caching.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_max_predicate_depth")]
    pub max_predicate_depth: usize,

    #[serde(default = "default_evaluation_budget_ms")]
    pub evaluation_budget_ms: u64,

    #[serde(default = "default_monitor_capacity")]
    pub monitor_capacity: usize,

    /// Expired-entry sweep period for the server. Zero disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl SelectorConfig {
    pub fn new(default_layout_key: impl Into<String>) -> Self {
        Self {
            default_layout_key: default_layout_key.into(),
            area_defaults: BTreeMap::new(),
            areas: default_areas(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            max_predicate_depth: default_max_predicate_depth(),
            evaluation_budget_ms: default_evaluation_budget_ms(),
            monitor_capacity: default_monitor_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }

    /// Add a display area. No-op if already known.
    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        let area = area.into();
        if !self.areas.contains(&area) {
            self.areas.push(area);
        }
        self
    }

    pub fn with_area_default(mut self, area: impl Into<String>, layout_key: impl Into<String>) -> Self {
        let area = area.into();
        self = self.with_area(area.clone());
        self.area_defaults.insert(area, layout_key.into());
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Apply `LAYOUT_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any lookup; unset names leave fields untouched.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_DEFAULT_KEY) {
            self.default_layout_key = key;
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL_SECS) {
            self.cache_ttl_secs = parse_override(ENV_CACHE_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_EVAL_BUDGET_MS) {
            self.evaluation_budget_ms = parse_override(ENV_EVAL_BUDGET_MS, &raw)?;
        }
        Ok(())
    }

    /// Check everything that can be checked without a layout store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_layout_key.trim().is_empty() {
            return Err(ConfigError::MissingDefaultLayout);
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidTtl);
        }
        if self.max_predicate_depth == 0 || self.max_predicate_depth > PARSE_DEPTH_LIMIT {
            return Err(ConfigError::InvalidDepth {
                got: self.max_predicate_depth,
                max: PARSE_DEPTH_LIMIT,
            });
        }
        if self.evaluation_budget_ms == 0 {
            return Err(ConfigError::InvalidBudget);
        }
        if self.areas.is_empty() {
            return Err(ConfigError::NoAreas);
        }
        if let Some(area) = self.area_defaults.keys().find(|a| !self.is_known_area(a)) {
            return Err(ConfigError::UnknownAreaDefault(area.clone()));
        }
        if let Some((area, _)) = self.area_defaults.iter().find(|(_, key)| key.trim().is_empty()) {
            return Err(ConfigError::DefaultLayoutUnresolved {
                layout_key: String::new(),
                area: area.clone(),
            });
        }
        Ok(())
    }

    pub fn is_known_area(&self, area: &str) -> bool {
        self.areas.iter().any(|a| a == area)
    }

    /// Fallback layout key for `area`.
    pub fn default_layout_for(&self, area: &str) -> &str {
        self.area_defaults
            .get(area)
            .map(String::as_str)
            .unwrap_or(&self.default_layout_key)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn evaluation_budget(&self) -> Duration {
        Duration::from_millis(self.evaluation_budget_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        name: name.to_string(),
        value: raw.to_string(),
    })
}
